//! 客户端错误类型定义

use polcomp_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// 连接、读写或等待超时
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// 服务端没有该设备
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// 服务端返回的错误响应
    #[error("Server error: {0}")]
    Remote(String),

    #[error("Unexpected response to '{command}': {response}")]
    UnexpectedResponse {
        command: &'static str,
        response: String,
    },

    /// 等待被取消
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    pub(crate) fn unexpected(command: &'static str, response: impl std::fmt::Debug) -> Self {
        ClientError::UnexpectedResponse {
            command,
            response: format!("{:?}", response),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }

    /// 会话是否已不可用（需要重连）
    pub fn breaks_session(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::Timeout(_) | ClientError::ConnectionClosed => true,
            ClientError::Protocol(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            // 读超时在 Unix 上表现为 WouldBlock
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                ClientError::Timeout(e.to_string())
            },
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ClientError::ConnectionClosed,
            _ => ClientError::Io(e),
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => e.into(),
            ProtocolError::ConnectionClosed => ClientError::ConnectionClosed,
            other => ClientError::Protocol(other),
        }
    }
}
