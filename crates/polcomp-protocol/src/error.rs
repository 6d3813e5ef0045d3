//! 协议层错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON 语法错误
    #[error("Malformed JSON message: {0}")]
    MalformedJson(String),

    /// JSON 请求缺少 `command` 字段
    #[error("Missing 'command' field")]
    MissingCommand,

    /// 未知的 JSON 命令名
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// 未知的二进制命令 ID
    #[error("Unknown command: {0}")]
    UnknownCommandId(u32),

    /// 命令参数缺失或类型错误
    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    /// 未知的二进制响应类型
    #[error("Unknown response type: {0}")]
    UnknownResponseType(u8),

    /// 负载内的长度字段超出剩余字节
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// 帧长度字段非法（必须至少包含类型字节）
    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(u32),

    /// 帧超过长度上限
    #[error("Frame too large: {len} bytes (limit {limit})")]
    FrameTooLarge { len: usize, limit: usize },

    /// RawData 两个计数字段不一致
    #[error("RawData count mismatch: {first} != {second}")]
    CountMismatch { first: u32, second: u32 },

    /// RawData 时间标签与通道数组长度不一致
    #[error("RawData length mismatch: {timetags} timetags, {channels} channels")]
    LengthMismatch { timetags: usize, channels: usize },

    /// 字符串字段不是合法 UTF-8
    #[error("Invalid UTF-8 in field '{0}'")]
    InvalidUtf8(&'static str),

    /// 序列化失败
    #[error("Encode error: {0}")]
    Encode(String),

    /// 对端在帧中途关闭连接
    #[error("Connection closed")]
    ConnectionClosed,

    /// 底层 I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// 该错误是否使连接失去同步（必须关闭连接）
    ///
    /// 非致命错误（未知命令、JSON 语法错误等）只影响单条消息，
    /// 连接可以继续使用。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated { .. }
                | ProtocolError::InvalidFrameLength(_)
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::ConnectionClosed
                | ProtocolError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownCommandId(7);
        assert_eq!(format!("{}", err), "Unknown command: 7");

        let err = ProtocolError::UnknownCommand("spin".to_string());
        assert_eq!(format!("{}", err), "Unknown command: spin");

        let err = ProtocolError::CountMismatch {
            first: 3,
            second: 4,
        };
        assert!(format!("{}", err).contains("3 != 4"));
    }

    #[test]
    fn test_protocol_error_fatality() {
        // 单条消息错误：连接保持
        assert!(!ProtocolError::UnknownCommandId(9).is_fatal());
        assert!(!ProtocolError::MalformedJson("x".into()).is_fatal());
        assert!(!ProtocolError::UnknownResponseType(42).is_fatal());

        // 帧失步：连接关闭
        assert!(ProtocolError::ConnectionClosed.is_fatal());
        assert!(
            ProtocolError::Truncated {
                needed: 8,
                remaining: 2
            }
            .is_fatal()
        );
        assert!(ProtocolError::InvalidFrameLength(0).is_fatal());
    }
}
