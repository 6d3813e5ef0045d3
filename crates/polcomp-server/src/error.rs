//! 服务层错误类型定义

use polcomp_driver::DriverError;
use polcomp_protocol::ProtocolError;
use thiserror::Error;

/// 服务层错误类型
#[derive(Error, Debug)]
pub enum ServerError {
    /// 监听地址绑定失败
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 连接 I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 协议错误（致命错误会关闭连接）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 驱动错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 线程创建失败
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
