//! 控制层错误类型定义

use crate::ControlStateError;
use polcomp_client::ClientError;
use polcomp_driver::DriverError;
use std::path::PathBuf;
use thiserror::Error;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 远程设备访问失败
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// 本地驱动失败
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Invalid velocity tiers: {0}")]
    InvalidTiers(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to access config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    State(#[from] ControlStateError),
}
