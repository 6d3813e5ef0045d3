//! 驱动层错误类型定义

use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// 注册表中没有该序列号
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// 注册了重复的序列号
    #[error("Duplicate serial number: {0}")]
    DuplicateSerial(String),

    /// 硬件 / 厂商驱动报告的错误
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// 参数非法（如非正的加速度）
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 设备不支持该操作
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// 设备已断开
    #[error("Device disconnected")]
    Disconnected,
}
