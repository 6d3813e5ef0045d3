//! # Polcomp Protocol
//!
//! 偏振补偿测试台的线协议定义（无 I/O 策略）
//!
//! ## 模块
//!
//! - `types`: 共享数据模型（设备信息、电机状态、原始测量数据）
//! - `json`: 行分隔 JSON 协议（电机控制，端口 5002）
//! - `binary`: 长度前缀二进制协议（测量遥测，端口 5003）
//!
//! ## 字节序
//!
//! 二进制帧头、命令 ID、字符串长度使用小端字节序；
//! RawData 的计数和时间标签使用大端字节序。

pub mod binary;
mod error;
pub mod json;
pub mod types;

pub use error::ProtocolError;
pub use types::*;

/// 电机服务默认端口
pub const MOTOR_SERVER_PORT: u16 = 5002;

/// 测量服务默认端口
pub const MEASUREMENT_SERVER_PORT: u16 = 5003;
