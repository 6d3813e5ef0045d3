//! # Polcomp Driver
//!
//! 设备驱动层：
//! - 驱动 trait（电机、测量设备），供厂商驱动实现
//! - 设备注册表（启动时构建一次，每台设备一把锁）
//! - 运动曲线估计（梯形 / 三角形速度曲线）
//! - 模拟设备（`simulated` feature），用于测试和无硬件演示

mod device;
mod error;
pub mod motion;
pub mod registry;
#[cfg(feature = "simulated")]
pub mod simulated;

pub use device::{Device, MeasurementDriver, MotorDriver, check_motion_params};
pub use error::DriverError;
pub use motion::{MotionProfile, estimate_duration};
pub use registry::{DeviceRegistry, DeviceSlot, MeasurementRegistry, MotorRegistry};
