//! 模拟设备
//!
//! 在没有硬件的环境下替代厂商驱动，供测试和演示服务使用。

mod measurement;
mod motor;

pub use measurement::{PolarizationSource, SimulatedPolarimeter, SimulatedTimetagger};
pub use motor::SimulatedMotor;
