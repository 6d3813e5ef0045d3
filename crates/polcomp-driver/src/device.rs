//! 设备驱动 trait
//!
//! 厂商驱动（旋转台、偏振计、时间标签器）通过这些 trait 接入。
//! 所有方法都在设备锁内调用，因此实现无需自行处理并发。

use crate::DriverError;
use polcomp_protocol::{DeviceInfo, MotorDirection, MotorState, RawMeasurement};

/// 所有设备的公共接口
pub trait Device: Send {
    /// 设备身份信息（连接后不变）
    fn device_info(&self) -> DeviceInfo;

    /// 断开设备
    fn disconnect(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// 电机驱动
///
/// `move_by` / `move_to` / `jog` 只负责启动运动并立即返回；
/// 运动是否完成通过 `is_moving` / `state` 观察。
pub trait MotorDriver: Device {
    /// 一次性读取完整状态（位置与运动标志互相一致）
    fn state(&mut self) -> Result<MotorState, DriverError>;

    fn position(&mut self) -> Result<f64, DriverError> {
        Ok(self.state()?.position)
    }

    fn is_moving(&mut self) -> Result<bool, DriverError> {
        Ok(self.state()?.is_moving)
    }

    /// 相对移动 `angle` 度
    fn move_by(
        &mut self,
        angle: f64,
        acceleration: f64,
        max_velocity: f64,
    ) -> Result<(), DriverError>;

    /// 移动到绝对位置 `position` 度
    fn move_to(
        &mut self,
        position: f64,
        acceleration: f64,
        max_velocity: f64,
    ) -> Result<(), DriverError>;

    /// 以恒定速度持续转动，直到 `stop`
    fn jog(
        &mut self,
        direction: MotorDirection,
        acceleration: f64,
        max_velocity: f64,
    ) -> Result<(), DriverError>;

    /// 停止运动
    ///
    /// 必须幂等：对静止电机调用只会把方向重置为 `Idle`。
    fn stop(&mut self) -> Result<(), DriverError>;
}

/// 测量设备驱动（偏振计 / 时间标签器）
pub trait MeasurementDriver: Device {
    /// 采集一次原始数据
    fn measure(&mut self) -> Result<RawMeasurement, DriverError>;
}

/// 校验加速度和速度参数（必须为有限正数）
pub fn check_motion_params(acceleration: f64, max_velocity: f64) -> Result<(), DriverError> {
    if !(acceleration.is_finite() && acceleration > 0.0) {
        return Err(DriverError::InvalidArgument(format!(
            "acceleration must be a positive number, got {}",
            acceleration
        )));
    }
    if !(max_velocity.is_finite() && max_velocity > 0.0) {
        return Err(DriverError::InvalidArgument(format!(
            "max_velocity must be a positive number, got {}",
            max_velocity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_motion_params() {
        assert!(check_motion_params(20.0, 25.0).is_ok());
        assert!(check_motion_params(0.0, 25.0).is_err());
        assert!(check_motion_params(20.0, -1.0).is_err());
        assert!(check_motion_params(f64::NAN, 25.0).is_err());
        assert!(check_motion_params(20.0, f64::INFINITY).is_err());
    }
}
