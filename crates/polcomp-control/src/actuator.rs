//! 控制器与设备之间的接口
//!
//! 控制器既可以驱动远程电机（[`RemoteMotor`]），也可以直接驱动本进程内
//! 注册表中的设备（[`DeviceSlot`]）。

use crate::ControlError;
use polcomp_client::{BinaryMeasurementClient, JsonMeasurementClient, RemoteMotor};
use polcomp_driver::{DeviceSlot, MeasurementDriver, MotorDriver};
use polcomp_protocol::{MotorDirection, RawMeasurement};
use std::sync::Arc;

/// 可 jog / stop 的执行器
pub trait Actuator {
    /// 日志中使用的名称
    fn label(&self) -> String;

    fn jog(
        &mut self,
        direction: MotorDirection,
        acceleration: f64,
        velocity: f64,
    ) -> Result<(), ControlError>;

    fn stop(&mut self) -> Result<(), ControlError>;
}

/// 偏振测量来源
pub trait MeasurementSource {
    fn measure(&mut self) -> Result<RawMeasurement, ControlError>;
}

// ============================================================================
// Actuator 实现
// ============================================================================

impl Actuator for RemoteMotor {
    fn label(&self) -> String {
        self.serial_number().to_string()
    }

    fn jog(
        &mut self,
        direction: MotorDirection,
        acceleration: f64,
        velocity: f64,
    ) -> Result<(), ControlError> {
        RemoteMotor::jog(self, direction, Some(acceleration), Some(velocity))?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ControlError> {
        RemoteMotor::stop(self)?;
        Ok(())
    }
}

impl Actuator for Arc<DeviceSlot<dyn MotorDriver>> {
    fn label(&self) -> String {
        self.serial_number().to_string()
    }

    fn jog(
        &mut self,
        direction: MotorDirection,
        acceleration: f64,
        velocity: f64,
    ) -> Result<(), ControlError> {
        self.with(|motor| motor.jog(direction, acceleration, velocity))?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ControlError> {
        self.with(|motor| motor.stop())?;
        Ok(())
    }
}

// ============================================================================
// MeasurementSource 实现
// ============================================================================

impl MeasurementSource for BinaryMeasurementClient {
    fn measure(&mut self) -> Result<RawMeasurement, ControlError> {
        Ok(BinaryMeasurementClient::measure(self)?)
    }
}

impl MeasurementSource for JsonMeasurementClient {
    fn measure(&mut self) -> Result<RawMeasurement, ControlError> {
        Ok(JsonMeasurementClient::measure(self)?)
    }
}

impl MeasurementSource for Arc<DeviceSlot<dyn MeasurementDriver>> {
    fn measure(&mut self) -> Result<RawMeasurement, ControlError> {
        Ok(self.with(|device| device.measure())?)
    }
}

impl<S: MeasurementSource + ?Sized> MeasurementSource for Box<S> {
    fn measure(&mut self) -> Result<RawMeasurement, ControlError> {
        (**self).measure()
    }
}
