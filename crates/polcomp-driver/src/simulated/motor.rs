//! 模拟旋转台
//!
//! 按墙钟时间推算位置：`move_by` / `move_to` 走梯形曲线，`jog` 以恒定速度转动。
//! 方向、加速度、速度设置的记录方式与真实旋转台驱动一致。

use crate::{Device, DriverError, MotionProfile, MotorDriver, check_motion_params};
use polcomp_protocol::{
    DEFAULT_ACCELERATION, DEFAULT_MAX_VELOCITY, DEFAULT_STEP_SIZE, DeviceInfo, MotorDirection,
    MotorState,
};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
enum Motion {
    Idle {
        position: f64,
    },
    Moving {
        start: f64,
        /// +1 / -1
        sign: f64,
        profile: MotionProfile,
        started: Instant,
    },
    Jogging {
        start: f64,
        direction: MotorDirection,
        velocity: f64,
        started: Instant,
    },
}

/// 模拟旋转台
pub struct SimulatedMotor {
    info: DeviceInfo,
    acceleration: f64,
    max_velocity: f64,
    step_size: f64,
    motion: Motion,
}

impl SimulatedMotor {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            info: DeviceInfo::new("Simulated", "K10CR1/M", serial_number, "sim-1.0"),
            acceleration: DEFAULT_ACCELERATION,
            max_velocity: DEFAULT_MAX_VELOCITY,
            step_size: DEFAULT_STEP_SIZE,
            motion: Motion::Idle { position: 0.0 },
        }
    }

    /// 设置初始位置（°）
    pub fn with_position(mut self, position: f64) -> Self {
        self.motion = Motion::Idle { position };
        self
    }

    /// 运动结束后转为静止
    fn settle(&mut self, now: Instant) {
        if let Motion::Moving {
            start,
            sign,
            profile,
            started,
        } = self.motion
            && now.duration_since(started).as_secs_f64() >= profile.duration()
        {
            self.motion = Motion::Idle {
                position: start + sign * profile.displacement(profile.duration()),
            };
        }
    }

    fn snapshot(&mut self, now: Instant) -> (f64, MotorDirection, bool) {
        self.settle(now);
        match self.motion {
            Motion::Idle { position } => (position, MotorDirection::Idle, false),
            Motion::Moving {
                start,
                sign,
                profile,
                started,
            } => {
                let t = now.duration_since(started).as_secs_f64();
                let direction = if sign > 0.0 {
                    MotorDirection::Forward
                } else {
                    MotorDirection::Backward
                };
                (start + sign * profile.displacement(t), direction, true)
            },
            Motion::Jogging {
                start,
                direction,
                velocity,
                started,
            } => {
                let t = now.duration_since(started).as_secs_f64();
                (start + direction.signum() * velocity * t, direction, true)
            },
        }
    }

    fn current_position(&mut self) -> f64 {
        self.snapshot(Instant::now()).0
    }
}

impl Device for SimulatedMotor {
    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        self.stop()
    }
}

impl MotorDriver for SimulatedMotor {
    fn state(&mut self) -> Result<MotorState, DriverError> {
        let (position, direction, is_moving) = self.snapshot(Instant::now());
        Ok(MotorState {
            position,
            direction,
            is_moving,
            acceleration: self.acceleration,
            max_velocity: self.max_velocity,
            step_size: self.step_size,
        })
    }

    fn move_by(
        &mut self,
        angle: f64,
        acceleration: f64,
        max_velocity: f64,
    ) -> Result<(), DriverError> {
        check_motion_params(acceleration, max_velocity)?;
        if !angle.is_finite() {
            return Err(DriverError::InvalidArgument(format!("angle must be finite, got {}", angle)));
        }

        let start = self.current_position();
        self.acceleration = acceleration;
        self.max_velocity = max_velocity;

        self.motion = match MotionProfile::new(angle, acceleration, max_velocity) {
            Some(profile) if angle != 0.0 => Motion::Moving {
                start,
                sign: angle.signum(),
                profile,
                started: Instant::now(),
            },
            _ => Motion::Idle { position: start },
        };
        Ok(())
    }

    fn move_to(
        &mut self,
        position: f64,
        acceleration: f64,
        max_velocity: f64,
    ) -> Result<(), DriverError> {
        let current = self.current_position();
        self.move_by(position - current, acceleration, max_velocity)
    }

    fn jog(
        &mut self,
        direction: MotorDirection,
        acceleration: f64,
        max_velocity: f64,
    ) -> Result<(), DriverError> {
        if direction.is_idle() {
            return Err(DriverError::InvalidArgument(
                "jog requires a forward or backward direction".to_string(),
            ));
        }
        check_motion_params(acceleration, max_velocity)?;

        let start = self.current_position();
        self.acceleration = acceleration;
        self.max_velocity = max_velocity;
        self.motion = Motion::Jogging {
            start,
            direction,
            velocity: max_velocity,
            started: Instant::now(),
        };
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let position = self.current_position();
        self.motion = Motion::Idle { position };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_initial_state() {
        let mut motor = SimulatedMotor::new("55353314").with_position(12.0);
        let state = motor.state().unwrap();
        assert_eq!(state.position, 12.0);
        assert!(!state.is_moving);
        assert_eq!(state.direction, MotorDirection::Idle);
        assert_eq!(state.acceleration, DEFAULT_ACCELERATION);
        assert_eq!(motor.device_info().serial_number, "55353314");
    }

    #[test]
    fn test_move_by_completes_at_target() {
        let mut motor = SimulatedMotor::new("1");
        // 高加速度、高速度：约 20 ms 完成
        motor.move_by(-2.0, 20_000.0, 1_000.0).unwrap();
        let state = motor.state().unwrap();
        assert!(state.is_moving);
        assert_eq!(state.direction, MotorDirection::Backward);

        thread::sleep(Duration::from_millis(60));
        let state = motor.state().unwrap();
        assert!(!state.is_moving);
        assert!((state.position + 2.0).abs() < 1e-9);
        assert_eq!(state.max_velocity, 1_000.0);
    }

    #[test]
    fn test_move_to_is_absolute() {
        let mut motor = SimulatedMotor::new("1").with_position(10.0);
        motor.move_to(7.5, 20_000.0, 1_000.0).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert!((motor.position().unwrap() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_jog_and_stop() {
        let mut motor = SimulatedMotor::new("1");
        motor.jog(MotorDirection::Forward, 20.0, 100.0).unwrap();
        thread::sleep(Duration::from_millis(30));
        let state = motor.state().unwrap();
        assert!(state.is_moving);
        assert_eq!(state.direction, MotorDirection::Forward);
        assert!(state.position > 0.0);

        motor.stop().unwrap();
        let stopped = motor.state().unwrap();
        assert!(!stopped.is_moving);
        assert_eq!(stopped.direction, MotorDirection::Idle);

        // 停止后位置不再变化；重复 stop 幂等
        thread::sleep(Duration::from_millis(10));
        motor.stop().unwrap();
        assert_eq!(motor.position().unwrap(), stopped.position);
    }

    #[test]
    fn test_invalid_commands() {
        let mut motor = SimulatedMotor::new("1");
        assert!(matches!(
            motor.jog(MotorDirection::Idle, 20.0, 25.0),
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(motor.move_by(5.0, 0.0, 25.0).is_err());
        assert!(motor.move_by(f64::NAN, 20.0, 25.0).is_err());
        // 失败的命令不改变状态
        assert!(!motor.is_moving().unwrap());
    }
}
