//! 偏振补偿控制器
//!
//! 两个独立的轴：方位角 → QWP，椭圆度 → HWP。每个 tick 读取一次偏振态，
//! 对每个轴调用 [`decide`] 并把结果转成 jog / stop 命令。
//!
//! 执行器失败只记录到 [`TickReport`] 并把该轴状态重置为 `Unknown`，
//! 不会中断控制循环。

use crate::axis::{AxisActivity, AxisDecision, AxisSettings, decide};
use crate::{Actuator, ControlError, ControlStateError, PolarizationData};
use arc_swap::ArcSwap;
use polcomp_protocol::MotorDirection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// 控制轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// 方位角（QWP）
    Azimuth,
    /// 椭圆度（HWP）
    Ellipticity,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::Azimuth => "azimuth",
            Axis::Ellipticity => "ellipticity",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Setpoint / Override
// ============================================================================

/// 控制目标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSetpoint {
    /// 目标方位角（°）
    pub target_azimuth: f64,
    /// 目标椭圆度（°）
    pub target_ellipticity: f64,
    /// 关闭时控制器每个 tick 只发送 stop
    pub enabled: bool,
}

impl ControlSetpoint {
    pub fn target(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Azimuth => self.target_azimuth,
            Axis::Ellipticity => self.target_ellipticity,
        }
    }
}

impl Default for ControlSetpoint {
    fn default() -> Self {
        Self {
            target_azimuth: 0.0,
            target_ellipticity: 0.0,
            enabled: true,
        }
    }
}

/// 控制目标的共享句柄
///
/// 操作员线程修改，控制线程每个 tick 无锁读取。
#[derive(Debug, Clone)]
pub struct SetpointHandle {
    inner: Arc<ArcSwap<ControlSetpoint>>,
}

impl SetpointHandle {
    fn new(setpoint: ControlSetpoint) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(setpoint)),
        }
    }

    pub fn load(&self) -> ControlSetpoint {
        **self.inner.load()
    }

    pub fn store(&self, setpoint: ControlSetpoint) {
        self.inner.store(Arc::new(setpoint));
    }

    pub fn set_target(&self, target_azimuth: f64, target_ellipticity: f64) {
        self.inner.rcu(|current| ControlSetpoint {
            target_azimuth,
            target_ellipticity,
            ..**current
        });
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.rcu(|current| ControlSetpoint {
            enabled,
            ..**current
        });
    }
}

/// 人工接管标志
///
/// 置位期间控制器不向该轴发送任何命令，并忘记该轴的运动状态。
#[derive(Debug, Clone)]
pub struct OverrideHandle {
    flag: Arc<AtomicBool>,
}

impl OverrideHandle {
    pub fn set(&self, overridden: bool) {
        self.flag.store(overridden, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ============================================================================
// Report
// ============================================================================

/// 跳过执行的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Overridden,
    UndefinedReading,
    NonFinite,
    MeasurementFailed,
}

/// 单轴在一个 tick 内的结果
#[derive(Debug, Clone, PartialEq)]
pub enum AxisOutcome {
    Commanded(AxisDecision),
    Skipped(SkipReason),
    Failed { decision: AxisDecision, error: String },
}

impl AxisOutcome {
    /// 是否向电机发送了命令
    pub fn sent_command(&self) -> bool {
        matches!(
            self,
            AxisOutcome::Commanded(AxisDecision::Stop | AxisDecision::Restart { .. })
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, AxisOutcome::Failed { .. })
    }
}

/// 一个 tick 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub azimuth: AxisOutcome,
    pub ellipticity: AxisOutcome,
}

impl TickReport {
    pub fn outcome(&self, axis: Axis) -> &AxisOutcome {
        match axis {
            Axis::Azimuth => &self.azimuth,
            Axis::Ellipticity => &self.ellipticity,
        }
    }

    pub fn commands(&self) -> usize {
        [&self.azimuth, &self.ellipticity]
            .into_iter()
            .filter(|outcome| outcome.sent_command())
            .count()
    }

    pub fn failures(&self) -> usize {
        [&self.azimuth, &self.ellipticity]
            .into_iter()
            .filter(|outcome| outcome.is_failure())
            .count()
    }
}

// ============================================================================
// Axis channel
// ============================================================================

struct AxisChannel<A> {
    axis: Axis,
    actuator: A,
    settings: AxisSettings,
    activity: AxisActivity,
    manual_override: Arc<AtomicBool>,
}

impl<A: Actuator> AxisChannel<A> {
    fn new(axis: Axis, actuator: A, settings: AxisSettings) -> Self {
        Self {
            axis,
            actuator,
            settings,
            activity: AxisActivity::Unknown,
            manual_override: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_overridden(&mut self) -> bool {
        if !self.manual_override.load(Ordering::Acquire) {
            return false;
        }
        if self.activity != AxisActivity::Unknown {
            debug!("{} under manual override", self.axis);
            self.activity = AxisActivity::Unknown;
        }
        true
    }

    fn actuate(&mut self, current: f64, target: f64) -> AxisOutcome {
        if self.is_overridden() {
            return AxisOutcome::Skipped(SkipReason::Overridden);
        }
        if !(current.is_finite() && target.is_finite()) {
            return AxisOutcome::Skipped(SkipReason::NonFinite);
        }

        let decision = decide(
            current,
            target,
            &self.settings.tiers,
            self.activity,
            self.settings.convention,
        );
        self.apply(decision)
    }

    /// 人工接管之外一律发送 stop：电机可能被其他客户端转动
    fn halt(&mut self, reason: SkipReason) -> AxisOutcome {
        if self.is_overridden() {
            return AxisOutcome::Skipped(SkipReason::Overridden);
        }
        debug!("{} halted: {:?}", self.axis, reason);
        self.apply(AxisDecision::Stop)
    }

    fn apply(&mut self, decision: AxisDecision) -> AxisOutcome {
        let result = match decision {
            AxisDecision::Hold => return AxisOutcome::Commanded(decision),
            AxisDecision::Stop => self.actuator.stop().map(|()| AxisActivity::Idle),
            AxisDecision::Restart {
                direction,
                velocity,
            } => self.restart(direction, velocity),
        };

        match result {
            Ok(activity) => {
                debug!("{} ({}): {:?}", self.axis, self.actuator.label(), decision);
                self.activity = activity;
                AxisOutcome::Commanded(decision)
            },
            Err(e) => {
                warn!(
                    "{} ({}): {:?} failed: {}",
                    self.axis,
                    self.actuator.label(),
                    decision,
                    e
                );
                self.activity = AxisActivity::Unknown;
                AxisOutcome::Failed {
                    decision,
                    error: e.to_string(),
                }
            },
        }
    }

    /// jog 参数不能在运动中修改：先停再 jog
    fn restart(
        &mut self,
        direction: MotorDirection,
        velocity: f64,
    ) -> Result<AxisActivity, ControlError> {
        self.actuator.stop()?;
        self.actuator.jog(direction, self.settings.acceleration, velocity)?;
        Ok(AxisActivity::Jogging {
            direction,
            velocity,
        })
    }
}

// ============================================================================
// Controller
// ============================================================================

/// 双轴分档 bang-bang 控制器
pub struct PolarizationController<A> {
    azimuth: AxisChannel<A>,
    ellipticity: AxisChannel<A>,
    setpoint: SetpointHandle,
    was_enabled: bool,
}

impl<A: Actuator> PolarizationController<A> {
    /// `qwp` 补偿方位角，`hwp` 补偿椭圆度
    pub fn new(qwp: A, hwp: A, azimuth: AxisSettings, ellipticity: AxisSettings) -> Self {
        let setpoint = ControlSetpoint::default();
        Self {
            azimuth: AxisChannel::new(Axis::Azimuth, qwp, azimuth),
            ellipticity: AxisChannel::new(Axis::Ellipticity, hwp, ellipticity),
            setpoint: SetpointHandle::new(setpoint),
            was_enabled: setpoint.enabled,
        }
    }

    pub fn with_setpoint(self, setpoint: ControlSetpoint) -> Self {
        self.setpoint.store(setpoint);
        self
    }

    pub fn setpoint_handle(&self) -> SetpointHandle {
        self.setpoint.clone()
    }

    pub fn override_handle(&self, axis: Axis) -> OverrideHandle {
        OverrideHandle {
            flag: Arc::clone(&self.channel(axis).manual_override),
        }
    }

    pub fn activity(&self, axis: Axis) -> AxisActivity {
        self.channel(axis).activity
    }

    pub fn settings(&self, axis: Axis) -> &AxisSettings {
        &self.channel(axis).settings
    }

    pub fn actuator(&self, axis: Axis) -> &A {
        &self.channel(axis).actuator
    }

    pub fn into_actuators(self) -> (A, A) {
        (self.azimuth.actuator, self.ellipticity.actuator)
    }

    fn channel(&self, axis: Axis) -> &AxisChannel<A> {
        match axis {
            Axis::Azimuth => &self.azimuth,
            Axis::Ellipticity => &self.ellipticity,
        }
    }

    /// 处理一次偏振读数
    pub fn tick(&mut self, reading: Result<PolarizationData, ControlStateError>) -> TickReport {
        let setpoint = self.setpoint.load();
        if setpoint.enabled != self.was_enabled {
            info!(
                "Compensation {}",
                if setpoint.enabled { "enabled" } else { "disabled" }
            );
            self.was_enabled = setpoint.enabled;
        }

        if !setpoint.enabled {
            return self.halt_all(SkipReason::Disabled);
        }

        let data = match reading {
            Ok(data) => data,
            Err(e) => {
                debug!("Skipping tick: {}", e);
                let reason = match e {
                    ControlStateError::NonFinite => SkipReason::NonFinite,
                    ControlStateError::UndefinedStokes { .. } => SkipReason::UndefinedReading,
                };
                return TickReport {
                    azimuth: self.skip(Axis::Azimuth, reason),
                    ellipticity: self.skip(Axis::Ellipticity, reason),
                };
            },
        };

        TickReport {
            azimuth: self.azimuth.actuate(data.azimuth, setpoint.target_azimuth),
            ellipticity: self
                .ellipticity
                .actuate(data.ellipticity, setpoint.target_ellipticity),
        }
    }

    /// 测量失败时调用：停下两个电机，等待下一次读数
    pub fn park(&mut self) -> TickReport {
        self.halt_all(SkipReason::MeasurementFailed)
    }

    /// 无条件停止两个轴（退出控制循环时）
    ///
    /// 两个轴都会尝试，返回第一个错误。
    pub fn stop_all(&mut self) -> Result<(), ControlError> {
        let mut first_error = None;
        for channel in [&mut self.azimuth, &mut self.ellipticity] {
            match channel.actuator.stop() {
                Ok(()) => channel.activity = AxisActivity::Idle,
                Err(e) => {
                    warn!("Failed to stop {} ({}): {}", channel.axis, channel.actuator.label(), e);
                    channel.activity = AxisActivity::Unknown;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                },
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn halt_all(&mut self, reason: SkipReason) -> TickReport {
        TickReport {
            azimuth: self.azimuth.halt(reason),
            ellipticity: self.ellipticity.halt(reason),
        }
    }

    fn skip(&mut self, axis: Axis, reason: SkipReason) -> AxisOutcome {
        let channel = match axis {
            Axis::Azimuth => &mut self.azimuth,
            Axis::Ellipticity => &mut self.ellipticity,
        };
        if channel.is_overridden() {
            return AxisOutcome::Skipped(SkipReason::Overridden);
        }
        AxisOutcome::Skipped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polcomp_client::ClientError;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Jog(MotorDirection, f64),
        Stop,
    }

    #[derive(Default)]
    struct RecordingActuator {
        calls: Vec<Call>,
        fail: bool,
    }

    impl RecordingActuator {
        fn failing() -> Self {
            Self {
                calls: Vec::new(),
                fail: true,
            }
        }

        fn check(&self) -> Result<(), ControlError> {
            if self.fail {
                return Err(ControlError::Client(ClientError::ConnectionClosed));
            }
            Ok(())
        }
    }

    impl Actuator for RecordingActuator {
        fn label(&self) -> String {
            "recorder".to_string()
        }

        fn jog(
            &mut self,
            direction: MotorDirection,
            _acceleration: f64,
            velocity: f64,
        ) -> Result<(), ControlError> {
            self.calls.push(Call::Jog(direction, velocity));
            self.check()
        }

        fn stop(&mut self) -> Result<(), ControlError> {
            self.calls.push(Call::Stop);
            self.check()
        }
    }

    fn controller() -> PolarizationController<RecordingActuator> {
        PolarizationController::new(
            RecordingActuator::default(),
            RecordingActuator::default(),
            AxisSettings::default(),
            AxisSettings::default(),
        )
    }

    fn reading(azimuth: f64, ellipticity: f64) -> Result<PolarizationData, ControlStateError> {
        Ok(PolarizationData {
            azimuth,
            ellipticity,
            normalized_s1: 0.0,
            normalized_s2: 0.0,
            normalized_s3: 0.0,
        })
    }

    fn calls(controller: &PolarizationController<RecordingActuator>, axis: Axis) -> Vec<Call> {
        controller.actuator(axis).calls.clone()
    }

    #[test]
    fn test_hysteresis_and_sign_flip() {
        let mut controller = controller();

        // 初始状态未知：先停再 jog
        let report = controller.tick(reading(3.0, 0.0));
        assert_eq!(
            calls(&controller, Axis::Azimuth),
            vec![Call::Stop, Call::Jog(MotorDirection::Forward, 15.0)]
        );
        assert_eq!(report.commands(), 2);

        // 同档同向：不发命令
        let report = controller.tick(reading(3.5, 0.0));
        assert_eq!(report.azimuth, AxisOutcome::Commanded(AxisDecision::Hold));
        assert_eq!(calls(&controller, Axis::Azimuth).len(), 2);

        // 符号翻转
        controller.tick(reading(-3.0, 0.0));
        assert_eq!(
            calls(&controller, Axis::Azimuth)[2..],
            [Call::Stop, Call::Jog(MotorDirection::Backward, 15.0)]
        );
        assert_eq!(
            controller.activity(Axis::Azimuth),
            AxisActivity::Jogging {
                direction: MotorDirection::Backward,
                velocity: 15.0
            }
        );
    }

    #[test]
    fn test_dead_band_stops_every_tick() {
        let mut controller = controller();
        controller.tick(reading(10.0, 0.0));
        controller.tick(reading(0.05, 0.0));
        assert_eq!(controller.activity(Axis::Azimuth), AxisActivity::Idle);
        assert_eq!(
            calls(&controller, Axis::Azimuth),
            vec![Call::Stop, Call::Jog(MotorDirection::Forward, 25.0), Call::Stop]
        );

        for azimuth in [0.01, 0.02] {
            let report = controller.tick(reading(azimuth, 0.0));
            assert_eq!(report.azimuth, AxisOutcome::Commanded(AxisDecision::Stop));
        }
        assert_eq!(calls(&controller, Axis::Azimuth).len(), 5);
        assert_eq!(calls(&controller, Axis::Azimuth)[3..], [Call::Stop, Call::Stop]);

        // 离开死区：即使已知静止也先 stop 再 jog
        controller.tick(reading(0.5, 0.0));
        assert_eq!(
            calls(&controller, Axis::Azimuth)[5..],
            [Call::Stop, Call::Jog(MotorDirection::Forward, 0.5)]
        );
    }

    #[test]
    fn test_external_jog_is_stopped_in_dead_band() {
        use std::cell::RefCell;
        use std::rc::Rc;

        // 共享一台电机：控制器和另一个客户端都能转动它
        #[derive(Default)]
        struct SharedMotor {
            moving: bool,
            stops: usize,
        }

        struct SharedActuator(Rc<RefCell<SharedMotor>>);

        impl Actuator for SharedActuator {
            fn label(&self) -> String {
                "shared".to_string()
            }

            fn jog(&mut self, _: MotorDirection, _: f64, _: f64) -> Result<(), ControlError> {
                self.0.borrow_mut().moving = true;
                Ok(())
            }

            fn stop(&mut self) -> Result<(), ControlError> {
                let mut motor = self.0.borrow_mut();
                motor.moving = false;
                motor.stops += 1;
                Ok(())
            }
        }

        let qwp = Rc::new(RefCell::new(SharedMotor::default()));
        let hwp = Rc::new(RefCell::new(SharedMotor::default()));
        let mut controller = PolarizationController::new(
            SharedActuator(Rc::clone(&qwp)),
            SharedActuator(Rc::clone(&hwp)),
            AxisSettings::default(),
            AxisSettings::default(),
        );

        controller.tick(reading(0.01, 0.01));
        assert_eq!(controller.activity(Axis::Azimuth), AxisActivity::Idle);
        assert!(!qwp.borrow().moving);
        let stops = qwp.borrow().stops;

        // 另一个客户端在控制器不知情时 jog 了 QWP
        qwp.borrow_mut().moving = true;

        let report = controller.tick(reading(0.01, 0.01));
        assert_eq!(report.azimuth, AxisOutcome::Commanded(AxisDecision::Stop));
        assert!(!qwp.borrow().moving);
        assert_eq!(qwp.borrow().stops, stops + 1);
    }

    #[test]
    fn test_undefined_reading_skips_actuation() {
        let mut controller = controller();
        controller.tick(reading(10.0, 10.0));
        let before = calls(&controller, Axis::Azimuth).len();

        let report = controller.tick(Err(ControlStateError::UndefinedStokes { defined: 1 }));
        assert_eq!(report.azimuth, AxisOutcome::Skipped(SkipReason::UndefinedReading));
        assert_eq!(report.ellipticity, AxisOutcome::Skipped(SkipReason::UndefinedReading));
        assert_eq!(calls(&controller, Axis::Azimuth).len(), before);

        let report = controller.tick(reading(f64::NAN, 0.0));
        assert_eq!(report.azimuth, AxisOutcome::Skipped(SkipReason::NonFinite));
    }

    #[test]
    fn test_override_forgets_activity() {
        let mut controller = controller();
        controller.tick(reading(10.0, 10.0));
        let handle = controller.override_handle(Axis::Ellipticity);
        handle.set(true);

        let report = controller.tick(reading(-10.0, -10.0));
        assert_eq!(report.ellipticity, AxisOutcome::Skipped(SkipReason::Overridden));
        assert!(report.azimuth.sent_command());
        assert_eq!(controller.activity(Axis::Ellipticity), AxisActivity::Unknown);
        assert_eq!(calls(&controller, Axis::Ellipticity).len(), 2);

        // 解除后状态未知：stop → jog
        handle.set(false);
        controller.tick(reading(-10.0, -10.0));
        assert_eq!(
            calls(&controller, Axis::Ellipticity)[2..],
            [Call::Stop, Call::Jog(MotorDirection::Backward, 25.0)]
        );
    }

    #[test]
    fn test_disabled_keeps_axes_stopped() {
        let mut controller = controller();
        let setpoint = controller.setpoint_handle();
        controller.tick(reading(10.0, 0.01));

        setpoint.set_enabled(false);
        for _ in 0..2 {
            let report = controller.tick(reading(10.0, 0.01));
            assert_eq!(report.azimuth, AxisOutcome::Commanded(AxisDecision::Stop));
            assert_eq!(report.ellipticity, AxisOutcome::Commanded(AxisDecision::Stop));
        }
        assert_eq!(calls(&controller, Axis::Azimuth)[2..], [Call::Stop, Call::Stop]);

        // 人工接管的轴仍然跳过
        controller.override_handle(Axis::Ellipticity).set(true);
        let report = controller.tick(reading(10.0, 0.01));
        assert_eq!(report.ellipticity, AxisOutcome::Skipped(SkipReason::Overridden));
        assert_eq!(report.commands(), 1);
    }

    #[test]
    fn test_setpoint_changes_target() {
        let mut controller = controller();
        controller.setpoint_handle().set_target(10.0, 0.0);

        // error = 12 − 10 = 2
        controller.tick(reading(12.0, 0.0));
        assert_eq!(
            controller.activity(Axis::Azimuth),
            AxisActivity::Jogging {
                direction: MotorDirection::Forward,
                velocity: 5.0
            }
        );
        assert!(controller.setpoint_handle().load().enabled);
    }

    #[test]
    fn test_actuator_failure_is_reported() {
        let mut controller = PolarizationController::new(
            RecordingActuator::failing(),
            RecordingActuator::default(),
            AxisSettings::default(),
            AxisSettings::default(),
        );

        let report = controller.tick(reading(10.0, 10.0));
        assert!(matches!(report.azimuth, AxisOutcome::Failed { .. }));
        assert!(report.ellipticity.sent_command());
        assert_eq!(report.failures(), 1);
        assert_eq!(controller.activity(Axis::Azimuth), AxisActivity::Unknown);

        assert!(controller.stop_all().is_err());
        assert_eq!(controller.activity(Axis::Ellipticity), AxisActivity::Idle);
    }

    #[test]
    fn test_park_stops_both_axes() {
        let mut controller = controller();
        controller.tick(reading(10.0, 0.0));
        controller.tick(reading(10.0, 0.0));

        let report = controller.park();
        assert_eq!(report.azimuth, AxisOutcome::Commanded(AxisDecision::Stop));
        assert_eq!(report.ellipticity, AxisOutcome::Commanded(AxisDecision::Stop));
        assert_eq!(controller.activity(Axis::Azimuth), AxisActivity::Idle);

        let report = controller.park();
        assert_eq!(report.commands(), 2);
    }
}
