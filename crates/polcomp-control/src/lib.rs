//! # Polcomp Control
//!
//! 偏振补偿控制器：
//!
//! ```text
//! MeasurementSource ──→ PolarizationData（Stokes → 方位角 / 椭圆度）
//!                              ↓
//! PolarizationController::tick ── 每轴 decide()（分档速度 + 迟滞）
//!                              ↓
//! Actuator（RemoteMotor / 本地 DeviceSlot）jog / stop
//! ```
//!
//! 方位角由 QWP 电机补偿，椭圆度由 HWP 电机补偿。

mod actuator;
pub mod axis;
mod config;
pub mod controller;
mod error;
pub mod loop_runner;
pub mod polarization;
pub mod tiers;

pub use actuator::{Actuator, MeasurementSource};
pub use axis::{AxisActivity, AxisDecision, AxisSettings, DirectionConvention, decide};
pub use config::{CompensationConfig, MeasurementFraming};
pub use controller::{
    Axis, AxisOutcome, ControlSetpoint, OverrideHandle, PolarizationController, SetpointHandle,
    SkipReason, TickReport,
};
pub use error::ControlError;
pub use loop_runner::{LoopConfig, LoopSummary, run_compensation};
pub use polarization::{ControlStateError, PolarizationData};
pub use tiers::{VelocityTier, VelocityTiers};
