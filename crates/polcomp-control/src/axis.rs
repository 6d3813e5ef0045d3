//! 单轴决策
//!
//! 每个 tick 对每个轴独立执行：
//!
//! 1. `error = current − target`
//! 2. `|error|` 不超过死区 → 停止（每个 tick 都发送，电机可能被其他客户端转动）
//! 3. 误差符号经 [`DirectionConvention`] 映射为转动方向
//! 4. 按 [`VelocityTiers`] 选速度
//! 5. 方向或速度与当前 jog 不同 → 停止后重新 jog
//! 6. 否则不发命令
//!
//! jog 参数不能在运动中修改，任何变化都需要完整的 stop → jog。

use crate::VelocityTiers;
use polcomp_protocol::{DEFAULT_ACCELERATION, MotorDirection};
use serde::{Deserialize, Serialize};

/// 误差符号到转动方向的映射
///
/// 取决于波片的安装方向，每个轴单独配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionConvention {
    /// `error > 0` → Forward
    #[default]
    PositiveErrorForward,
    /// `error > 0` → Backward
    PositiveErrorBackward,
}

impl DirectionConvention {
    pub fn direction(self, error: f64) -> MotorDirection {
        let forward = match self {
            DirectionConvention::PositiveErrorForward => MotorDirection::Forward,
            DirectionConvention::PositiveErrorBackward => MotorDirection::Backward,
        };
        if error > 0.0 { forward } else { forward.reversed() }
    }
}

/// 控制器记录的电机活动状态
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AxisActivity {
    /// 启动后、命令失败后或人工接管后：状态不可信
    #[default]
    Unknown,
    Idle,
    Jogging {
        direction: MotorDirection,
        velocity: f64,
    },
}

/// 单轴的决策结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisDecision {
    Stop,
    /// 停止后以新参数 jog
    Restart {
        direction: MotorDirection,
        velocity: f64,
    },
    /// 不发送命令
    Hold,
}

/// 单轴配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AxisSettings {
    pub tiers: VelocityTiers,
    /// jog 加速度（°/s²）
    pub acceleration: f64,
    pub convention: DirectionConvention,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            tiers: VelocityTiers::default(),
            acceleration: DEFAULT_ACCELERATION,
            convention: DirectionConvention::default(),
        }
    }
}

/// 单轴决策（纯函数）
pub fn decide(
    current: f64,
    target: f64,
    tiers: &VelocityTiers,
    activity: AxisActivity,
    convention: DirectionConvention,
) -> AxisDecision {
    let error = current - target;
    let Some(velocity) = tiers.select(error.abs()) else {
        return AxisDecision::Stop;
    };

    let direction = convention.direction(error);
    match activity {
        AxisActivity::Jogging {
            direction: active_direction,
            velocity: active_velocity,
        } if active_direction == direction && active_velocity == velocity => AxisDecision::Hold,
        _ => AxisDecision::Restart {
            direction,
            velocity,
        },
    }
}
