//! 运动曲线估计
//!
//! 旋转台按梯形速度曲线运动：以恒定加速度加速到最大速度、匀速、再对称减速。
//! 若距离不足以达到最大速度，则退化为三角形曲线。
//!
//! 估计值只用于确定客户端等待运动完成的时长，不影响运动本身。

/// 估计转过 `angle` 度所需的时间（秒）
///
/// 输入单位为度、°/s²、°/s，内部换算为弧度计算。
/// 加速度或速度非正、或任一参数非有限值时返回 `None`。
pub fn estimate_duration(angle: f64, acceleration: f64, max_velocity: f64) -> Option<f64> {
    MotionProfile::new(angle, acceleration, max_velocity).map(|profile| profile.duration())
}

/// 单次移动的速度曲线（距离取绝对值）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    distance: f64,
    acceleration: f64,
    /// 实际达到的峰值速度（三角形曲线时小于最大速度）
    peak_velocity: f64,
    accel_time: f64,
    cruise_time: f64,
    triangular: bool,
}

impl MotionProfile {
    pub fn new(angle: f64, acceleration: f64, max_velocity: f64) -> Option<Self> {
        if !angle.is_finite()
            || !(acceleration.is_finite() && acceleration > 0.0)
            || !(max_velocity.is_finite() && max_velocity > 0.0)
        {
            return None;
        }

        let distance = angle.abs().to_radians();
        let acceleration = acceleration.to_radians();
        let max_velocity = max_velocity.to_radians();

        let t_accel = max_velocity / acceleration;
        let angle_accel = 0.5 * acceleration * t_accel * t_accel;
        let angle_cruise = distance - 2.0 * angle_accel;

        let profile = if angle_cruise < 0.0 {
            // 三角形：达不到最大速度
            let accel_time = (distance / acceleration).sqrt();
            Self {
                distance,
                acceleration,
                peak_velocity: acceleration * accel_time,
                accel_time,
                cruise_time: 0.0,
                triangular: true,
            }
        } else {
            Self {
                distance,
                acceleration,
                peak_velocity: max_velocity,
                accel_time: t_accel,
                cruise_time: angle_cruise / max_velocity,
                triangular: false,
            }
        };
        Some(profile)
    }

    /// 总时长（秒）
    pub fn duration(&self) -> f64 {
        2.0 * self.accel_time + self.cruise_time
    }

    /// 是否为三角形曲线
    pub fn is_triangular(&self) -> bool {
        self.triangular
    }

    /// 开始运动 `t` 秒后已转过的角度（度，非负）
    pub fn displacement(&self, t: f64) -> f64 {
        let total = self.duration();
        let radians = if t <= 0.0 {
            0.0
        } else if t < self.accel_time {
            0.5 * self.acceleration * t * t
        } else if t < self.accel_time + self.cruise_time {
            0.5 * self.acceleration * self.accel_time * self.accel_time
                + self.peak_velocity * (t - self.accel_time)
        } else if t < total {
            let remaining = total - t;
            self.distance - 0.5 * self.acceleration * remaining * remaining
        } else {
            self.distance
        };
        radians.to_degrees()
    }
}
