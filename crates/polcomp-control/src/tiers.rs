//! 分档速度表
//!
//! 误差越大、速度越高：在阈值严格小于 |误差| 的档位中取阈值最大者的速度。
//! 最小阈值即死区。

use crate::ControlError;
use serde::{Deserialize, Serialize};

/// 一个档位：`|error| > threshold` 时以 `velocity` jog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityTier {
    /// 误差阈值（°）
    pub threshold: f64,
    /// jog 速度（°/s）
    pub velocity: f64,
}

/// 分档速度表（按阈值降序存储）
///
/// TOML 中写作 `[[threshold, velocity], ...]`，顺序任意。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct VelocityTiers {
    tiers: Vec<VelocityTier>,
}

impl VelocityTiers {
    /// 默认档位
    pub const DEFAULT: [(f64, f64); 4] = [(5.0, 25.0), (2.5, 15.0), (1.0, 5.0), (0.075, 0.5)];

    pub fn new(tiers: impl IntoIterator<Item = (f64, f64)>) -> Result<Self, ControlError> {
        let mut tiers: Vec<VelocityTier> = tiers
            .into_iter()
            .map(|(threshold, velocity)| VelocityTier {
                threshold,
                velocity,
            })
            .collect();

        if tiers.is_empty() {
            return Err(ControlError::InvalidTiers("at least one tier is required".to_string()));
        }
        for tier in &tiers {
            if !(tier.threshold.is_finite() && tier.threshold > 0.0) {
                return Err(ControlError::InvalidTiers(format!(
                    "threshold must be positive, got {}",
                    tier.threshold
                )));
            }
            if !(tier.velocity.is_finite() && tier.velocity > 0.0) {
                return Err(ControlError::InvalidTiers(format!(
                    "velocity must be positive, got {}",
                    tier.velocity
                )));
            }
        }

        tiers.sort_by(|a, b| b.threshold.total_cmp(&a.threshold));
        if tiers.windows(2).any(|w| w[0].threshold == w[1].threshold) {
            return Err(ControlError::InvalidTiers("duplicate thresholds".to_string()));
        }
        Ok(Self { tiers })
    }

    /// 死区（最小阈值）
    pub fn dead_band(&self) -> f64 {
        self.tiers.last().map_or(0.0, |tier| tier.threshold)
    }

    /// 选择 `|error|` 对应的速度；死区内返回 `None`
    pub fn select(&self, abs_error: f64) -> Option<f64> {
        self.tiers
            .iter()
            .find(|tier| abs_error > tier.threshold)
            .map(|tier| tier.velocity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VelocityTier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for VelocityTiers {
    fn default() -> Self {
        Self {
            tiers: Self::DEFAULT
                .iter()
                .map(|&(threshold, velocity)| VelocityTier {
                    threshold,
                    velocity,
                })
                .collect(),
        }
    }
}

impl TryFrom<Vec<(f64, f64)>> for VelocityTiers {
    type Error = ControlError;

    fn try_from(tiers: Vec<(f64, f64)>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<VelocityTiers> for Vec<(f64, f64)> {
    fn from(tiers: VelocityTiers) -> Self {
        tiers.tiers.into_iter().map(|t| (t.threshold, t.velocity)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selection() {
        let tiers = VelocityTiers::default();
        assert_eq!(tiers.select(100.0), Some(25.0));
        assert_eq!(tiers.select(3.0), Some(15.0));
        assert_eq!(tiers.select(1.5), Some(5.0));
        assert_eq!(tiers.select(0.5), Some(0.5));
        assert_eq!(tiers.select(0.05), None);
        assert_eq!(tiers.dead_band(), 0.075);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let tiers = VelocityTiers::default();
        // 恰好等于阈值时落入下一档
        assert_eq!(tiers.select(5.0), Some(15.0));
        assert_eq!(tiers.select(0.075), None);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let shuffled =
            VelocityTiers::new([(0.075, 0.5), (5.0, 25.0), (1.0, 5.0), (2.5, 15.0)]).unwrap();
        assert_eq!(shuffled, VelocityTiers::default());
        assert_eq!(VelocityTiers::new(VelocityTiers::DEFAULT).unwrap(), VelocityTiers::default());
    }

    #[test]
    fn test_validation() {
        assert!(VelocityTiers::new([]).is_err());
        assert!(VelocityTiers::new([(0.0, 1.0)]).is_err());
        assert!(VelocityTiers::new([(1.0, -1.0)]).is_err());
        assert!(VelocityTiers::new([(f64::NAN, 1.0)]).is_err());
        assert!(VelocityTiers::new([(1.0, 2.0), (1.0, 3.0)]).is_err());
    }
}
