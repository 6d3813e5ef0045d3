//! 偏振态计算
//!
//! 由各偏振基的计数得到归一化 Stokes 分量：
//!
//! ```text
//! s1 = (H − V) / (H + V)
//! s2 = (D − A) / (D + A)
//! s3 = (R − L) / (R + L)
//! ```
//!
//! 某一对通道未分配或计数和为 0 时该分量无定义；三个分量中只要有两个有定义，
//! 第三个按单位球补全为 `sqrt(max(0, 1 − a² − b²))`。
//!
//! ```text
//! η = asin(s3) / 2
//! θ = acos(s1 / cos 2η) / 2
//! ```
//!
//! 实测 s2 为负时 θ 取负号（补全的 s2 恒非负，无法区分 ±θ）。

use polcomp_protocol::{ChannelMap, RawMeasurement};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 偏振读数无法使用
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlStateError {
    /// 有定义的 Stokes 分量少于两个
    #[error("Undefined Stokes vector: only {defined} of 3 components measurable")]
    UndefinedStokes { defined: usize },

    #[error("Non-finite polarization value")]
    NonFinite,
}

/// 一次测量得到的偏振态
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarizationData {
    /// 方位角（°）
    pub azimuth: f64,
    /// 椭圆度（°）
    pub ellipticity: f64,
    pub normalized_s1: f64,
    pub normalized_s2: f64,
    pub normalized_s3: f64,
}

impl PolarizationData {
    /// 从一次原始测量计算
    pub fn from_measurement(
        measurement: &RawMeasurement,
        channel_map: &ChannelMap,
    ) -> Result<Self, ControlStateError> {
        let counts = measurement.channel_counts(channel_map.channel_count());
        Self::from_counts(&counts, channel_map)
    }

    /// 从每通道计数计算
    pub fn from_counts(counts: &[u64], channel_map: &ChannelMap) -> Result<Self, ControlStateError> {
        Self::from_stokes(
            ratio(counts, channel_map.h, channel_map.v),
            ratio(counts, channel_map.d, channel_map.a),
            ratio(counts, channel_map.r, channel_map.l),
        )
    }

    /// 从（部分）Stokes 分量计算
    pub fn from_stokes(
        s1: Option<f64>,
        s2: Option<f64>,
        s3: Option<f64>,
    ) -> Result<Self, ControlStateError> {
        let measured_s2 = s2;
        let (s1, s2, s3) = match (s1, s2, s3) {
            (Some(s1), Some(s2), Some(s3)) => (s1, s2, s3),
            (Some(s1), None, Some(s3)) => (s1, complete(s1, s3), s3),
            (None, Some(s2), Some(s3)) => (complete(s2, s3), s2, s3),
            (Some(s1), Some(s2), None) => (s1, s2, complete(s1, s2)),
            other => {
                let defined = [other.0, other.1, other.2].iter().flatten().count();
                return Err(ControlStateError::UndefinedStokes { defined });
            },
        };
        if !(s1.is_finite() && s2.is_finite() && s3.is_finite()) {
            return Err(ControlStateError::NonFinite);
        }

        let eta = s3.clamp(-1.0, 1.0).asin() / 2.0;
        let cos_2eta = (2.0 * eta).cos();
        let mut theta = if cos_2eta.abs() < f64::EPSILON {
            // 圆偏振：方位角无意义
            0.0
        } else {
            (s1 / cos_2eta).clamp(-1.0, 1.0).acos() / 2.0
        };
        if measured_s2.is_some_and(|s2| s2 < 0.0) {
            theta = -theta;
        }

        Ok(Self {
            azimuth: theta.to_degrees(),
            ellipticity: eta.to_degrees(),
            normalized_s1: s1,
            normalized_s2: s2,
            normalized_s3: s3,
        })
    }
}

fn ratio(counts: &[u64], plus: Option<u8>, minus: Option<u8>) -> Option<f64> {
    let plus = *counts.get(usize::from(plus?))? as f64;
    let minus = *counts.get(usize::from(minus?))? as f64;
    let total = plus + minus;
    if total == 0.0 {
        return None;
    }
    Some((plus - minus) / total)
}

fn complete(a: f64, b: f64) -> f64 {
    (1.0 - a * a - b * b).max(0.0).sqrt()
}
