//! 共享数据模型
//!
//! 设备信息、电机状态与原始测量数据，服务端、客户端和控制器共用同一套类型。

use crate::ProtocolError;
use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 默认加速度（°/s²）
pub const DEFAULT_ACCELERATION: f64 = 20.0;

/// 默认最大速度（°/s）
pub const DEFAULT_MAX_VELOCITY: f64 = 25.0;

/// 默认步长（°）
pub const DEFAULT_STEP_SIZE: f64 = 5.0;

// ============================================================================
// Device Info
// ============================================================================

/// 设备身份信息
///
/// 由驱动在连接时报告，之后不再修改。JSON 中 `device_name` 作为
/// `manufacturer` 的别名被接受。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(alias = "device_name")]
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
}

impl DeviceInfo {
    pub fn new(
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        serial_number: impl Into<String>,
        firmware_version: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            serial_number: serial_number.into(),
            firmware_version: firmware_version.into(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, FW {})",
            self.manufacturer, self.model, self.serial_number, self.firmware_version
        )
    }
}

// ============================================================================
// Motor Direction
// ============================================================================

/// 电机运动方向
///
/// JSON 表示：`"+"`（正向）、`"-"`（反向）、`null`（静止）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MotorDirection {
    Forward,
    Backward,
    #[default]
    Idle,
}

impl MotorDirection {
    /// 线协议符号（静止时为 `None`）
    pub fn symbol(self) -> Option<&'static str> {
        match self {
            MotorDirection::Forward => Some("+"),
            MotorDirection::Backward => Some("-"),
            MotorDirection::Idle => None,
        }
    }

    /// 方向符号：正向 +1，反向 -1，静止 0
    pub fn signum(self) -> f64 {
        match self {
            MotorDirection::Forward => 1.0,
            MotorDirection::Backward => -1.0,
            MotorDirection::Idle => 0.0,
        }
    }

    /// 反方向（静止的反方向仍为静止）
    pub fn reversed(self) -> Self {
        match self {
            MotorDirection::Forward => MotorDirection::Backward,
            MotorDirection::Backward => MotorDirection::Forward,
            MotorDirection::Idle => MotorDirection::Idle,
        }
    }

    pub fn is_idle(self) -> bool {
        self == MotorDirection::Idle
    }
}

impl fmt::Display for MotorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorDirection::Forward => write!(f, "forward"),
            MotorDirection::Backward => write!(f, "backward"),
            MotorDirection::Idle => write!(f, "idle"),
        }
    }
}

impl Serialize for MotorDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.symbol() {
            Some(symbol) => serializer.serialize_str(symbol),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MotorDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let symbol = Option::<String>::deserialize(deserializer)?;
        match symbol.as_deref() {
            None => Ok(MotorDirection::Idle),
            Some("+") | Some("forward") => Ok(MotorDirection::Forward),
            Some("-") | Some("backward") => Ok(MotorDirection::Backward),
            Some("idle") => Ok(MotorDirection::Idle),
            Some(other) => Err(de::Error::invalid_value(
                Unexpected::Str(other),
                &"\"+\", \"-\" or null",
            )),
        }
    }
}

// ============================================================================
// Motor State
// ============================================================================

/// 电机完整状态快照
///
/// 由驱动在设备锁内一次性生成，`position` 与 `is_moving` 互相一致。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorState {
    /// 当前位置（°）
    pub position: f64,
    pub direction: MotorDirection,
    pub is_moving: bool,
    /// 当前加速度设置（°/s²）
    pub acceleration: f64,
    /// 当前最大速度设置（°/s）
    pub max_velocity: f64,
    /// 步进步长（°）
    pub step_size: f64,
}

impl MotorState {
    /// 静止于给定位置、使用默认参数的状态
    pub fn idle_at(position: f64) -> Self {
        Self {
            position,
            direction: MotorDirection::Idle,
            is_moving: false,
            acceleration: DEFAULT_ACCELERATION,
            max_velocity: DEFAULT_MAX_VELOCITY,
            step_size: DEFAULT_STEP_SIZE,
        }
    }

    /// 转换为 `get_position` 响应体
    pub fn status(&self) -> MotorStatus {
        MotorStatus {
            position: self.position,
            moving: self.is_moving,
            direction: self.direction,
            acceleration: self.acceleration,
            max_velocity: self.max_velocity,
        }
    }
}

/// `get_position` 响应体
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorStatus {
    pub position: f64,
    pub moving: bool,
    #[serde(default)]
    pub direction: MotorDirection,
    pub acceleration: f64,
    pub max_velocity: f64,
}

impl Default for MotorStatus {
    fn default() -> Self {
        MotorState::idle_at(0.0).status()
    }
}

// ============================================================================
// Raw Measurement
// ============================================================================

#[derive(Serialize, Deserialize)]
struct RawDataRepr {
    timetags: Vec<i64>,
    channels: Vec<u8>,
}

/// 时间标签流：每个事件一个时间标签和一个通道号
///
/// 不变量：`timetags.len() == channels.len()`，构造和反序列化时均校验。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawDataRepr", into = "RawDataRepr")]
pub struct RawData {
    timetags: Vec<i64>,
    channels: Vec<u8>,
}

impl RawData {
    pub fn new(timetags: Vec<i64>, channels: Vec<u8>) -> Result<Self, ProtocolError> {
        if timetags.len() != channels.len() {
            return Err(ProtocolError::LengthMismatch {
                timetags: timetags.len(),
                channels: channels.len(),
            });
        }
        Ok(Self { timetags, channels })
    }

    pub fn len(&self) -> usize {
        self.timetags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timetags.is_empty()
    }

    pub fn timetags(&self) -> &[i64] {
        &self.timetags
    }

    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    /// 按事件遍历 (timetag, channel)
    pub fn events(&self) -> impl Iterator<Item = (i64, u8)> + '_ {
        self.timetags.iter().copied().zip(self.channels.iter().copied())
    }

    pub fn into_parts(self) -> (Vec<i64>, Vec<u8>) {
        (self.timetags, self.channels)
    }

    /// 按通道统计事件数（长度至少为 `min_channels`）
    pub fn bincount(&self, min_channels: usize) -> Vec<u64> {
        let len = self
            .channels
            .iter()
            .map(|&c| c as usize + 1)
            .max()
            .unwrap_or(0)
            .max(min_channels);
        let mut counts = vec![0u64; len];
        for &channel in &self.channels {
            counts[channel as usize] += 1;
        }
        counts
    }
}

impl TryFrom<RawDataRepr> for RawData {
    type Error = ProtocolError;

    fn try_from(repr: RawDataRepr) -> Result<Self, Self::Error> {
        RawData::new(repr.timetags, repr.channels)
    }
}

impl From<RawData> for RawDataRepr {
    fn from(data: RawData) -> Self {
        RawDataRepr {
            timetags: data.timetags,
            channels: data.channels,
        }
    }
}

/// 测量设备返回的原始数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMeasurement {
    /// 每通道计数（下标即通道号）
    Singles(Vec<u64>),
    /// 时间标签流
    Timetags(RawData),
}

impl RawMeasurement {
    /// 统一转换为每通道计数（长度至少为 `min_channels`）
    pub fn channel_counts(&self, min_channels: usize) -> Vec<u64> {
        match self {
            RawMeasurement::Singles(counts) => {
                let mut counts = counts.clone();
                if counts.len() < min_channels {
                    counts.resize(min_channels, 0);
                }
                counts
            },
            RawMeasurement::Timetags(data) => data.bincount(min_channels),
        }
    }
}

// ============================================================================
// Channel Map
// ============================================================================

/// 偏振基到探测通道号的映射
///
/// 未接入的基为 `None`，对应的 Stokes 分量视为未定义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub h: Option<u8>,
    pub v: Option<u8>,
    pub d: Option<u8>,
    pub a: Option<u8>,
    pub r: Option<u8>,
    pub l: Option<u8>,
}

impl ChannelMap {
    /// 1550 nm 波段探测器布局
    pub const BAND_1550: ChannelMap = ChannelMap {
        h: Some(0),
        v: Some(1),
        d: None,
        a: None,
        r: Some(2),
        l: Some(3),
    };

    /// 780 nm 波段探测器布局
    pub const BAND_780: ChannelMap = ChannelMap {
        h: Some(4),
        v: Some(5),
        d: None,
        a: None,
        r: Some(6),
        l: Some(7),
    };

    /// 覆盖所有已分配通道所需的最小通道数
    pub fn channel_count(&self) -> usize {
        [self.h, self.v, self.d, self.a, self.r, self.l]
            .into_iter()
            .flatten()
            .map(|c| c as usize + 1)
            .max()
            .unwrap_or(0)
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        ChannelMap::BAND_780
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_direction_json() {
        assert_eq!(serde_json::to_string(&MotorDirection::Forward).unwrap(), "\"+\"");
        assert_eq!(serde_json::to_string(&MotorDirection::Backward).unwrap(), "\"-\"");
        assert_eq!(serde_json::to_string(&MotorDirection::Idle).unwrap(), "null");

        let parsed: MotorDirection = serde_json::from_str("\"-\"").unwrap();
        assert_eq!(parsed, MotorDirection::Backward);
        let parsed: MotorDirection = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, MotorDirection::Idle);

        // 非法符号
        assert!(serde_json::from_str::<MotorDirection>("\"up\"").is_err());
    }

    #[test]
    fn test_motor_direction_helpers() {
        assert_eq!(MotorDirection::Forward.reversed(), MotorDirection::Backward);
        assert_eq!(MotorDirection::Idle.reversed(), MotorDirection::Idle);
        assert_eq!(MotorDirection::Backward.signum(), -1.0);
        assert!(MotorDirection::Idle.is_idle());
    }

    #[test]
    fn test_device_info_accepts_device_name_alias() {
        let json = r#"{"device_name":"Thorlabs","model":"K10CR1","serial_number":"55353314","firmware_version":"1.0"}"#;
        let info: DeviceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.manufacturer, "Thorlabs");
        assert_eq!(info.serial_number, "55353314");
    }

    #[test]
    fn test_motor_status_default_direction() {
        // 缺少 direction 字段时视为静止
        let json = r#"{"position":1.5,"moving":false,"acceleration":20.0,"max_velocity":25.0}"#;
        let status: MotorStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.direction, MotorDirection::Idle);
        assert_eq!(status.position, 1.5);
    }

    #[test]
    fn test_raw_data_length_invariant() {
        assert!(RawData::new(vec![1, 2], vec![0]).is_err());
        let data = RawData::new(vec![1, 2], vec![0, 3]).unwrap();
        assert_eq!(data.len(), 2);

        // 反序列化同样校验长度
        let json = r#"{"timetags":[1,2,3],"channels":[0]}"#;
        assert!(serde_json::from_str::<RawData>(json).is_err());
    }

    #[test]
    fn test_raw_data_bincount() {
        let data = RawData::new(vec![10, 20, 30, 40], vec![4, 5, 4, 7]).unwrap();
        assert_eq!(data.bincount(8), vec![0, 0, 0, 0, 2, 1, 0, 1]);
        // 不足 min_channels 时补零；超出时自动扩展
        assert_eq!(data.bincount(2).len(), 8);
        assert_eq!(RawData::default().bincount(3), vec![0, 0, 0]);
    }

    #[test]
    fn test_channel_map_defaults() {
        let map = ChannelMap::default();
        assert_eq!(map, ChannelMap::BAND_780);
        assert_eq!(map.channel_count(), 8);
        assert_eq!(ChannelMap::BAND_1550.channel_count(), 4);

        // 部分字段缺省时使用默认值
        let map: ChannelMap = serde_json::from_str(r#"{"d":2,"a":3}"#).unwrap();
        assert_eq!(map.h, Some(4));
        assert_eq!(map.d, Some(2));
    }

    #[test]
    fn test_raw_measurement_channel_counts() {
        let singles = RawMeasurement::Singles(vec![5, 6]);
        assert_eq!(singles.channel_counts(4), vec![5, 6, 0, 0]);

        let json = serde_json::to_string(&singles).unwrap();
        assert_eq!(json, r#"{"singles":[5,6]}"#);
    }
}
