//! # 补偿配置
//!
//! TOML 文件，所有字段可省略（使用默认值）：
//!
//! ```toml
//! motor_server = "127.0.0.1:5002"
//! measurement_server = "127.0.0.1:5003"
//! measurement_framing = "json"
//! qwp_serial = "55353314"
//! hwp_serial = "55356974"
//! frequency_hz = 10.0
//!
//! [setpoint]
//! target_azimuth = 0.0
//! target_ellipticity = 0.0
//!
//! [azimuth]
//! tiers = [[5.0, 25.0], [2.5, 15.0], [1.0, 5.0], [0.075, 0.5]]
//! acceleration = 20.0
//! convention = "positive_error_forward"
//! ```

use crate::{AxisSettings, ControlError, ControlSetpoint, LoopConfig};
use polcomp_client::ClientConfig;
use polcomp_protocol::ChannelMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 测量服务的帧格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementFraming {
    /// 行分隔 JSON（偏振计和时间标签器都支持）
    #[default]
    Json,
    /// 长度前缀二进制（仅时间标签器）
    Binary,
}

/// 补偿配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompensationConfig {
    /// 电机服务地址
    pub motor_server: String,
    /// 测量服务地址
    pub measurement_server: String,
    pub measurement_framing: MeasurementFraming,
    /// 期望的测量设备序列号（`None` 时使用服务端第一台设备）
    pub measurement_serial: Option<String>,
    /// 补偿方位角的 QWP 电机
    pub qwp_serial: String,
    /// 补偿椭圆度的 HWP 电机
    pub hwp_serial: String,
    /// 控制频率（Hz）
    pub frequency_hz: f64,
    /// 网络超时（ms）
    pub timeout_ms: u64,

    pub setpoint: ControlSetpoint,
    pub channel_map: ChannelMap,
    pub azimuth: AxisSettings,
    pub ellipticity: AxisSettings,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            motor_server: "127.0.0.1:5002".to_string(),
            measurement_server: "127.0.0.1:5003".to_string(),
            measurement_framing: MeasurementFraming::default(),
            measurement_serial: None,
            qwp_serial: "55353314".to_string(),
            hwp_serial: "55356974".to_string(),
            frequency_hz: 10.0,
            timeout_ms: 5000,
            setpoint: ControlSetpoint::default(),
            channel_map: ChannelMap::default(),
            azimuth: AxisSettings::default(),
            ellipticity: AxisSettings::default(),
        }
    }
}

impl CompensationConfig {
    /// 从文件加载并校验
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ControlError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 保存到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ControlError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ControlError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ControlError> {
        let config: CompensationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ControlError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 校验取值范围（档位表在反序列化时已校验）
    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(ControlError::Config(format!(
                "frequency_hz must be positive, got {}",
                self.frequency_hz
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ControlError::Config("timeout_ms must be positive".to_string()));
        }
        for (name, settings) in [("azimuth", &self.azimuth), ("ellipticity", &self.ellipticity)] {
            if !(settings.acceleration.is_finite() && settings.acceleration > 0.0) {
                return Err(ControlError::Config(format!(
                    "{}.acceleration must be positive, got {}",
                    name, settings.acceleration
                )));
            }
        }
        if !(self.setpoint.target_azimuth.is_finite() && self.setpoint.target_ellipticity.is_finite())
        {
            return Err(ControlError::Config("setpoint must be finite".to_string()));
        }
        if self.qwp_serial.is_empty() || self.hwp_serial.is_empty() {
            return Err(ControlError::Config("motor serial numbers must not be empty".to_string()));
        }
        if self.qwp_serial == self.hwp_serial {
            return Err(ControlError::Config(format!(
                "qwp_serial and hwp_serial must differ (both {})",
                self.qwp_serial
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn loop_config(&self, max_iterations: Option<usize>) -> LoopConfig {
        LoopConfig {
            frequency_hz: self.frequency_hz,
            max_iterations,
        }
    }

    pub fn motor_client_config(&self) -> ClientConfig {
        ClientConfig::new(self.motor_server.clone()).with_timeout(self.timeout())
    }

    pub fn measurement_client_config(&self) -> ClientConfig {
        ClientConfig::new(self.measurement_server.clone()).with_timeout(self.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectionConvention, VelocityTiers};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CompensationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.azimuth.tiers, VelocityTiers::default());
        assert_eq!(config.azimuth.acceleration, 20.0);
        assert_eq!(config.channel_map, ChannelMap::BAND_780);
        assert_eq!(config.loop_config(None).period().unwrap(), Duration::from_millis(100));
        assert_eq!(config.motor_client_config().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file() {
        let config = CompensationConfig::from_toml_str(
            r#"
            motor_server = "10.0.0.5:5002"
            measurement_framing = "binary"

            [setpoint]
            target_azimuth = 12.5

            [ellipticity]
            tiers = [[0.1, 1.0], [10.0, 50.0]]
            convention = "positive_error_backward"
            "#,
        )
        .unwrap();

        assert_eq!(config.motor_server, "10.0.0.5:5002");
        assert_eq!(config.measurement_server, "127.0.0.1:5003");
        assert_eq!(config.measurement_framing, MeasurementFraming::Binary);
        assert_eq!(config.setpoint.target_azimuth, 12.5);
        assert!(config.setpoint.enabled);
        assert_eq!(config.ellipticity.convention, DirectionConvention::PositiveErrorBackward);
        assert_eq!(config.ellipticity.tiers.select(20.0), Some(50.0));
        assert_eq!(config.ellipticity.tiers.dead_band(), 0.1);
        assert_eq!(config.ellipticity.acceleration, 20.0);
        assert_eq!(config.azimuth, AxisSettings::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            CompensationConfig::from_toml_str("frequency_hz = 0.0"),
            Err(ControlError::Config(_))
        ));
        assert!(matches!(
            CompensationConfig::from_toml_str("qwp_serial = \"1\"\nhwp_serial = \"1\""),
            Err(ControlError::Config(_))
        ));
        // 档位表在反序列化阶段校验
        assert!(matches!(
            CompensationConfig::from_toml_str("[azimuth]\ntiers = []"),
            Err(ControlError::ConfigParse(_))
        ));
        assert!(matches!(
            CompensationConfig::from_toml_str("unknown_key = 1"),
            Err(ControlError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compensation.toml");

        let mut config = CompensationConfig::default();
        config.hwp_serial = "27000001".to_string();
        config.setpoint.target_ellipticity = -3.0;
        config.measurement_serial = Some("TT-001".to_string());
        config.azimuth.tiers = VelocityTiers::new([(1.0, 2.0), (0.5, 1.0)]).unwrap();
        config.save_to_file(&path).unwrap();

        let loaded = CompensationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_written_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frequency_hz = 4.0").unwrap();
        writeln!(file, "timeout_ms = 250").unwrap();

        let config = CompensationConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.frequency_hz, 4.0);
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CompensationConfig::load_from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ControlError::ConfigIo { .. })));
    }
}
