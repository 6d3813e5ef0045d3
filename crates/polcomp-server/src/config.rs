//! 服务配置

use polcomp_protocol::{MEASUREMENT_SERVER_PORT, MOTOR_SERVER_PORT};
use std::time::Duration;

/// 服务配置
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,

    /// 监听端口（0 表示由系统分配）
    pub port: u16,

    /// 单连接读超时（`None` 表示一直阻塞，直到对端关闭或服务关闭）
    pub read_timeout: Option<Duration>,

    /// accept 轮询间隔，决定关闭信号的响应延迟
    pub accept_poll_interval: Duration,

    /// START_MEASURING 后推送 RAWDATA 的间隔
    pub stream_interval: Duration,
}

impl ServerConfig {
    /// 电机服务默认配置（0.0.0.0:5002）
    pub fn motor() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: MOTOR_SERVER_PORT,
            read_timeout: None,
            accept_poll_interval: Duration::from_millis(50),
            stream_interval: Duration::from_secs(1),
        }
    }

    /// 测量服务默认配置（0.0.0.0:5003）
    pub fn measurement() -> Self {
        Self {
            port: MEASUREMENT_SERVER_PORT,
            ..Self::motor()
        }
    }

    /// 本地回环、系统分配端口（测试用）
    pub fn loopback() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Self::motor()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_stream_interval(mut self, interval: Duration) -> Self {
        self.stream_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::motor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(ServerConfig::motor().bind_addr(), "0.0.0.0:5002");
        assert_eq!(ServerConfig::measurement().bind_addr(), "0.0.0.0:5003");
        assert_eq!(ServerConfig::default(), ServerConfig::motor());
        assert_eq!(ServerConfig::measurement().stream_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::loopback()
            .with_port(6000)
            .with_stream_interval(Duration::from_millis(20));
        assert_eq!(config.bind_addr(), "127.0.0.1:6000");
        assert_eq!(config.stream_interval, Duration::from_millis(20));
    }
}
