//! 客户端配置

use crate::ClientError;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// 按运动曲线估计的等待上限不超过一天
pub const MAX_MOVE_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// 客户端配置
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// 服务地址（`host:port`）
    pub addr: String,

    /// 连接 / 读 / 写超时
    pub timeout: Duration,

    /// 运动中轮询 `get_position` 的间隔
    pub position_polling: Duration,

    /// 同步运动的等待上限；`None` 时按运动曲线估计（×2 再加 `move_timeout_slack`）
    pub move_timeout: Option<Duration>,

    pub move_timeout_slack: Duration,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(5),
            position_polling: Duration::from_millis(100),
            move_timeout: None,
            move_timeout_slack: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_position_polling(mut self, interval: Duration) -> Self {
        self.position_polling = interval;
        self
    }

    pub fn with_move_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.move_timeout = timeout;
        self
    }

    /// 解析服务地址
    pub(crate) fn socket_addrs(&self) -> Result<Vec<SocketAddr>, ClientError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| ClientError::InvalidArgument(format!("address '{}': {}", self.addr, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::InvalidArgument(format!(
                "address '{}' did not resolve",
                self.addr
            )));
        }
        Ok(addrs)
    }

    /// 同步运动的等待上限
    pub(crate) fn move_deadline(&self, estimate: Option<f64>) -> Duration {
        if let Some(timeout) = self.move_timeout {
            return timeout;
        }
        let estimate = estimate.filter(|s| s.is_finite() && *s >= 0.0).unwrap_or(0.0);
        Duration::try_from_secs_f64(estimate * 2.0)
            .unwrap_or(MAX_MOVE_WAIT)
            .min(MAX_MOVE_WAIT)
            .saturating_add(self.move_timeout_slack)
    }
}

impl From<SocketAddr> for ClientConfig {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.to_string())
    }
}
