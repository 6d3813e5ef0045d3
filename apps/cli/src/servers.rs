//! 服务地址参数（所有命令共用）

use clap::Args;
use polcomp_client::ClientConfig;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// 电机服务地址
    #[arg(long, global = true, default_value = "127.0.0.1:5002")]
    pub motor_server: String,

    /// 测量服务地址
    #[arg(long, global = true, default_value = "127.0.0.1:5003")]
    pub measurement_server: String,

    /// 网络超时（ms）
    #[arg(long, global = true, default_value_t = 5000)]
    pub timeout_ms: u64,
}

impl ServerArgs {
    pub fn motor_config(&self) -> ClientConfig {
        ClientConfig::new(self.motor_server.clone())
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }

    pub fn measurement_config(&self) -> ClientConfig {
        ClientConfig::new(self.measurement_server.clone())
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }
}
