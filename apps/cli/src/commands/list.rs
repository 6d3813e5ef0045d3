//! 设备列表命令

use crate::servers::ServerArgs;
use anyhow::Result;
use clap::Args;
use polcomp_client::{JsonMeasurementClient, list_motors};
use tracing::warn;

/// 设备列表命令参数
#[derive(Args, Debug)]
pub struct ListCommand {
    /// 只列出电机
    #[arg(long)]
    pub motors_only: bool,
}

impl ListCommand {
    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        let motors = list_motors(&servers.motor_config())?;
        println!("🔧 电机（{}）:", servers.motor_server);
        for motor in &motors {
            println!("  {}", motor);
        }

        if self.motors_only {
            return Ok(());
        }

        // 测量服务可能未运行：只警告
        match JsonMeasurementClient::connect(servers.measurement_config(), None)
            .and_then(|client| client.list_devices())
        {
            Ok(devices) => {
                println!("📡 测量设备（{}）:", servers.measurement_server);
                for device in &devices {
                    println!("  {}", device);
                }
            },
            Err(e) => warn!("Measurement server {} unavailable: {}", servers.measurement_server, e),
        }
        Ok(())
    }
}
