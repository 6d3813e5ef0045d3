//! 停止命令

use super::print_status;
use crate::servers::ServerArgs;
use anyhow::Result;
use clap::Args;
use polcomp_client::{RemoteMotor, list_motors};

/// 停止命令参数
#[derive(Args, Debug)]
pub struct StopCommand {
    /// 电机序列号（省略时停止全部电机）
    pub serial: Option<String>,
}

impl StopCommand {
    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        let serials = match &self.serial {
            Some(serial) => vec![serial.clone()],
            None => list_motors(&servers.motor_config())?
                .into_iter()
                .map(|info| info.serial_number)
                .collect(),
        };

        println!("🛑 停止 {} 台电机...", serials.len());
        for serial in &serials {
            let motor = RemoteMotor::connect(servers.motor_config(), serial)?;
            let status = motor.stop()?;
            print_status(motor.serial_number(), &status);
        }
        println!("✅ 停止完成");
        Ok(())
    }
}
