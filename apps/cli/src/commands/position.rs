//! 电机状态查询命令

use super::print_status;
use crate::servers::ServerArgs;
use anyhow::Result;
use clap::Args;
use polcomp_client::RemoteMotor;

/// 状态查询命令参数
#[derive(Args, Debug)]
pub struct PositionCommand {
    /// 电机序列号
    pub serial: String,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl PositionCommand {
    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        let motor = RemoteMotor::connect(servers.motor_config(), &self.serial)?;
        let status = motor.status()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            print_status(motor.serial_number(), &status);
        }
        Ok(())
    }
}
