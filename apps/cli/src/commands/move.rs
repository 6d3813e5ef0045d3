//! 同步移动命令
//!
//! 发送 move_to / move_by 后轮询直到电机静止。等待上限按运动曲线估计，
//! 可以用 `--timeout` 覆盖。

use super::print_status;
use crate::servers::ServerArgs;
use anyhow::{Result, bail};
use clap::Args;
use polcomp_client::RemoteMotor;
use std::time::{Duration, Instant};

/// 移动命令参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// 电机序列号
    pub serial: String,

    /// 目标位置（°）；`--relative` 时为相对角度
    #[arg(allow_hyphen_values = true)]
    pub target: f64,

    /// 相对移动
    #[arg(short, long)]
    pub relative: bool,

    /// 加速度（°/s²，默认沿用电机当前设置）
    #[arg(long)]
    pub acceleration: Option<f64>,

    /// 最大速度（°/s，默认沿用电机当前设置）
    #[arg(long)]
    pub velocity: Option<f64>,

    /// 等待上限（秒）
    #[arg(long)]
    pub timeout: Option<f64>,
}

impl MoveCommand {
    pub fn validate(&self) -> Result<()> {
        if !self.target.is_finite() {
            bail!("目标位置必须是有限数");
        }
        for (name, value) in [("acceleration", self.acceleration), ("velocity", self.velocity)] {
            if let Some(value) = value
                && !(value.is_finite() && value > 0.0)
            {
                bail!("{} 必须为正数，当前为 {}", name, value);
            }
        }
        if let Some(timeout) = self.timeout
            && !(timeout.is_finite() && timeout > 0.0)
        {
            bail!("timeout 必须为正数，当前为 {}", timeout);
        }
        Ok(())
    }

    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        self.validate()?;

        let config = servers
            .motor_config()
            .with_move_timeout(self.timeout.map(Duration::from_secs_f64));
        let motor = RemoteMotor::connect(config, &self.serial)?;

        let start = Instant::now();
        let status = if self.relative {
            println!("🔄 {} 相对移动 {:.3}°...", self.serial, self.target);
            motor.move_by(self.target, self.acceleration, self.velocity)?
        } else {
            println!("🔄 {} 移动到 {:.3}°...", self.serial, self.target);
            motor.move_to(self.target, self.acceleration, self.velocity)?
        };

        println!("✅ 移动完成（{:.2} s）", start.elapsed().as_secs_f64());
        print_status(motor.serial_number(), &status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(target: f64) -> MoveCommand {
        MoveCommand {
            serial: "55353314".to_string(),
            target,
            relative: false,
            acceleration: None,
            velocity: None,
            timeout: None,
        }
    }

    #[test]
    fn test_validate() {
        assert!(command(10.0).validate().is_ok());
        assert!(command(f64::NAN).validate().is_err());

        let mut cmd = command(10.0);
        cmd.velocity = Some(0.0);
        assert!(cmd.validate().is_err());

        let mut cmd = command(10.0);
        cmd.timeout = Some(-1.0);
        assert!(cmd.validate().is_err());
    }
}
