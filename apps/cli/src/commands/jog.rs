//! jog 命令
//!
//! 以恒定速度转动，直到 `--duration` 到期或 Ctrl+C，然后停止。

use super::print_status;
use crate::servers::ServerArgs;
use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use polcomp_client::RemoteMotor;
use polcomp_protocol::MotorDirection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum JogDirection {
    Forward,
    Backward,
}

impl From<JogDirection> for MotorDirection {
    fn from(direction: JogDirection) -> Self {
        match direction {
            JogDirection::Forward => MotorDirection::Forward,
            JogDirection::Backward => MotorDirection::Backward,
        }
    }
}

/// jog 命令参数
#[derive(Args, Debug)]
pub struct JogCommand {
    /// 电机序列号
    pub serial: String,

    #[arg(value_enum)]
    pub direction: JogDirection,

    /// 加速度（°/s²）
    #[arg(long)]
    pub acceleration: Option<f64>,

    /// 速度（°/s）
    #[arg(long)]
    pub velocity: Option<f64>,

    /// 持续时间（秒），省略时一直转动到 Ctrl+C
    #[arg(short, long)]
    pub duration: Option<f64>,
}

impl JogCommand {
    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        if let Some(duration) = self.duration
            && !(duration.is_finite() && duration > 0.0)
        {
            bail!("duration 必须为正数，当前为 {}", duration);
        }

        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = Arc::clone(&interrupted);
            ctrlc::set_handler(move || interrupted.store(true, Ordering::Release))
                .context("failed to set signal handler")?;
        }

        let motor = RemoteMotor::connect(servers.motor_config(), &self.serial)?;
        motor.jog(self.direction.into(), self.acceleration, self.velocity)?;
        println!("🔄 {} 开始 jog（{}），Ctrl+C 停止", self.serial, MotorDirection::from(self.direction));

        let start = Instant::now();
        let deadline = self.duration.map(|d| start + Duration::from_secs_f64(d));
        let mut last_report = start;
        while !interrupted.load(Ordering::Acquire) && deadline.is_none_or(|d| Instant::now() < d) {
            thread::sleep(Duration::from_millis(50));
            if last_report.elapsed() >= Duration::from_secs(1) {
                println!("  位置 {:.3}°", motor.cached_status().position);
                last_report = Instant::now();
            }
        }

        let status = motor.stop()?;
        println!("🛑 已停止（{:.1} s）", start.elapsed().as_secs_f64());
        print_status(motor.serial_number(), &status);
        Ok(())
    }
}
