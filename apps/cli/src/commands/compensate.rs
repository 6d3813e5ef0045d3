//! 补偿闭环命令
//!
//! 加载配置、连接两台电机和测量设备，运行到 Ctrl+C 或达到迭代次数。
//! 退出时两台电机都会被停止。

use crate::servers::ServerArgs;
use anyhow::{Context, Result};
use clap::Args;
use polcomp_client::{BinaryMeasurementClient, JsonMeasurementClient, RemoteMotor};
use polcomp_control::{
    CompensationConfig, MeasurementFraming, MeasurementSource, PolarizationController,
    run_compensation,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// 补偿命令参数
#[derive(Args, Debug)]
pub struct CompensateCommand {
    /// 配置文件（TOML），省略时使用默认配置和命令行服务地址
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 目标方位角（°，覆盖配置）
    #[arg(long, allow_hyphen_values = true)]
    pub target_azimuth: Option<f64>,

    /// 目标椭圆度（°，覆盖配置）
    #[arg(long, allow_hyphen_values = true)]
    pub target_ellipticity: Option<f64>,

    /// 最大迭代次数
    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,
}

impl CompensateCommand {
    /// 合并配置文件与命令行参数
    pub fn resolve_config(&self, servers: &ServerArgs) -> Result<CompensationConfig> {
        let mut config = match &self.config {
            Some(path) => CompensationConfig::load_from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => CompensationConfig {
                motor_server: servers.motor_server.clone(),
                measurement_server: servers.measurement_server.clone(),
                timeout_ms: servers.timeout_ms,
                ..CompensationConfig::default()
            },
        };
        if let Some(azimuth) = self.target_azimuth {
            config.setpoint.target_azimuth = azimuth;
        }
        if let Some(ellipticity) = self.target_ellipticity {
            config.setpoint.target_ellipticity = ellipticity;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn execute(&self, servers: &ServerArgs) -> Result<()> {
        let config = self.resolve_config(servers)?;

        let stop = Arc::new(AtomicBool::new(false));
        {
            let stop = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                eprintln!("\nReceived interrupt signal. Stopping compensation...");
                stop.store(true, Ordering::Release);
            })
            .context("failed to set signal handler")?;
        }

        println!("🔌 连接电机 {}...", config.motor_server);
        let qwp = RemoteMotor::connect(config.motor_client_config(), &config.qwp_serial)?;
        let hwp = RemoteMotor::connect(config.motor_client_config(), &config.hwp_serial)?;

        println!(
            "🔌 连接测量设备 {}（{:?}）...",
            config.measurement_server, config.measurement_framing
        );
        let expected = config.measurement_serial.as_deref();
        let mut source: Box<dyn MeasurementSource> = match config.measurement_framing {
            MeasurementFraming::Json => Box::new(JsonMeasurementClient::connect(
                config.measurement_client_config(),
                expected,
            )?),
            MeasurementFraming::Binary => Box::new(BinaryMeasurementClient::connect(
                config.measurement_client_config(),
                expected,
            )?),
        };

        let mut controller = PolarizationController::new(
            qwp,
            hwp,
            config.azimuth.clone(),
            config.ellipticity.clone(),
        )
        .with_setpoint(config.setpoint);
        info!(
            "Target azimuth {:.3}°, ellipticity {:.3}°",
            config.setpoint.target_azimuth, config.setpoint.target_ellipticity
        );

        println!("▶️  补偿运行中，Ctrl+C 停止");
        let summary = run_compensation(
            &mut source,
            &mut controller,
            &config.channel_map,
            &config.loop_config(self.iterations),
            &stop,
        )?;

        println!(
            "✅ 补偿结束：{} 次迭代，{} 条命令，{} 次执行失败，{} 次测量失败",
            summary.iterations, summary.commands, summary.failures, summary.measurement_failures
        );
        Ok(())
    }
}
