//! # Polcomp Device Server
//!
//! 在设备主机上运行的 TCP 服务（模拟设备）。
//!
//! ```bash
//! # 电机服务：两台旋转台，HWP 初始位置 45°
//! polcomp-device-server motor --motor 55353314 --motor 55356974=45
//!
//! # 测量服务：模拟偏振计（方位角 3°，椭圆度 -1.5°）
//! polcomp-device-server measurement --detector polarimeter --azimuth 3 --ellipticity -1.5
//! ```
//!
//! 日志级别由 `RUST_LOG` 控制。

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use polcomp_driver::simulated::{SimulatedMotor, SimulatedPolarimeter, SimulatedTimetagger};
use polcomp_driver::{MeasurementRegistry, MotorRegistry};
use polcomp_protocol::{ChannelMap, MEASUREMENT_SERVER_PORT, MOTOR_SERVER_PORT};
use polcomp_server::{
    DeviceServer, MeasurementService, MotorService, ServerConfig, ServerHandle, Service,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 偏振补偿设备服务
#[derive(Parser, Debug)]
#[command(name = "polcomp-device-server")]
#[command(about = "Motor / measurement TCP servers backed by simulated devices", long_about = None)]
#[command(version)]
struct Cli {
    /// 监听地址
    #[arg(long, default_value = "0.0.0.0", global = true)]
    host: String,

    #[command(subcommand)]
    device: DeviceCommand,
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// 电机服务（行分隔 JSON）
    Motor {
        #[arg(short, long, default_value_t = MOTOR_SERVER_PORT)]
        port: u16,

        /// 模拟电机，可重复
        #[arg(
            long = "motor",
            value_name = "SERIAL[=POSITION]",
            default_values = ["55353314", "55356974"]
        )]
        motors: Vec<String>,
    },

    /// 测量服务（长度前缀二进制 / JSON）
    Measurement {
        #[arg(short, long, default_value_t = MEASUREMENT_SERVER_PORT)]
        port: u16,

        #[arg(long, value_enum, default_value_t = DetectorKind::Timetagger)]
        detector: DetectorKind,

        /// 设备序列号
        #[arg(long, default_value = "TT-001")]
        serial: String,

        /// 偏振计输出的方位角（°）
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        azimuth: f64,

        /// 偏振计输出的椭圆度（°）
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        ellipticity: f64,

        /// 偏振计相对噪声
        #[arg(long, default_value_t = 0.0)]
        noise: f64,

        /// 时间标签器每次测量的事件数
        #[arg(long, default_value_t = 1000)]
        events: usize,

        /// 使用 1550 nm 通道布局（默认 780 nm）
        #[arg(long)]
        band_1550: bool,

        /// START_MEASURING 后的推送间隔（ms）
        #[arg(long, default_value_t = 1000)]
        stream_interval_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DetectorKind {
    Polarimeter,
    Timetagger,
}

/// 解析 `SERIAL[=POSITION]`
fn parse_motor(arg: &str) -> Result<(String, f64)> {
    let (serial, position) = match arg.split_once('=') {
        Some((serial, position)) => {
            let position: f64 = position
                .trim()
                .parse()
                .with_context(|| format!("invalid position in '{}'", arg))?;
            (serial.trim(), position)
        },
        None => (arg.trim(), 0.0),
    };
    if serial.is_empty() {
        bail!("empty serial number in '{}'", arg);
    }
    if !position.is_finite() {
        bail!("position must be finite in '{}'", arg);
    }
    Ok((serial.to_string(), position))
}

fn spawn<S: Service>(config: ServerConfig, service: S) -> Result<ServerHandle> {
    let bind_addr = config.bind_addr();
    let handle = DeviceServer::bind(config, service)
        .with_context(|| format!("failed to bind {}", bind_addr))?
        .spawn()?;
    Ok(handle)
}

fn start(cli: Cli) -> Result<ServerHandle> {
    match cli.device {
        DeviceCommand::Motor { port, motors } => {
            let mut registry = MotorRegistry::new();
            for arg in &motors {
                let (serial, position) = parse_motor(arg)?;
                info!("Simulated motor {} at {:.3}°", serial, position);
                registry.register(Box::new(SimulatedMotor::new(serial).with_position(position)))?;
            }
            let config = ServerConfig::motor().with_host(cli.host).with_port(port);
            spawn(config, MotorService::new(Arc::new(registry)))
        },

        DeviceCommand::Measurement {
            port,
            detector,
            serial,
            azimuth,
            ellipticity,
            noise,
            events,
            band_1550,
            stream_interval_ms,
        } => {
            let channel_map = if band_1550 {
                ChannelMap::BAND_1550
            } else {
                ChannelMap::BAND_780
            };
            let mut registry = MeasurementRegistry::new();
            match detector {
                DetectorKind::Polarimeter => {
                    info!(
                        "Simulated polarimeter {}: azimuth {:.3}°, ellipticity {:.3}°",
                        serial, azimuth, ellipticity
                    );
                    registry.register(Box::new(
                        SimulatedPolarimeter::fixed(serial, azimuth, ellipticity)
                            .with_channel_map(channel_map)
                            .with_noise(noise),
                    ))?;
                },
                DetectorKind::Timetagger => {
                    info!("Simulated time tagger {}: {} events per measurement", serial, events);
                    let channels = u8::try_from(channel_map.channel_count()).unwrap_or(u8::MAX);
                    registry.register(Box::new(
                        SimulatedTimetagger::new(serial)
                            .with_events(events)
                            .with_channels(channels),
                    ))?;
                },
            }
            let config = ServerConfig::measurement()
                .with_host(cli.host)
                .with_port(port)
                .with_stream_interval(Duration::from_millis(stream_interval_ms));
            spawn(config, MeasurementService::new(Arc::new(registry)))
        },
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("polcomp_server=info".parse()?)
                .add_directive("polcomp_device_server=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let handle = start(cli)?;

    let signal = handle.shutdown_signal();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Shutting down...");
        signal.trigger();
    })
    .context("failed to set signal handler")?;

    info!("Listening on {}. Press Ctrl+C to stop.", handle.local_addr());
    handle.wait();
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_motor() {
        assert_eq!(parse_motor("55353314").unwrap(), ("55353314".to_string(), 0.0));
        assert_eq!(parse_motor("55356974=45").unwrap(), ("55356974".to_string(), 45.0));
        assert_eq!(parse_motor("1=-12.5").unwrap(), ("1".to_string(), -12.5));
        assert!(parse_motor("=3").is_err());
        assert!(parse_motor("1=abc").is_err());
        assert!(parse_motor("1=inf").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["polcomp-device-server", "motor"]).unwrap();
        assert_eq!(cli.host, "0.0.0.0");
        match cli.device {
            DeviceCommand::Motor { port, motors } => {
                assert_eq!(port, 5002);
                assert_eq!(motors, vec!["55353314", "55356974"]);
            },
            other => panic!("Expected motor command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_measurement() {
        let cli = Cli::try_parse_from([
            "polcomp-device-server",
            "measurement",
            "--detector",
            "polarimeter",
            "--ellipticity",
            "-1.5",
            "--host",
            "127.0.0.1",
        ])
        .unwrap();
        assert_eq!(cli.host, "127.0.0.1");
        match cli.device {
            DeviceCommand::Measurement {
                port,
                detector,
                ellipticity,
                ..
            } => {
                assert_eq!(port, 5003);
                assert_eq!(detector, DetectorKind::Polarimeter);
                assert_eq!(ellipticity, -1.5);
            },
            other => panic!("Expected measurement command, got {:?}", other),
        }
    }

    #[test]
    fn test_start_motor_server_on_loopback() {
        let cli = Cli::try_parse_from([
            "polcomp-device-server",
            "--host",
            "127.0.0.1",
            "motor",
            "--port",
            "0",
            "--motor",
            "A=1",
        ])
        .unwrap();
        let handle = start(cli).unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.shutdown();
    }
}
