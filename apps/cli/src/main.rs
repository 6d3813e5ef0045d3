//! # Polcomp CLI
//!
//! 偏振补偿测试台的命令行工具。每条命令独立连接服务、执行、断开。
//!
//! ```bash
//! # 列出电机和测量设备
//! polcomp-cli list
//!
//! # 同步移动（等待运动结束）
//! polcomp-cli move 55353314 10 --relative
//!
//! # jog 5 秒后停止（Ctrl+C 提前停止）
//! polcomp-cli jog 55356974 backward --velocity 5 --duration 5
//!
//! # 运行补偿闭环
//! polcomp-cli config init compensation.toml
//! polcomp-cli compensate --config compensation.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod servers;

use commands::{
    CompensateCommand, ConfigCommand, DelayCommand, JogCommand, ListCommand, MeasureCommand,
    MoveCommand, PositionCommand, StopCommand,
};
use servers::ServerArgs;

/// Polcomp CLI - 偏振补偿命令行工具
#[derive(Parser, Debug)]
#[command(name = "polcomp-cli")]
#[command(about = "Command-line interface for the polarisation compensation test-bed", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    servers: ServerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出电机和测量设备
    List {
        #[command(flatten)]
        args: ListCommand,
    },

    /// 查询电机状态
    Position {
        #[command(flatten)]
        args: PositionCommand,
    },

    /// 同步移动电机（绝对或相对）
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 以恒定速度转动电机
    Jog {
        #[command(flatten)]
        args: JogCommand,
    },

    /// 停止电机
    Stop {
        #[command(flatten)]
        args: StopCommand,
    },

    /// 采集一次测量并计算偏振态
    Measure {
        #[command(flatten)]
        args: MeasureCommand,
    },

    /// 测量网络往返延迟
    Delay {
        #[command(flatten)]
        args: DelayCommand,
    },

    /// 运行偏振补偿闭环
    Compensate {
        #[command(flatten)]
        args: CompensateCommand,
    },

    /// 补偿配置文件管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("polcomp_cli=info".parse()?)
                .add_directive("polcomp_control=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let servers = &cli.servers;

    match cli.command {
        Commands::List { args } => args.execute(servers),
        Commands::Position { args } => args.execute(servers),
        Commands::Move { args } => args.execute(servers),
        Commands::Jog { args } => args.execute(servers),
        Commands::Stop { args } => args.execute(servers),
        Commands::Measure { args } => args.execute(servers),
        Commands::Delay { args } => args.execute(servers),
        Commands::Compensate { args } => args.execute(servers),
        Commands::Config(cmd) => cmd.execute(),
    }
}
