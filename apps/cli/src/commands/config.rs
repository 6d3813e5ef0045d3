//! 配置管理命令
//!
//! 生成、查看补偿配置文件（TOML）。

use anyhow::{Result, bail};
use clap::Subcommand;
use polcomp_control::CompensationConfig;
use std::path::{Path, PathBuf};

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 生成默认配置文件
    Init {
        /// 输出路径
        path: PathBuf,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },

    /// 校验并显示配置（包括默认值）
    Show {
        /// 配置文件路径
        path: PathBuf,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Init { path, force } => {
                init(&path, force)?;
                println!("✅ 已生成默认配置: {}", path.display());
            },
            ConfigCommand::Show { path } => {
                let config = CompensationConfig::load_from_file(&path)?;
                println!("# {}", path.display());
                print!("{}", config.to_toml_string()?);
            },
        }
        Ok(())
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} 已存在，使用 --force 覆盖", path.display());
    }
    CompensationConfig::default().save_to_file(path)?;
    Ok(())
}
