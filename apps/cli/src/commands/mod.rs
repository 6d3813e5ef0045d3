//! 命令定义和实现

pub mod compensate;
pub mod config;
pub mod jog;
pub mod list;
pub mod measure;
pub mod r#move;
pub mod position;
pub mod stop;

pub use compensate::CompensateCommand;
pub use config::ConfigCommand;
pub use jog::JogCommand;
pub use list::ListCommand;
pub use measure::{DelayCommand, MeasureCommand};
pub use r#move::MoveCommand;
pub use position::PositionCommand;
pub use stop::StopCommand;

use polcomp_protocol::MotorStatus;

/// 打印电机状态
pub(crate) fn print_status(serial_number: &str, status: &MotorStatus) {
    println!("  {}", serial_number);
    println!("    位置:   {:.3}°", status.position);
    println!(
        "    状态:   {}",
        if status.moving { "运动中" } else { "静止" }
    );
    println!("    方向:   {}", status.direction);
    println!(
        "    参数:   加速度 {:.1}°/s², 最大速度 {:.1}°/s",
        status.acceleration, status.max_velocity
    );
}
