//! # Polcomp Server
//!
//! 每台设备主机上运行的 TCP 服务：
//!
//! ```text
//! DeviceServer (accept 线程)
//!     ↓ 每个连接一个线程（ConnectionTracker 跟踪，关闭时 join）
//! Service::serve
//!     ├─ MotorService        行分隔 JSON，端口 5002
//!     └─ MeasurementService  长度前缀二进制 / JSON，端口 5003
//!         ↓
//! DeviceRegistry → DeviceSlot（每设备一把锁）→ 驱动
//! ```

mod config;
mod connections;
mod error;
pub mod measurement;
pub mod motor;
mod server;

pub use config::ServerConfig;
pub use connections::ConnectionTracker;
pub use error::ServerError;
pub use measurement::MeasurementService;
pub use motor::MotorService;
pub use server::{Connection, DeviceServer, ServerHandle, Service, ShutdownSignal};
