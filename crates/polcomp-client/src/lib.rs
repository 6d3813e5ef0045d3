//! # Polcomp Client
//!
//! 远程设备客户端：
//!
//! ```text
//! RemoteMotor ──┐
//!               ├─ JsonTransport（持久 TCP 会话，失败后自动重连）
//! JsonMeasurementClient ┘
//! BinaryMeasurementClient ── 长度前缀二进制帧
//! ```
//!
//! 所有等待都有上限（[`poll::poll_until`]），并且可以通过 [`CancelToken`] 取消。

mod config;
mod error;
pub mod measurement;
pub mod motor;
pub mod poll;
mod transport;

pub use config::{ClientConfig, MAX_MOVE_WAIT};
pub use error::ClientError;
pub use measurement::{BinaryMeasurementClient, JsonMeasurementClient, NetworkDelay};
pub use motor::{ActiveJog, RemoteMotor, list_motors};
pub use poll::CancelToken;
pub use transport::JsonTransport;
