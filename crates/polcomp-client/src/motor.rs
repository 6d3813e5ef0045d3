//! 远程电机客户端
//!
//! - `move_by` / `move_to` 同步：发送命令后轮询 `get_position`，直到停止、超时或被取消
//! - `jog` 立即返回：后台轮询线程持续刷新缓存的状态快照
//! - `stop` 发送停止命令，并在返回前停止且 join 轮询线程

use crate::poll::{CancelToken, deadline_after, poll_until};
use crate::{ClientConfig, ClientError, JsonTransport};
use arc_swap::ArcSwap;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use polcomp_driver::estimate_duration;
use polcomp_protocol::json::Request;
use polcomp_protocol::{DeviceInfo, MotorDirection, MotorStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 列出服务端的全部电机
pub fn list_motors(config: &ClientConfig) -> Result<Vec<DeviceInfo>, ClientError> {
    JsonTransport::connect(config.clone())?.list_motors()
}

/// 当前 jog 的方向和速度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveJog {
    pub direction: MotorDirection,
    pub velocity: f64,
}

/// 远程电机
pub struct RemoteMotor {
    info: DeviceInfo,
    transport: Arc<JsonTransport>,
    /// 最近一次 `get_position` 的结果（position 与 moving 成对更新）
    status: Arc<ArcSwap<MotorStatus>>,
    active_jog: Mutex<Option<ActiveJog>>,
    poller: Mutex<Option<StatusPoller>>,
    /// 当前同步运动的取消令牌
    cancel: Mutex<CancelToken>,
}

impl RemoteMotor {
    /// 连接到服务端上序列号为 `serial_number` 的电机
    ///
    /// 服务端没有该电机时返回 [`ClientError::DeviceNotFound`]。
    pub fn connect(config: ClientConfig, serial_number: &str) -> Result<Self, ClientError> {
        let transport = Arc::new(JsonTransport::connect(config)?);
        let info = transport
            .list_motors()?
            .into_iter()
            .find(|motor| motor.serial_number == serial_number)
            .ok_or_else(|| {
                ClientError::DeviceNotFound(format!(
                    "motor {} on {}",
                    serial_number,
                    transport.config().addr
                ))
            })?;
        let status = transport.position(serial_number)?;
        info!("Connected to {} at {}", info, transport.config().addr);

        Ok(Self {
            info,
            transport,
            status: Arc::new(ArcSwap::from_pointee(status)),
            active_jog: Mutex::new(None),
            poller: Mutex::new(None),
            cancel: Mutex::new(CancelToken::new()),
        })
    }

    pub fn serial_number(&self) -> &str {
        &self.info.serial_number
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn config(&self) -> &ClientConfig {
        self.transport.config()
    }

    /// 缓存的状态快照（不访问网络）
    pub fn cached_status(&self) -> MotorStatus {
        **self.status.load()
    }

    /// 查询并缓存最新状态
    pub fn status(&self) -> Result<MotorStatus, ClientError> {
        let status = self.transport.position(self.serial_number())?;
        self.status.store(Arc::new(status));
        Ok(status)
    }

    pub fn position(&self) -> Result<f64, ClientError> {
        Ok(self.status()?.position)
    }

    pub fn active_jog(&self) -> Option<ActiveJog> {
        *self.active_jog.lock()
    }

    /// 后台轮询线程是否在运行
    pub fn is_polling(&self) -> bool {
        self.poller.lock().is_some()
    }

    /// 取消正在进行的同步运动等待（在其他线程调用）
    pub fn cancel_motion(&self) {
        self.cancel.lock().cancel();
    }

    // ------------------------------------------------------------------------
    // Motion
    // ------------------------------------------------------------------------

    /// 相对转动 `angle` 度，等待运动结束后返回最终状态
    pub fn move_by(
        &self,
        angle: f64,
        acceleration: Option<f64>,
        max_velocity: Option<f64>,
    ) -> Result<MotorStatus, ClientError> {
        let cancel = self.arm_cancel();
        if !angle.is_finite() {
            return Err(ClientError::InvalidArgument(format!("angle must be finite, got {}", angle)));
        }
        let request = Request::MoveBy {
            serial_number: self.info.serial_number.clone(),
            angle,
            acceleration,
            max_velocity,
        };
        self.synchronous_move(&cancel, request, angle, acceleration, max_velocity)
    }

    /// 转到绝对位置 `position` 度，等待运动结束后返回最终状态
    pub fn move_to(
        &self,
        position: f64,
        acceleration: Option<f64>,
        max_velocity: Option<f64>,
    ) -> Result<MotorStatus, ClientError> {
        let cancel = self.arm_cancel();
        if !position.is_finite() {
            return Err(ClientError::InvalidArgument(format!(
                "position must be finite, got {}",
                position
            )));
        }
        let distance = position - self.status()?.position;
        let request = Request::MoveTo {
            serial_number: self.info.serial_number.clone(),
            position,
            acceleration,
            max_velocity,
        };
        self.synchronous_move(&cancel, request, distance, acceleration, max_velocity)
    }

    /// 安装新的取消令牌；此后的 `cancel_motion` 作用于本次运动
    fn arm_cancel(&self) -> CancelToken {
        let cancel = CancelToken::new();
        *self.cancel.lock() = cancel.clone();
        cancel
    }

    fn synchronous_move(
        &self,
        cancel: &CancelToken,
        request: Request,
        distance: f64,
        acceleration: Option<f64>,
        max_velocity: Option<f64>,
    ) -> Result<MotorStatus, ClientError> {
        // 同步运动接管电机：停止 jog 轮询
        self.stop_poller();
        *self.active_jog.lock() = None;

        if cancel.is_cancelled() {
            warn!("{} move cancelled before it was sent", self.serial_number());
            if let Err(e) = self.send_stop() {
                warn!("{} stop after cancel failed: {}", self.serial_number(), e);
            }
            return Err(ClientError::Cancelled);
        }

        let cached = self.cached_status();
        let acceleration_used = acceleration.unwrap_or(cached.acceleration);
        let velocity_used = max_velocity.unwrap_or(cached.max_velocity);
        let budget = self
            .config()
            .move_deadline(estimate_duration(distance, acceleration_used, velocity_used));

        self.transport.command(&request)?;
        debug!(
            "{} {} {:.3}°, waiting up to {:?}",
            self.serial_number(),
            request.command_name(),
            distance,
            budget
        );

        let result = poll_until(
            self.config().position_polling,
            deadline_after(budget),
            cancel,
            || {
                let status = self.status()?;
                Ok((!status.moving).then_some(status))
            },
        );

        if let Err(e) = &result
            && matches!(e, ClientError::Cancelled | ClientError::Timeout(_))
        {
            warn!("{} move aborted ({}), stopping motor", self.serial_number(), e);
            if let Err(stop_error) = self.send_stop() {
                warn!("{} stop after abort failed: {}", self.serial_number(), stop_error);
            }
        }
        result
    }

    /// 以恒定速度持续转动，立即返回
    ///
    /// 启动（或保持）后台轮询线程刷新状态快照。
    pub fn jog(
        &self,
        direction: MotorDirection,
        acceleration: Option<f64>,
        max_velocity: Option<f64>,
    ) -> Result<(), ClientError> {
        if direction.is_idle() {
            return Err(ClientError::InvalidArgument(
                "jog requires a forward or backward direction".to_string(),
            ));
        }
        let request = Request::Jog {
            serial_number: self.info.serial_number.clone(),
            direction,
            acceleration,
            max_velocity,
        };
        self.transport.command(&request)?;

        let velocity = max_velocity.unwrap_or(self.cached_status().max_velocity);
        *self.active_jog.lock() = Some(ActiveJog {
            direction,
            velocity,
        });
        self.ensure_poller()
    }

    /// 停止电机
    ///
    /// 无论停止命令是否成功，返回前轮询线程都已退出。
    pub fn stop(&self) -> Result<MotorStatus, ClientError> {
        let sent = self.send_stop();
        self.stop_poller();
        *self.active_jog.lock() = None;
        sent?;
        self.status()
    }

    fn send_stop(&self) -> Result<bool, ClientError> {
        self.transport.command(&Request::Stop {
            serial_number: self.info.serial_number.clone(),
        })
    }

    // ------------------------------------------------------------------------
    // Poller
    // ------------------------------------------------------------------------

    fn ensure_poller(&self) -> Result<(), ClientError> {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(StatusPoller::is_running) {
            return Ok(());
        }
        if let Some(mut finished) = poller.take() {
            finished.stop();
        }
        *poller = Some(StatusPoller::spawn(
            Arc::clone(&self.transport),
            self.info.serial_number.clone(),
            Arc::clone(&self.status),
            self.config().position_polling,
        )?);
        Ok(())
    }

    fn stop_poller(&self) {
        // 先取出再 join，避免持锁等待
        let poller = self.poller.lock().take();
        if let Some(mut poller) = poller {
            poller.stop();
        }
    }
}

impl Drop for RemoteMotor {
    fn drop(&mut self) {
        if self.active_jog.lock().is_some()
            && let Err(e) = self.send_stop()
        {
            warn!("{} stop on drop failed: {}", self.info.serial_number, e);
        }
        self.stop_poller();
    }
}

// ============================================================================
// Status poller
// ============================================================================

/// 后台状态轮询线程
struct StatusPoller {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    fn spawn(
        transport: Arc<JsonTransport>,
        serial_number: String,
        status: Arc<ArcSwap<MotorStatus>>,
        interval: Duration,
    ) -> Result<Self, ClientError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(format!("poll-{}", serial_number))
            .spawn(move || {
                let mut failing = false;
                loop {
                    match transport.position(&serial_number) {
                        Ok(latest) => {
                            if failing {
                                info!("{} status polling recovered", serial_number);
                                failing = false;
                            }
                            status.store(Arc::new(latest));
                        },
                        Err(e) => {
                            if !failing {
                                warn!("{} status polling failed: {}", serial_number, e);
                                failing = true;
                            }
                        },
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Status poller panicked");
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
