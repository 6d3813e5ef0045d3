//! 电机服务（行分隔 JSON）
//!
//! 每个请求先解析为类型化的 [`Request`]，再分派到对应的处理函数。
//! 驱动错误、未知命令、参数错误都以 `{"error": ...}` 响应返回，连接保持；
//! 只有 I/O 错误和致命的帧错误会关闭连接。

use crate::{Connection, ServerError, Service};
use polcomp_driver::{DeviceSlot, DriverError, MotorDriver, MotorRegistry};
use polcomp_protocol::MotorDirection;
use polcomp_protocol::json::{LineReader, Request, Response, parse_request, write_message};
use std::io::BufReader;
use std::sync::Arc;
use tracing::{debug, warn};

/// 电机服务
pub struct MotorService {
    registry: Arc<MotorRegistry>,
}

impl MotorService {
    pub fn new(registry: Arc<MotorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MotorRegistry> {
        &self.registry
    }

    /// 处理一行原始请求
    pub fn handle_line(&self, line: &str) -> Response {
        match parse_request(line) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                debug!("Rejected request {:?}: {}", line, e);
                Response::error(e.to_string())
            },
        }
    }

    /// 分派一个类型化请求
    pub fn dispatch(&self, request: Request) -> Response {
        let command = request.command_name();
        let result = match request {
            Request::ListMotors => Ok(Response::Motors {
                motors: self.registry.list(),
            }),
            Request::GetPosition { serial_number } => self.get_position(&serial_number),
            Request::Stop { serial_number } => self.stop(&serial_number),
            Request::MoveBy {
                serial_number,
                angle,
                acceleration,
                max_velocity,
            } => self.with_motor(&serial_number, |motor| {
                let state = motor.state()?;
                motor.move_by(
                    angle,
                    acceleration.unwrap_or(state.acceleration),
                    max_velocity.unwrap_or(state.max_velocity),
                )?;
                Ok(Response::ack(
                    format!("Moving motor {} by {}", serial_number, angle),
                    motor.is_moving()?,
                ))
            }),
            Request::MoveTo {
                serial_number,
                position,
                acceleration,
                max_velocity,
            } => self.with_motor(&serial_number, |motor| {
                let state = motor.state()?;
                motor.move_to(
                    position,
                    acceleration.unwrap_or(state.acceleration),
                    max_velocity.unwrap_or(state.max_velocity),
                )?;
                Ok(Response::ack(
                    format!("Moving motor {} to {}", serial_number, position),
                    motor.is_moving()?,
                ))
            }),
            Request::Jog {
                serial_number,
                direction,
                acceleration,
                max_velocity,
            } => self.jog(&serial_number, direction, acceleration, max_velocity),
            Request::ListDevices | Request::Measure => Ok(Response::error(format!(
                "Command '{}' is not supported by the motor server",
                command
            ))),
        };

        result.unwrap_or_else(|e| {
            warn!("{} failed: {}", command, e);
            Response::error(e.to_string())
        })
    }

    fn find(&self, serial_number: &str) -> Result<Arc<DeviceSlot<dyn MotorDriver>>, DriverError> {
        self.registry.find(serial_number).map_err(|e| match e {
            DriverError::DeviceNotFound(serial) => {
                DriverError::DeviceNotFound(format!("motor {}", serial))
            },
            other => other,
        })
    }

    /// 在电机锁内执行一次处理，驱动 panic 以错误响应返回
    fn with_motor(
        &self,
        serial_number: &str,
        f: impl FnOnce(&mut (dyn MotorDriver + 'static)) -> Result<Response, DriverError>,
    ) -> Result<Response, DriverError> {
        let slot = self.find(serial_number)?;
        slot.try_with(f)
    }

    fn get_position(&self, serial_number: &str) -> Result<Response, DriverError> {
        // 一次 state() 调用：position 与 moving 来自同一快照
        self.with_motor(serial_number, |motor| Ok(Response::Position(motor.state()?.status())))
    }

    fn stop(&self, serial_number: &str) -> Result<Response, DriverError> {
        self.with_motor(serial_number, |motor| {
            motor.stop()?;
            Ok(Response::ack(
                format!("Stopping {}", serial_number),
                motor.is_moving()?,
            ))
        })
    }

    fn jog(
        &self,
        serial_number: &str,
        direction: MotorDirection,
        acceleration: Option<f64>,
        max_velocity: Option<f64>,
    ) -> Result<Response, DriverError> {
        if direction.is_idle() {
            return Err(DriverError::InvalidArgument(
                "jog requires direction '+' or '-'".to_string(),
            ));
        }
        self.with_motor(serial_number, |motor| {
            let state = motor.state()?;
            motor.jog(
                direction,
                acceleration.unwrap_or(state.acceleration),
                max_velocity.unwrap_or(state.max_velocity),
            )?;
            Ok(Response::ack(
                format!("Jogging motor {}", serial_number),
                motor.is_moving()?,
            ))
        })
    }
}

impl Service for MotorService {
    fn name(&self) -> &'static str {
        "motor-server"
    }

    fn serve(&self, connection: Connection) -> Result<(), ServerError> {
        let Connection { id, stream, .. } = connection;
        let mut writer = stream.try_clone()?;
        let mut reader = LineReader::new(BufReader::new(stream));

        loop {
            let line = match reader.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(e) if !e.is_fatal() => {
                    write_message(&mut writer, &Response::error(e.to_string()))?;
                    continue;
                },
                Err(e) => {
                    // 帧失步：尽力告知对端后关闭连接
                    let _ = write_message(&mut writer, &Response::error(e.to_string()));
                    return Err(e.into());
                },
            };

            let response = self.handle_line(&line);
            debug!("#{} {} -> {:?}", id, line, response);
            write_message(&mut writer, &response)?;
        }
    }

    fn on_shutdown(&self) {
        for slot in self.registry.iter() {
            if let Err(e) = slot.try_with(|motor| motor.stop()) {
                warn!("Failed to stop motor {} on shutdown: {}", slot.serial_number(), e);
            }
        }
        self.registry.disconnect_all();
    }
}
