//! 测量服务（偏振计 / 时间标签器）
//!
//! 同一端口同时支持两种帧格式，按连接的第一个字节区分：
//! - `{`：行分隔 JSON（`list_devices`、`measure`）
//! - 其他：长度前缀二进制（4 字节命令 ID）
//!
//! 二进制连接上 START_MEASURING 启动一个推送线程，按固定间隔发送 RAWDATA，
//! 直到 STOP_MEASURING 或连接关闭；推送线程在连接关闭前一定被 join。

use crate::{Connection, ServerError, Service};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use polcomp_driver::{DeviceSlot, DriverError, MeasurementDriver, MeasurementRegistry};
use polcomp_protocol::ProtocolError;
use polcomp_protocol::RawMeasurement;
use polcomp_protocol::binary::{self, CommandId, Response as Frame};
use polcomp_protocol::json::{self, LineReader, Request, Response};
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

type SharedWriter = Arc<Mutex<TcpStream>>;
type MeasurementSlot = Arc<DeviceSlot<dyn MeasurementDriver>>;

/// 测量服务
pub struct MeasurementService {
    registry: Arc<MeasurementRegistry>,
}

impl MeasurementService {
    pub fn new(registry: Arc<MeasurementRegistry>) -> Self {
        Self { registry }
    }

    fn device(&self) -> Result<MeasurementSlot, DriverError> {
        self.registry
            .first()
            .ok_or_else(|| DriverError::DeviceNotFound("no measurement device registered".into()))
    }

    fn measure(&self) -> Result<RawMeasurement, DriverError> {
        self.device()?.try_with(|device| device.measure())
    }

    // ------------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------------

    /// 分派一个 JSON 请求
    pub fn dispatch_json(&self, request: Request) -> Response {
        let result = match request {
            Request::ListDevices => Ok(Response::Devices {
                devices: self.registry.list(),
            }),
            Request::Measure => self.measure().map(|rawdata| Response::RawData { rawdata }),
            other => Ok(Response::error(format!(
                "Command '{}' is not supported by the measurement server",
                other.command_name()
            ))),
        };
        result.unwrap_or_else(|e| Response::error(e.to_string()))
    }

    fn serve_json(&self, id: u64, stream: TcpStream) -> Result<(), ServerError> {
        let mut writer = stream.try_clone()?;
        let mut reader = LineReader::new(BufReader::new(stream));
        loop {
            let response = match reader.read_line() {
                Ok(Some(line)) => match json::parse_request(&line) {
                    Ok(request) => self.dispatch_json(request),
                    Err(e) => Response::error(e.to_string()),
                },
                Ok(None) => return Ok(()),
                Err(e) if !e.is_fatal() => Response::error(e.to_string()),
                Err(e) => return Err(e.into()),
            };
            debug!("#{} json -> {}", id, if response.is_error() { "error" } else { "ok" });
            json::write_message(&mut writer, &response)?;
        }
    }

    // ------------------------------------------------------------------------
    // Binary
    // ------------------------------------------------------------------------

    /// 一次测量的 RAWDATA 帧（singles 设备无法以 RAWDATA 表示，返回 ERROR）
    fn measurement_frame(slot: &MeasurementSlot) -> Frame {
        match slot.try_with(|device| device.measure()) {
            Ok(RawMeasurement::Timetags(data)) => Frame::RawData(data),
            Ok(RawMeasurement::Singles(_)) => Frame::Error(
                "Device reports singles counts; use the JSON 'measure' command".to_string(),
            ),
            Err(e) => Frame::Error(e.to_string()),
        }
    }

    fn handle_command(
        &self,
        command: CommandId,
        writer: &SharedWriter,
        streamer: &mut Option<Streamer>,
        connection: &Connection,
    ) -> Result<(), ProtocolError> {
        let frame = match command {
            CommandId::NetworkDelay => Frame::time_now(),
            CommandId::ListDevices => match self.device() {
                Ok(slot) => Frame::DeviceInfo(slot.info().clone()),
                Err(e) => Frame::Error(e.to_string()),
            },
            CommandId::MeasureOnce => match self.device() {
                Ok(slot) => Self::measurement_frame(&slot),
                Err(e) => Frame::Error(e.to_string()),
            },
            CommandId::StartMeasuring => {
                if streamer.as_ref().is_some_and(Streamer::is_running) {
                    Frame::Status("already measuring".to_string())
                } else {
                    let slot = match self.device() {
                        Ok(slot) => slot,
                        Err(e) => return write_frame(writer, &Frame::Error(e.to_string())),
                    };
                    // 持锁启动推送线程并写 STATUS：保证 STATUS 先于第一帧 RAWDATA
                    let mut guard = writer.lock();
                    let started = Streamer::spawn(
                        slot,
                        Arc::clone(writer),
                        connection.config.stream_interval,
                        connection.id,
                    );
                    let frame = match started {
                        Ok(new_streamer) => {
                            if let Some(mut old) = streamer.replace(new_streamer) {
                                old.stop();
                            }
                            Frame::Status("started measuring".to_string())
                        },
                        Err(e) => Frame::Error(format!("Failed to start measuring: {}", e)),
                    };
                    return binary::write_response(&mut *guard, &frame);
                }
            },
            CommandId::StopMeasuring => match streamer.take() {
                Some(mut running) => {
                    // join 之后不会再有 RAWDATA 帧
                    running.stop();
                    Frame::Status("stopped measuring".to_string())
                },
                None => Frame::Status("not measuring".to_string()),
            },
        };
        write_frame(writer, &frame)
    }

    fn serve_binary(&self, connection: &Connection) -> Result<(), ServerError> {
        let mut reader = connection.stream.try_clone()?;
        let writer: SharedWriter = Arc::new(Mutex::new(connection.stream.try_clone()?));
        let mut streamer: Option<Streamer> = None;

        let result = loop {
            let raw = match binary::read_command(&mut reader) {
                Ok(Some(raw)) => raw,
                Ok(None) => break Ok(()),
                Err(e) => break Err(ServerError::from(e)),
            };

            let outcome = match binary::decode_command(raw) {
                Ok(command) => {
                    debug!("#{} command {:?}", connection.id, command);
                    self.handle_command(command, &writer, &mut streamer, connection)
                },
                Err(e) => {
                    // 未知命令：返回 ERROR，连接保持
                    warn!("#{} {}", connection.id, e);
                    write_frame(&writer, &Frame::Error(e.to_string()))
                },
            };
            if let Err(e) = outcome {
                break Err(ServerError::from(e));
            }
        };

        if let Some(mut running) = streamer.take() {
            running.stop();
        }
        result
    }
}

fn write_frame(writer: &SharedWriter, frame: &Frame) -> Result<(), ProtocolError> {
    binary::write_response(&mut *writer.lock(), frame)
}

impl Service for MeasurementService {
    fn name(&self) -> &'static str {
        "measurement-server"
    }

    fn serve(&self, connection: Connection) -> Result<(), ServerError> {
        let mut first = [0u8; 1];
        if connection.stream.peek(&mut first)? == 0 {
            return Ok(());
        }

        if first[0] == b'{' {
            info!("#{} using JSON framing", connection.id);
            let stream = connection.stream.try_clone()?;
            self.serve_json(connection.id, stream)
        } else {
            info!("#{} using binary framing", connection.id);
            self.serve_binary(&connection)
        }
    }

    fn on_shutdown(&self) {
        self.registry.disconnect_all();
    }
}

// ============================================================================
// Streamer
// ============================================================================

/// RAWDATA 推送线程
struct Streamer {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Streamer {
    fn spawn(
        slot: MeasurementSlot,
        writer: SharedWriter,
        interval: Duration,
        connection_id: u64,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(format!("measurement-stream-{}", connection_id))
            .spawn(move || {
                loop {
                    let frame = MeasurementService::measurement_frame(&slot);
                    if let Err(e) = write_frame(&writer, &frame) {
                        warn!("#{} streaming stopped: {}", connection_id, e);
                        break;
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

    /// 通知并等待推送线程退出
    fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Streaming thread panicked");
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polcomp_driver::simulated::{SimulatedPolarimeter, SimulatedTimetagger};

    fn service_with(device: Box<dyn MeasurementDriver>) -> MeasurementService {
        let mut registry = MeasurementRegistry::new();
        registry.register(device).unwrap();
        MeasurementService::new(Arc::new(registry))
    }

    #[test]
    fn test_json_list_devices() {
        let service = service_with(Box::new(SimulatedTimetagger::new("TT1")));
        match service.dispatch_json(Request::ListDevices) {
            Response::Devices { devices } => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].serial_number, "TT1");
            },
            other => panic!("Expected devices, got {:?}", other),
        }
    }

    #[test]
    fn test_json_measure_singles() {
        let service = service_with(Box::new(SimulatedPolarimeter::fixed("P1", 0.0, 0.0)));
        match service.dispatch_json(Request::Measure) {
            Response::RawData {
                rawdata: RawMeasurement::Singles(counts),
            } => assert_eq!(counts.len(), 8),
            other => panic!("Expected singles, got {:?}", other),
        }
    }

    #[test]
    fn test_json_rejects_motor_commands() {
        let service = service_with(Box::new(SimulatedTimetagger::new("TT1")));
        assert!(service.dispatch_json(Request::ListMotors).is_error());
    }

    #[test]
    fn test_empty_registry() {
        let service = MeasurementService::new(Arc::new(MeasurementRegistry::new()));
        assert!(service.dispatch_json(Request::Measure).is_error());
        // 列表命令在空注册表上返回空列表
        assert_eq!(
            service.dispatch_json(Request::ListDevices),
            Response::Devices { devices: vec![] }
        );
    }

    #[test]
    fn test_measurement_frame_for_singles_device() {
        let mut registry = MeasurementRegistry::new();
        let slot = registry
            .register(Box::new(SimulatedPolarimeter::fixed("P1", 0.0, 0.0)))
            .unwrap();
        assert!(matches!(
            MeasurementService::measurement_frame(&slot),
            Frame::Error(_)
        ));
    }
}
