//! 远程测量设备客户端
//!
//! - [`BinaryMeasurementClient`]: 长度前缀二进制帧（时间标签器）
//! - [`JsonMeasurementClient`]: JSON 行（可返回 singles 计数的偏振计）

use crate::transport::connect_stream;
use crate::{ClientConfig, ClientError, JsonTransport};
use polcomp_protocol::binary::{self, CommandId, Response as Frame};
use polcomp_protocol::json::{Request, Response};
use polcomp_protocol::{DeviceInfo, RawData, RawMeasurement};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// NETWORK_DELAY 测量结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkDelay {
    /// 请求到响应的往返时间
    pub round_trip: Duration,
    /// 服务端时钟（Unix 时间，秒）
    pub server_time: f64,
}

// ============================================================================
// Binary
// ============================================================================

/// 二进制测量客户端
///
/// 流式测量期间只允许 [`next_streamed`](Self::next_streamed) 和
/// [`stop_measuring`](Self::stop_measuring)。
pub struct BinaryMeasurementClient {
    config: ClientConfig,
    stream: TcpStream,
    info: DeviceInfo,
    streaming: bool,
    /// 帧失步或连接断开后，会话不可再用
    broken: bool,
}

impl BinaryMeasurementClient {
    /// 连接并读取设备信息
    ///
    /// `expected_serial` 给出时，服务端设备序列号不一致返回 [`ClientError::DeviceNotFound`]。
    pub fn connect(config: ClientConfig, expected_serial: Option<&str>) -> Result<Self, ClientError> {
        let stream = connect_stream(&config)?;
        let mut client = Self {
            config,
            stream,
            info: DeviceInfo::new("", "", "", ""),
            streaming: false,
            broken: false,
        };
        client.info = client.refresh_device_info()?;

        if let Some(expected) = expected_serial
            && client.info.serial_number != expected
        {
            return Err(ClientError::DeviceNotFound(format!(
                "{} on {} (server has {})",
                expected, client.config.addr, client.info.serial_number
            )));
        }
        info!("Connected to {} at {}", client.info, client.config.addr);
        Ok(client)
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// 重新查询设备信息
    pub fn refresh_device_info(&mut self) -> Result<DeviceInfo, ClientError> {
        match self.exchange(CommandId::ListDevices)? {
            Frame::DeviceInfo(info) => {
                self.info = info.clone();
                Ok(info)
            },
            other => Err(unexpected("LIST_DEVICES", other)),
        }
    }

    /// 单次测量
    pub fn measure_once(&mut self) -> Result<RawData, ClientError> {
        match self.exchange(CommandId::MeasureOnce)? {
            Frame::RawData(data) => Ok(data),
            other => Err(unexpected("MEASURE_ONCE", other)),
        }
    }

    /// 测量往返时间，并读取服务端时钟
    pub fn network_delay(&mut self) -> Result<NetworkDelay, ClientError> {
        let start = Instant::now();
        match self.exchange(CommandId::NetworkDelay)? {
            Frame::Time(server_time) => Ok(NetworkDelay {
                round_trip: start.elapsed(),
                server_time,
            }),
            other => Err(unexpected("NETWORK_DELAY", other)),
        }
    }

    /// 开始流式测量
    pub fn start_measuring(&mut self) -> Result<(), ClientError> {
        match self.exchange(CommandId::StartMeasuring)? {
            Frame::Status(status) => {
                debug!("{}: {}", self.config.addr, status);
                self.streaming = true;
                Ok(())
            },
            other => Err(unexpected("START_MEASURING", other)),
        }
    }

    /// 读取下一帧流式数据
    pub fn next_streamed(&mut self) -> Result<RawData, ClientError> {
        if !self.streaming {
            return Err(ClientError::InvalidArgument("not streaming".to_string()));
        }
        match self.read_frame()? {
            Frame::RawData(data) => Ok(data),
            Frame::Error(message) => Err(ClientError::Remote(message)),
            other => Err(unexpected("START_MEASURING", other)),
        }
    }

    /// 停止流式测量
    ///
    /// 丢弃停止确认之前仍在途的 RAWDATA 帧。
    pub fn stop_measuring(&mut self) -> Result<(), ClientError> {
        self.send(CommandId::StopMeasuring)?;
        let mut discarded = 0usize;
        let result = loop {
            match self.read_frame() {
                Ok(Frame::RawData(_)) => discarded += 1,
                Ok(Frame::Status(status)) => {
                    debug!("{}: {} ({} frames discarded)", self.config.addr, status, discarded);
                    break Ok(());
                },
                Ok(Frame::Error(message)) => break Err(ClientError::Remote(message)),
                Ok(other) => break Err(unexpected("STOP_MEASURING", other)),
                Err(e) => break Err(e),
            }
        };
        self.streaming = false;
        result
    }

    /// 单次测量（[`RawMeasurement`] 形式）
    pub fn measure(&mut self) -> Result<RawMeasurement, ClientError> {
        Ok(RawMeasurement::Timetags(self.measure_once()?))
    }

    fn exchange(&mut self, command: CommandId) -> Result<Frame, ClientError> {
        if self.streaming {
            return Err(ClientError::InvalidArgument(format!(
                "{:?} not allowed while streaming",
                command
            )));
        }
        self.send(command)?;
        match self.read_frame()? {
            Frame::Error(message) => Err(ClientError::Remote(message)),
            frame => Ok(frame),
        }
    }

    fn send(&mut self, command: CommandId) -> Result<(), ClientError> {
        self.check_usable()?;
        let result = binary::write_command(&mut self.stream, command);
        result.map_err(|e| self.fail(e.into()))
    }

    fn read_frame(&mut self) -> Result<Frame, ClientError> {
        self.check_usable()?;
        let result = binary::read_response(&mut self.stream);
        result.map_err(|e| self.fail(e.into()))
    }

    fn check_usable(&self) -> Result<(), ClientError> {
        if self.broken {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }

    fn fail(&mut self, error: ClientError) -> ClientError {
        if error.breaks_session() {
            warn!("{} session broken: {}", self.config.addr, error);
            self.broken = true;
            self.streaming = false;
        }
        error
    }
}

fn unexpected(command: &'static str, frame: Frame) -> ClientError {
    match frame {
        Frame::Error(message) => ClientError::Remote(message),
        other => ClientError::unexpected(command, other),
    }
}

// ============================================================================
// JSON
// ============================================================================

/// JSON 测量客户端
pub struct JsonMeasurementClient {
    transport: JsonTransport,
    info: DeviceInfo,
}

impl JsonMeasurementClient {
    /// 连接并读取设备列表（取第一台设备）
    pub fn connect(config: ClientConfig, expected_serial: Option<&str>) -> Result<Self, ClientError> {
        let transport = JsonTransport::connect(config)?;
        let devices = transport.list_devices()?;
        let info = match expected_serial {
            Some(expected) => devices.into_iter().find(|d| d.serial_number == expected),
            None => devices.into_iter().next(),
        }
        .ok_or_else(|| {
            ClientError::DeviceNotFound(format!(
                "{} on {}",
                expected_serial.unwrap_or("measurement device"),
                transport.config().addr
            ))
        })?;
        info!("Connected to {} at {}", info, transport.config().addr);
        Ok(Self { transport, info })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, ClientError> {
        self.transport.list_devices()
    }

    pub fn measure(&self) -> Result<RawMeasurement, ClientError> {
        match self.transport.request(&Request::Measure)? {
            Response::RawData { rawdata } => Ok(rawdata),
            other => Err(ClientError::unexpected("measure", other)),
        }
    }
}
