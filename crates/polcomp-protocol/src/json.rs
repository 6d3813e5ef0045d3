//! 行分隔 JSON 协议
//!
//! 每个请求和响应都是一个 UTF-8 JSON 对象，以 `\n` 结尾。
//! 紧凑格式的 `serde_json` 输出不含未转义的换行符，因此换行可以直接作为消息边界。
//!
//! 请求格式：`{"command": "<name>", ...参数}`

use crate::{DeviceInfo, MotorDirection, MotorStatus, ProtocolError, RawMeasurement};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Read, Write};

/// 单行消息长度上限（字节，不含换行符）
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// 所有已知命令名
pub const COMMAND_NAMES: &[&str] = &[
    "list_motors",
    "list_devices",
    "get_position",
    "move_by",
    "move_to",
    "jog",
    "stop",
    "measure",
];

// ============================================================================
// Request
// ============================================================================

/// 类型化请求
///
/// 省略的 `acceleration` / `max_velocity` 由服务端使用电机当前设置补齐。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    ListMotors,
    ListDevices,
    GetPosition {
        serial_number: String,
    },
    MoveBy {
        serial_number: String,
        angle: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        acceleration: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_velocity: Option<f64>,
    },
    MoveTo {
        serial_number: String,
        position: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        acceleration: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_velocity: Option<f64>,
    },
    Jog {
        serial_number: String,
        #[serde(default)]
        direction: MotorDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        acceleration: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_velocity: Option<f64>,
    },
    Stop {
        serial_number: String,
    },
    Measure,
}

impl Request {
    /// 线协议命令名
    pub fn command_name(&self) -> &'static str {
        match self {
            Request::ListMotors => "list_motors",
            Request::ListDevices => "list_devices",
            Request::GetPosition { .. } => "get_position",
            Request::MoveBy { .. } => "move_by",
            Request::MoveTo { .. } => "move_to",
            Request::Jog { .. } => "jog",
            Request::Stop { .. } => "stop",
            Request::Measure => "measure",
        }
    }

    /// 请求针对的设备序列号（列表类命令为 `None`）
    pub fn serial_number(&self) -> Option<&str> {
        match self {
            Request::GetPosition { serial_number }
            | Request::MoveBy { serial_number, .. }
            | Request::MoveTo { serial_number, .. }
            | Request::Jog { serial_number, .. }
            | Request::Stop { serial_number } => Some(serial_number),
            Request::ListMotors | Request::ListDevices | Request::Measure => None,
        }
    }
}

/// 解析一行请求
///
/// 区分三类错误：JSON 语法错误、未知命令名、参数错误。三者都不是致命错误。
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let command = value
        .get("command")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingCommand)?
        .to_string();

    if !COMMAND_NAMES.contains(&command.as_str()) {
        return Err(ProtocolError::UnknownCommand(command));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidArguments {
        command,
        reason: e.to_string(),
    })
}

// ============================================================================
// Response
// ============================================================================

/// 响应
///
/// 各变体通过各自独有的字段区分（`untagged`）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error { error: String },
    Motors { motors: Vec<DeviceInfo> },
    Devices { devices: Vec<DeviceInfo> },
    RawData { rawdata: RawMeasurement },
    Ack { status: String, moving: bool },
    Position(MotorStatus),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn ack(status: impl Into<String>, moving: bool) -> Self {
        Response::Ack {
            status: status.into(),
            moving,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

// ============================================================================
// Line Codec
// ============================================================================

/// 编码一条消息（含结尾换行符）
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes =
        serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// 编码并写出一条消息
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let bytes = encode_line(message)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// 解析一行响应
pub fn parse_response(line: &str) -> Result<Response, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::MalformedJson(e.to_string()))
}

/// 按行读取消息
///
/// 阻塞直到读到完整的一行；空行被跳过。
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(256),
        }
    }

    /// 读取下一行
    ///
    /// # 返回
    /// - `Ok(Some(line))`: 一条完整消息（不含换行符）
    /// - `Ok(None)`: 对端在消息边界处关闭连接
    /// - `Err(FrameTooLarge)`: 单行超过 [`MAX_LINE_LEN`]（致命）
    pub fn read_line(&mut self) -> Result<Option<String>, ProtocolError> {
        loop {
            self.buf.clear();
            let n = (&mut self.inner)
                .take(MAX_LINE_LEN as u64 + 1)
                .read_until(b'\n', &mut self.buf)?;
            if n == 0 {
                return Ok(None);
            }

            let terminated = self.buf.last() == Some(&b'\n');
            if terminated {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
            }
            if self.buf.len() > MAX_LINE_LEN {
                return Err(ProtocolError::FrameTooLarge {
                    len: self.buf.len(),
                    limit: MAX_LINE_LEN,
                });
            }

            let line = std::str::from_utf8(&self.buf)
                .map_err(|_| ProtocolError::MalformedJson("invalid UTF-8".to_string()))?
                .trim();
            if line.is_empty() {
                if !terminated {
                    return Ok(None);
                }
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }

    /// 读取并解析一条响应（连接关闭视为错误）
    pub fn read_response(&mut self) -> Result<Response, ProtocolError> {
        match self.read_line()? {
            Some(line) => parse_response(&line),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}
