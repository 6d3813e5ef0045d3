//! 长度前缀二进制协议（测量遥测）
//!
//! ```text
//! 请求:  [command_id: u32 LE]
//! 响应:  [length: u32 LE = payload_len + 1][type: u8][payload]
//! ```
//!
//! 负载格式：
//! - `DEVICE_INFO`: 4 个 (u32 LE 长度, UTF-8) 字段，顺序为 manufacturer、model、serial、firmware
//! - `RAWDATA`: count (u32 BE) 写两次，N × i64 BE 时间标签，N × u8 通道号
//! - `ERROR` / `STATUS`: (u32 LE 长度, UTF-8)
//! - `TIME`: f64 LE，服务端 Unix 时间（秒）

use crate::{DeviceInfo, ProtocolError, RawData};
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{ErrorKind, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// 帧长度上限（字节，不含 4 字节长度字段）
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// 长度字段 + 类型字节
pub const HEADER_LEN: usize = 5;

// ============================================================================
// Command / Response Type
// ============================================================================

/// 二进制命令 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum CommandId {
    NetworkDelay = 0,
    ListDevices = 1,
    MeasureOnce = 2,
    StartMeasuring = 3,
    StopMeasuring = 4,
}

/// 响应类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ResponseType {
    Error = 0,
    DeviceInfo = 1,
    RawData = 2,
    Status = 3,
    Time = 4,
}

/// 编码命令
pub fn encode_command(command: CommandId) -> [u8; 4] {
    u32::from(command).to_le_bytes()
}

/// 解码原始命令 ID
pub fn decode_command(raw: u32) -> Result<CommandId, ProtocolError> {
    CommandId::try_from(raw).map_err(|_| ProtocolError::UnknownCommandId(raw))
}

// ============================================================================
// Response
// ============================================================================

/// 二进制协议响应
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Error(String),
    DeviceInfo(DeviceInfo),
    RawData(RawData),
    Status(String),
    /// 服务端时钟，Unix 时间（秒）
    Time(f64),
}

impl Response {
    /// 以当前系统时钟构造 `TIME` 响应
    pub fn time_now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Response::Time(secs)
    }

    pub fn response_type(&self) -> ResponseType {
        match self {
            Response::Error(_) => ResponseType::Error,
            Response::DeviceInfo(_) => ResponseType::DeviceInfo,
            Response::RawData(_) => ResponseType::RawData,
            Response::Status(_) => ResponseType::Status,
            Response::Time(_) => ResponseType::Time,
        }
    }

    /// 编码完整的帧（长度字段 + 类型 + 负载）并追加到 `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let start = buf.len();
        buf.put_u32_le(0); // 长度占位，写完负载后回填
        buf.put_u8(self.response_type().into());

        match self {
            Response::Error(message) | Response::Status(message) => {
                put_string(buf, message);
            },
            Response::DeviceInfo(info) => {
                put_string(buf, &info.manufacturer);
                put_string(buf, &info.model);
                put_string(buf, &info.serial_number);
                put_string(buf, &info.firmware_version);
            },
            Response::RawData(data) => {
                let count = u32::try_from(data.len()).map_err(|_| ProtocolError::FrameTooLarge {
                    len: data.len(),
                    limit: MAX_FRAME_LEN,
                })?;
                // 计数写两次（线格式要求）
                buf.put_u32(count);
                buf.put_u32(count);
                buf.reserve(data.len() * 9);
                for &timetag in data.timetags() {
                    buf.put_i64(timetag);
                }
                buf.put_slice(data.channels());
            },
            Response::Time(secs) => {
                buf.put_f64_le(*secs);
            },
        }

        let frame_len = buf.len() - start - 4;
        if frame_len > MAX_FRAME_LEN {
            buf.truncate(start);
            return Err(ProtocolError::FrameTooLarge {
                len: frame_len,
                limit: MAX_FRAME_LEN,
            });
        }
        buf[start..start + 4].copy_from_slice(&(frame_len as u32).to_le_bytes());
        Ok(())
    }

    /// 编码为独立的字节序列
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// 按类型标签解码负载（不含长度字段和类型字节）
    pub fn decode_payload(response_type: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let response_type = ResponseType::try_from(response_type)
            .map_err(|_| ProtocolError::UnknownResponseType(response_type))?;
        let mut buf = payload;

        let response = match response_type {
            ResponseType::Error => Response::Error(get_string(&mut buf, "error")?),
            ResponseType::Status => Response::Status(get_string(&mut buf, "status")?),
            ResponseType::DeviceInfo => Response::DeviceInfo(DeviceInfo {
                manufacturer: get_string(&mut buf, "manufacturer")?,
                model: get_string(&mut buf, "model")?,
                serial_number: get_string(&mut buf, "serial_number")?,
                firmware_version: get_string(&mut buf, "firmware_version")?,
            }),
            ResponseType::RawData => Response::RawData(decode_raw_data(&mut buf)?),
            ResponseType::Time => {
                ensure(&buf, 8)?;
                Response::Time(buf.get_f64_le())
            },
        };
        Ok(response)
    }
}

fn ensure(buf: &&[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut &[u8], field: &'static str) -> Result<String, ProtocolError> {
    ensure(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure(buf, len)?;
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| ProtocolError::InvalidUtf8(field))?
        .to_string();
    buf.advance(len);
    Ok(value)
}

fn decode_raw_data(buf: &mut &[u8]) -> Result<RawData, ProtocolError> {
    ensure(buf, 8)?;
    let first = buf.get_u32();
    let second = buf.get_u32();
    if first != second {
        return Err(ProtocolError::CountMismatch { first, second });
    }

    let count = first as usize;
    let needed = count.checked_mul(9).ok_or(ProtocolError::FrameTooLarge {
        len: usize::MAX,
        limit: MAX_FRAME_LEN,
    })?;
    ensure(buf, needed)?;

    let timetags: Vec<i64> = (0..count).map(|_| buf.get_i64()).collect();
    let channels = buf[..count].to_vec();
    buf.advance(count);
    RawData::new(timetags, channels)
}

fn validate_frame_len(declared: u32) -> Result<usize, ProtocolError> {
    if declared == 0 {
        return Err(ProtocolError::InvalidFrameLength(declared));
    }
    let len = declared as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            limit: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

// ============================================================================
// Incremental Decoder
// ============================================================================

/// 增量帧解码器
///
/// 接受任意切分的字节流（包括逐字节写入），输出与一次性写入完全相同的帧序列。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加收到的字节
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// 尝试解出一帧
    ///
    /// # 返回
    /// - `Ok(Some(response))`: 一帧完整响应
    /// - `Ok(None)`: 数据不足，需要更多字节
    /// - `Err`: 帧长度非法或负载损坏
    pub fn decode(&mut self) -> Result<Option<Response>, ProtocolError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let mut header = &self.buf[..4];
        let frame_len = validate_frame_len(header.get_u32_le())?;
        if self.buf.len() < 4 + frame_len {
            return Ok(None);
        }

        self.buf.advance(4);
        let frame = self.buf.split_to(frame_len);
        Response::decode_payload(frame[0], &frame[1..]).map(Some)
    }

    /// 尚未解码的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ============================================================================
// Blocking I/O
// ============================================================================

/// 尽量填满 `buf`，返回实际读取的字节数（遇到 EOF 提前返回）
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(filled)
}

fn read_exact_or_closed<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    if read_full(reader, buf)? < buf.len() {
        return Err(ProtocolError::ConnectionClosed);
    }
    Ok(())
}

/// 读取一个原始命令 ID
///
/// 对端在命令边界处关闭连接时返回 `Ok(None)`。
pub fn read_command<R: Read>(reader: &mut R) -> Result<Option<u32>, ProtocolError> {
    let mut raw = [0u8; 4];
    match read_full(reader, &mut raw)? {
        0 => Ok(None),
        4 => Ok(Some(u32::from_le_bytes(raw))),
        _ => Err(ProtocolError::ConnectionClosed),
    }
}

/// 发送命令
pub fn write_command<W: Write>(writer: &mut W, command: CommandId) -> Result<(), ProtocolError> {
    writer.write_all(&encode_command(command))?;
    writer.flush()?;
    Ok(())
}

/// 阻塞读取一帧响应，直到声明长度的字节全部到达
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response, ProtocolError> {
    let mut header = [0u8; 4];
    read_exact_or_closed(reader, &mut header)?;
    let frame_len = validate_frame_len(u32::from_le_bytes(header))?;

    let mut frame = vec![0u8; frame_len];
    read_exact_or_closed(reader, &mut frame)?;
    Response::decode_payload(frame[0], &frame[1..])
}

/// 编码并写出一帧响应
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<(), ProtocolError> {
    let bytes = response.to_bytes()?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
