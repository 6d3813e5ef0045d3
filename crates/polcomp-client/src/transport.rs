//! JSON 行传输
//!
//! 一条持久 TCP 会话，由互斥锁保护，保证请求与响应一一对应。
//! 会话出错（I/O、超时、帧失步）后被丢弃，下一次请求自动重连。
//! 失败的请求不会被重发：服务端可能已经执行了它。

use crate::{ClientConfig, ClientError};
use parking_lot::Mutex;
use polcomp_protocol::json::{self, LineReader, Request, Response};
use polcomp_protocol::{DeviceInfo, MotorStatus};
use std::io::BufReader;
use std::net::TcpStream;
use tracing::{debug, warn};

struct Session {
    writer: TcpStream,
    reader: LineReader<BufReader<TcpStream>>,
}

impl Session {
    fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = connect_stream(config)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            writer,
            reader: LineReader::new(BufReader::new(stream)),
        })
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, ClientError> {
        json::write_message(&mut self.writer, request)?;
        Ok(self.reader.read_response()?)
    }
}

/// 依次尝试解析出的地址，建立带超时设置的 TCP 连接
pub(crate) fn connect_stream(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let mut last_error = None;
    for addr in config.socket_addrs()? {
        match TcpStream::connect_timeout(&addr, config.timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(config.timeout))?;
                stream.set_write_timeout(Some(config.timeout))?;
                debug!("Connected to {}", addr);
                return Ok(stream);
            },
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            },
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => ClientError::InvalidArgument(format!("no address for '{}'", config.addr)),
    })
}

/// JSON 行传输（线程安全）
pub struct JsonTransport {
    config: ClientConfig,
    session: Mutex<Option<Session>>,
}

impl JsonTransport {
    /// 创建传输但不立即连接
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// 创建传输并建立会话
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let session = Session::open(&config)?;
        Ok(Self {
            config,
            session: Mutex::new(Some(session)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    /// 发送请求并等待响应
    ///
    /// `{"error": ...}` 响应转换为 [`ClientError::Remote`]。
    pub fn request(&self, request: &Request) -> Result<Response, ClientError> {
        let mut guard = self.session.lock();
        let mut session = match guard.take() {
            Some(session) => session,
            None => Session::open(&self.config)?,
        };

        match session.exchange(request) {
            Ok(Response::Error { error }) => {
                *guard = Some(session);
                Err(ClientError::Remote(error))
            },
            Ok(response) => {
                *guard = Some(session);
                Ok(response)
            },
            Err(e) => {
                if e.breaks_session() {
                    warn!(
                        "{} '{}' failed, session dropped: {}",
                        self.config.addr,
                        request.command_name(),
                        e
                    );
                } else {
                    *guard = Some(session);
                }
                Err(e)
            },
        }
    }

    pub fn list_motors(&self) -> Result<Vec<DeviceInfo>, ClientError> {
        match self.request(&Request::ListMotors)? {
            Response::Motors { motors } => Ok(motors),
            other => Err(ClientError::unexpected("list_motors", other)),
        }
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, ClientError> {
        match self.request(&Request::ListDevices)? {
            Response::Devices { devices } => Ok(devices),
            other => Err(ClientError::unexpected("list_devices", other)),
        }
    }

    pub fn position(&self, serial_number: &str) -> Result<MotorStatus, ClientError> {
        let request = Request::GetPosition {
            serial_number: serial_number.to_string(),
        };
        match self.request(&request)? {
            Response::Position(status) => Ok(status),
            other => Err(ClientError::unexpected("get_position", other)),
        }
    }

    /// 发送运动类命令，返回确认中的 `moving`
    pub fn command(&self, request: &Request) -> Result<bool, ClientError> {
        match self.request(request)? {
            Response::Ack { status, moving } => {
                debug!("{}: {}", self.config.addr, status);
                Ok(moving)
            },
            other => Err(ClientError::unexpected(request.command_name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    /// 只应答一行预设响应后关闭连接的假服务
    fn one_shot_server(reply: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                (&stream).write_all(reply.as_bytes()).unwrap();
                // 连接随 stream 一起关闭
            }
        });
        (addr, handle)
    }

    #[test]
    fn test_remote_error_keeps_session() {
        let (addr, server) = one_shot_server("{\"error\":\"Motor 1 not found\"}\n");
        let transport = JsonTransport::connect(ClientConfig::new(addr)).unwrap();
        let err = transport.list_motors().unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref m) if m == "Motor 1 not found"));
        assert!(transport.is_connected());

        // 服务端已关闭第一条连接；本次失败，会话被丢弃
        assert!(transport.list_motors().is_err());
        assert!(!transport.is_connected());

        // 重连后成功拿到第二条连接的响应
        assert!(matches!(transport.list_motors(), Err(ClientError::Remote(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_read_timeout() {
        // 接受连接但从不应答
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let silent = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let config = ClientConfig::new(addr).with_timeout(Duration::from_millis(100));
        let transport = JsonTransport::connect(config).unwrap();
        let start = Instant::now();
        let err = transport.list_motors().unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {:?}", err);
        assert!(start.elapsed() < Duration::from_millis(450));
        assert!(!transport.is_connected());
        silent.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // 绑定后立即释放，得到一个没有监听者的端口
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        assert!(JsonTransport::connect(ClientConfig::new(addr)).is_err());
    }
}
