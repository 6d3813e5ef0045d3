//! TCP 服务框架
//!
//! accept 线程只负责接受连接，每个连接交给独立线程运行 [`Service::serve`]。
//! 连接状态：LISTEN → ACCEPT → ACTIVE → CLOSED。

use crate::{ConnectionTracker, ServerConfig, ServerError};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// 关闭信号（多处共享）
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 一个已接受的连接
pub struct Connection {
    pub id: u64,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub config: ServerConfig,
    pub shutdown: ShutdownSignal,
}

/// 连接处理逻辑
///
/// `serve` 在连接线程上运行，返回即关闭连接。
pub trait Service: Send + Sync + 'static {
    /// 服务名（用于线程名和日志）
    fn name(&self) -> &'static str;

    fn serve(&self, connection: Connection) -> Result<(), ServerError>;

    /// 服务停止后调用（例如断开设备）
    fn on_shutdown(&self) {}
}

/// 每设备 TCP 服务
pub struct DeviceServer<S: Service> {
    listener: TcpListener,
    config: ServerConfig,
    service: Arc<S>,
}

impl<S: Service> DeviceServer<S> {
    /// 绑定监听地址
    pub fn bind(config: ServerConfig, service: S) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        // 非阻塞 accept，轮询关闭信号
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            config,
            service: Arc::new(service),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// 在后台线程运行 accept 循环
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let local_addr = self.local_addr()?;
        let shutdown = ShutdownSignal::new();
        let tracker = Arc::new(Mutex::new(ConnectionTracker::new()));

        let name = format!("{}-accept", self.service.name());
        let accept_shutdown = shutdown.clone();
        let accept_tracker = Arc::clone(&tracker);
        let accept_thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.accept_loop(&accept_shutdown, &accept_tracker))
            .map_err(|source| ServerError::ThreadSpawn { name, source })?;

        Ok(ServerHandle {
            local_addr,
            shutdown,
            tracker,
            accept_thread: Some(accept_thread),
        })
    }

    /// 在当前线程运行 accept 循环，直到 `shutdown` 被触发
    pub fn run(self, shutdown: &ShutdownSignal) {
        let tracker = Arc::new(Mutex::new(ConnectionTracker::new()));
        self.accept_loop(shutdown, &tracker);
    }

    fn accept_loop(self, shutdown: &ShutdownSignal, tracker: &Arc<Mutex<ConnectionTracker>>) {
        let name = self.service.name();
        match self.listener.local_addr() {
            Ok(addr) => info!("{} listening on {}", name, addr),
            Err(e) => warn!("{} listening (address unavailable: {})", name, e),
        }

        while !shutdown.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracker.lock().reap_finished();
                    self.start_connection(stream, peer, shutdown, tracker);
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    tracker.lock().reap_finished();
                    thread::sleep(self.config.accept_poll_interval);
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // 例如文件描述符耗尽：记录后继续服务
                    error!("{} accept failed: {}", name, e);
                    thread::sleep(self.config.accept_poll_interval);
                },
            }
        }

        info!("{} shutting down", name);
        tracker.lock().shutdown_all();
        self.service.on_shutdown();
        info!("{} stopped", name);
    }

    fn start_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: &ShutdownSignal,
        tracker: &Arc<Mutex<ConnectionTracker>>,
    ) {
        let name = self.service.name();
        let prepared = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_nodelay(true))
            .and_then(|_| stream.set_read_timeout(self.config.read_timeout))
            .and_then(|_| stream.try_clone());
        let shutdown_handle = match prepared {
            Ok(clone) => clone,
            Err(e) => {
                warn!("{} failed to prepare connection from {}: {}", name, peer, e);
                return;
            },
        };

        let id = tracker.lock().next_id();
        let connection = Connection {
            id,
            stream,
            peer,
            config: self.config.clone(),
            shutdown: shutdown.clone(),
        };
        let service = Arc::clone(&self.service);

        let spawned = thread::Builder::new()
            .name(format!("{}-conn-{}", name, id))
            .spawn(move || {
                info!("{} connection #{} from {}", service.name(), id, peer);
                match service.serve(connection) {
                    Ok(()) => info!("{} connection #{} ({}) closed", service.name(), id, peer),
                    Err(e) => warn!(
                        "{} connection #{} ({}) closed with error: {}",
                        service.name(),
                        id,
                        peer,
                        e
                    ),
                }
            });

        match spawned {
            Ok(handle) => {
                let mut tracker = tracker.lock();
                tracker.insert(id, peer, shutdown_handle, handle);
                debug!("{} active connections: {}", name, tracker.active());
            },
            Err(e) => error!("{} failed to spawn handler for {}: {}", name, peer, e),
        }
    }
}

/// 后台运行的服务句柄
///
/// `shutdown()` 或 Drop 时停止 accept 循环、关闭所有连接并 join 全部线程。
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    tracker: Arc<Mutex<ConnectionTracker>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 关闭信号副本（例如交给 Ctrl-C 处理器）
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// 当前活跃连接数（先回收已结束的连接）
    pub fn active_connections(&self) -> usize {
        let mut tracker = self.tracker.lock();
        tracker.reap_finished();
        tracker.active()
    }

    /// 阻塞直到关闭信号被触发且服务完全停止
    pub fn wait(mut self) {
        self.join_accept_thread();
    }

    /// 停止服务并等待全部线程退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.trigger();
        self.join_accept_thread();
    }

    fn join_accept_thread(&mut self) {
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            error!("Accept thread panicked");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
