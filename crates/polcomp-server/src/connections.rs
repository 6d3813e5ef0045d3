//! 连接管理
//!
//! 跟踪每个连接的处理线程，accept 循环中回收已结束的线程，
//! 服务关闭时关闭所有仍活跃的 socket 并 join 全部处理线程。

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, warn};

/// 单个连接的处理线程
struct Worker {
    peer: SocketAddr,
    /// 句柄副本，用于在关闭时唤醒阻塞在 read 上的处理线程
    stream: TcpStream,
    handle: JoinHandle<()>,
    accepted_at: Instant,
}

/// 连接跟踪器
pub struct ConnectionTracker {
    workers: HashMap<u64, Worker>,
    /// 连接 ID 生成器，从 1 开始单调递增
    next_id: u64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            next_id: 1,
        }
    }

    /// 分配新的连接 ID
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// 登记一个已启动的处理线程
    pub fn insert(&mut self, id: u64, peer: SocketAddr, stream: TcpStream, handle: JoinHandle<()>) {
        self.workers.insert(
            id,
            Worker {
                peer,
                stream,
                handle,
                accepted_at: Instant::now(),
            },
        );
    }

    /// 回收已经结束的处理线程，返回回收数量
    pub fn reap_finished(&mut self) -> usize {
        let finished: Vec<u64> = self
            .workers
            .iter()
            .filter(|(_, worker)| worker.handle.is_finished())
            .map(|(&id, _)| id)
            .collect();

        for id in &finished {
            if let Some(worker) = self.workers.remove(id) {
                Self::join(*id, worker);
            }
        }
        finished.len()
    }

    /// 当前活跃连接数
    pub fn active(&self) -> usize {
        self.workers.len()
    }

    /// 活跃连接的对端地址
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.workers.values().map(|worker| worker.peer).collect()
    }

    /// 关闭所有连接并等待处理线程退出
    pub fn shutdown_all(&mut self) {
        // 先关闭全部 socket，让所有线程并行退出，再逐个 join
        for worker in self.workers.values() {
            let _ = worker.stream.shutdown(Shutdown::Both);
        }
        for (id, worker) in self.workers.drain() {
            Self::join(id, worker);
        }
    }

    fn join(id: u64, worker: Worker) {
        let lifetime = worker.accepted_at.elapsed();
        if worker.handle.join().is_err() {
            warn!("Connection #{} ({}) handler panicked", id, worker.peer);
        } else {
            debug!("Connection #{} ({}) joined after {:?}", id, worker.peer, lifetime);
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}
