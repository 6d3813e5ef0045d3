//! 有界、可取消的轮询

use crate::ClientError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// 休眠切片，决定取消的响应延迟
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// 取消令牌（可在线程间克隆共享）
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 分段休眠，期间检查取消；返回 false 表示已取消
pub fn sleep_cancellable(duration: Duration, cancel: &CancelToken) -> bool {
    // 溢出时只能被取消结束
    let until = Instant::now().checked_add(duration);
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let slice = match until {
            Some(until) => {
                let now = Instant::now();
                if now >= until {
                    return true;
                }
                (until - now).min(SLEEP_SLICE)
            },
            None => SLEEP_SLICE,
        };
        thread::sleep(slice);
    }
}

/// `now + budget`；溢出时截断为 [`MAX_MOVE_WAIT`](crate::MAX_MOVE_WAIT)
pub fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(crate::MAX_MOVE_WAIT))
        .unwrap_or(now)
}

/// 反复调用 `check` 直到其返回 `Some`
///
/// # 返回
/// - `Ok(value)`: 条件满足
/// - `Err(Timeout)`: 到达 `deadline` 仍未满足
/// - `Err(Cancelled)`: `cancel` 被触发
/// - `check` 自身的错误原样返回
pub fn poll_until<T>(
    interval: Duration,
    deadline: Instant,
    cancel: &CancelToken,
    mut check: impl FnMut() -> Result<Option<T>, ClientError>,
) -> Result<T, ClientError> {
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if let Some(value) = check()? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ClientError::Timeout(
                "condition not reached before deadline".to_string(),
            ));
        }
        if !sleep_cancellable(interval.min(deadline - now), cancel) {
            return Err(ClientError::Cancelled);
        }
    }
}
