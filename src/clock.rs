//! 時間來源與取消機制。
//!
//! 傳播等待與授權輪詢都透過 [`Clock`] 取得時間與休眠，測試時改用 [`MockClock`]，
//! 不必真的等待。

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::debug;

/// 等待被 [`CancelToken`] 中斷。
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Operation cancelled")]
pub struct Cancelled;

/// 可跨執行緒共用的取消旗標。
///
/// 複製出來的 token 共享同一個狀態；任何一份呼叫 [`CancelToken::cancel`]
/// 都會喚醒正在 [`CancelToken::wait_timeout`] 中的執行緒。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cancel(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
        debug!("cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag()
    }

    /// 已取消時回傳 `Err(Cancelled)`。
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// 最多等待 `timeout`；期間被取消則立即回傳 `Err(Cancelled)`。
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.flag();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            cancelled = match self.inner.1.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        Err(Cancelled)
    }
}

/// 時間來源。
pub trait Clock: Send + Sync {
    /// 自某個固定起點起算的時間。
    fn now(&self) -> Duration;

    /// 休眠指定時間；可被取消。
    fn sleep(&self, duration: Duration) -> Result<(), Cancelled>;
}

/// 真實時間，休眠時會回應取消。
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
    cancel: CancelToken,
}

impl SystemClock {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            start: Instant::now(),
            cancel,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(CancelToken::new())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.cancel.check()?;
        self.cancel.wait_timeout(duration)
    }
}

/// 測試用時鐘：休眠只會推進虛擬時間，並記錄每次休眠的長度。
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 不經休眠直接推進時間。
    pub fn advance(&self, duration: Duration) {
        self.state().now += duration;
    }

    /// 目前為止所有休眠的長度。
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        self.state().now
    }

    fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let mut state = self.state();
        state.now += duration;
        state.sleeps.push(duration);
        Ok(())
    }
}
