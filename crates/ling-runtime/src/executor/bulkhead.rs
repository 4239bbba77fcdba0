//! 舱壁：单元级有界并发闸门。

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// 舱壁信号量。
///
/// # 契约说明（What）
/// - 许可数固定为 `bulkhead-max-concurrent`；
/// - [`acquire`](Self::acquire) 在等待窗口内未获得许可返回 `None`，
///   由调用方转换为 `bulkhead.full`；
/// - 许可守卫析构即归还，失败路径同样不漏。
pub struct Bulkhead {
    max_concurrent: usize,
    in_use: Mutex<usize>,
    available: Condvar,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            in_use: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    /// 申请一张许可，最多等待 `timeout`。
    pub fn acquire(&self, timeout: Duration) -> Option<BulkheadPermit<'_>> {
        let deadline = Instant::now() + timeout;
        let mut in_use = self.in_use.lock();
        while *in_use >= self.max_concurrent {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if self.available.wait_for(&mut in_use, remaining).timed_out()
                && *in_use >= self.max_concurrent
            {
                return None;
            }
        }
        *in_use += 1;
        Some(BulkheadPermit { bulkhead: self })
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.available.notify_one();
    }
}

/// 舱壁许可；析构归还。
pub struct BulkheadPermit<'a> {
    bulkhead: &'a Bulkhead,
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}
