//! 全局线程预算：单次 CAS 完成的配额分配。
//!
//! # 契约说明（What）
//! - 全局预算 `G = global-max-ling-threads`；每次安装申请
//!   `R = default-threads-per-ling`，先被单元上限封顶，再被全局余量
//!   封顶，最少一条线程；
//! - 分配与归还都走同一个原子计数器；卸载归还精确的分配数。

use std::sync::atomic::{AtomicUsize, Ordering};

use ling_core::LingError;

pub struct ThreadBudget {
    capacity: usize,
    allocated: AtomicUsize,
}

impl ThreadBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            allocated: AtomicUsize::new(0),
        }
    }

    /// 申请线程配额；返回实际授予数。
    ///
    /// # 边界行为
    /// - 余量为零时安装失败（`install.failure`）；
    /// - 余量不足以满足申请时授予剩余全部（仍 ≥ 1）。
    pub fn allocate(&self, requested: usize, per_unit_cap: usize) -> Result<usize, LingError> {
        let want = requested.clamp(1, per_unit_cap.max(1));
        loop {
            let current = self.allocated.load(Ordering::Acquire);
            let available = self.capacity.saturating_sub(current);
            if available == 0 {
                return Err(LingError::install_failure(
                    "<budget>",
                    format!("global thread budget exhausted ({} in use)", current),
                ));
            }
            let grant = want.min(available);
            if self
                .allocated
                .compare_exchange(current, current + grant, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(grant);
            }
        }
    }

    /// 归还配额；`count` 必须是此前授予的精确值。
    pub fn release(&self, count: usize) {
        let mut current = self.allocated.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(count);
            match self.allocated.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
