//! 上下文快照：跨线程交接时的环境状态捕获与重放。
//!
//! # 顺序保证（What）
//! - 捕获发生在任务提交之前（调用方线程）；
//! - 重放发生在目标调用之前（工作线程）；
//! - 恢复发生在工作线程的每条退出路径上（守卫析构，含 panic 展开）。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use ling_core::spi::Propagator;

use crate::trace::{TraceContext, TraceReplayGuard, TraceSnapshot};

/// 一次跨线程交接的完整快照：内置链路追踪状态加各传播器的产出。
pub struct ContextSnapshot {
    trace: TraceSnapshot,
    captured: Vec<(Arc<dyn Propagator>, Box<dyn Any + Send>)>,
}

impl ContextSnapshot {
    /// 在调用方线程捕获快照。
    ///
    /// 传播器 panic 被按非致命处理：记录告警并跳过该传播器，
    /// 不中断业务调用。
    pub fn capture(propagators: &[Arc<dyn Propagator>]) -> Self {
        let mut captured = Vec::with_capacity(propagators.len());
        for propagator in propagators {
            match panic::catch_unwind(AssertUnwindSafe(|| propagator.capture())) {
                Ok(snapshot) => captured.push((Arc::clone(propagator), snapshot)),
                Err(_) => {
                    warn!(propagator = propagator.name(), "propagator capture panicked, skipped");
                }
            }
        }
        Self {
            trace: TraceContext::snapshot(),
            captured,
        }
    }

    /// 在工作线程重放快照；返回的守卫负责恢复。
    pub fn replay(&self) -> SnapshotGuard {
        let trace_guard = TraceContext::replay(&self.trace);
        let mut tokens = Vec::with_capacity(self.captured.len());
        for (propagator, snapshot) in &self.captured {
            match panic::catch_unwind(AssertUnwindSafe(|| propagator.replay(snapshot.as_ref()))) {
                Ok(token) => tokens.push((Arc::clone(propagator), token)),
                Err(_) => {
                    warn!(propagator = propagator.name(), "propagator replay panicked, skipped");
                }
            }
        }
        SnapshotGuard {
            _trace: trace_guard,
            tokens,
        }
    }
}

/// 重放守卫：析构时逆序恢复传播器，再恢复链路状态。
pub struct SnapshotGuard {
    _trace: TraceReplayGuard,
    tokens: Vec<(Arc<dyn Propagator>, Box<dyn Any + Send>)>,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        while let Some((propagator, token)) = self.tokens.pop() {
            if panic::catch_unwind(AssertUnwindSafe(|| propagator.restore(token))).is_err() {
                warn!(propagator = propagator.name(), "propagator restore panicked, skipped");
            }
        }
    }
}
