//! 熔断器：按 FQSID 维护的滑动计数窗口状态机。
//!
//! # 状态机（What）
//! - `Closed`：正常放行并采样；样本数达到 `min-calls` 后，失败率或
//!   慢调用率任一越线即跳闸到 `Open`；
//! - `Open`：拒绝进入；等待 `wait` 后转 `HalfOpen`；
//! - `HalfOpen`：放行至多 K 枚探针；全部成功 → `Closed`，任一失败
//!   → 回到 `Open`；
//! - `ForcedOpen` / `Disabled`：运维强制态，不参与自动流转。
//!
//! # 并发（How）
//! - 单个熔断器的全部状态转移在内部互斥锁下串行化，满足
//!   “按 FQSID 串行更新”的顺序约束。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use ling_core::config::BreakerOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
    ForcedOpen,
    Disabled,
}

impl BreakerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
            Self::ForcedOpen => "FORCED_OPEN",
            Self::Disabled => "DISABLED",
        }
    }
}

#[derive(Clone, Copy)]
struct CallSample {
    success: bool,
    slow: bool,
}

struct BreakerInner {
    state: BreakerState,
    window: VecDeque<CallSample>,
    opened_at: Option<Instant>,
    probes_inflight: usize,
    probes_succeeded: usize,
}

pub struct CircuitBreaker {
    opts: BreakerOptions,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(opts: BreakerOptions) -> Self {
        Self {
            opts,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probes_inflight: 0,
                probes_succeeded: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// 申请进入；返回 `false` 表示熔断拒绝（`call.not_permitted`）。
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Disabled | BreakerState::Closed => true,
            BreakerState::ForcedOpen => false,
            BreakerState::Open => {
                let waited = inner
                    .opened_at
                    .map(|at| at.elapsed() >= Duration::from_millis(self.opts.wait))
                    .unwrap_or(true);
                if waited {
                    inner.state = BreakerState::HalfOpen;
                    inner.probes_inflight = 1;
                    inner.probes_succeeded = 0;
                    debug!("circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_inflight < self.opts.half_open_probes {
                    inner.probes_inflight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 已获准但未真正执行（如舱壁拒绝）；半开态需归还探针名额。
    pub fn on_discard(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.probes_inflight = inner.probes_inflight.saturating_sub(1);
        }
    }

    pub fn on_success(&self, duration: Duration) {
        self.record(true, duration);
    }

    pub fn on_error(&self, duration: Duration) {
        self.record(false, duration);
    }

    fn record(&self, success: bool, duration: Duration) {
        let slow = duration >= Duration::from_millis(self.opts.slow_duration);
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Disabled | BreakerState::ForcedOpen => {}
            BreakerState::HalfOpen => {
                if success && !slow {
                    inner.probes_succeeded += 1;
                    if inner.probes_succeeded >= inner.probes_inflight.max(1) {
                        self.close(&mut inner);
                    }
                } else {
                    self.trip(&mut inner);
                }
            }
            BreakerState::Closed => {
                if inner.window.len() == self.opts.window_size.max(1) {
                    inner.window.pop_front();
                }
                inner.window.push_back(CallSample { success, slow });
                if self.should_trip(&inner) {
                    self.trip(&mut inner);
                }
            }
            BreakerState::Open => {
                // 跳闸后的迟到结果不再改变判定。
            }
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        let samples = inner.window.len();
        if samples < self.opts.min_calls.max(1) {
            return false;
        }
        let failures = inner.window.iter().filter(|s| !s.success).count();
        let slow = inner.window.iter().filter(|s| s.slow).count();
        let failure_rate = failures * 100 / samples;
        let slow_rate = slow * 100 / samples;
        failure_rate >= self.opts.failure_threshold as usize
            || slow_rate >= self.opts.slow_threshold as usize
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.window.clear();
        inner.probes_inflight = 0;
        inner.probes_succeeded = 0;
        debug!("circuit breaker opened");
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.window.clear();
        inner.probes_inflight = 0;
        inner.probes_succeeded = 0;
        debug!("circuit breaker closed");
    }

    /// 运维强制跳闸；仅 [`reset`](Self::reset) 可恢复。
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::ForcedOpen;
        inner.window.clear();
    }

    /// 关闭熔断判定（放行一切）。
    pub fn disable(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Disabled;
        inner.window.clear();
    }

    /// 复位为 CLOSED 并清空窗口。
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.close(&mut inner);
    }
}
