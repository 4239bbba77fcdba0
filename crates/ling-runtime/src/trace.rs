//! 链路追踪上下文：工作线程本地的 trace id、深度与活动单元状态。
//!
//! # 设计动机（Why）
//! - 治理内核在根入口生成 trace id、嵌套调用继承并递增深度；
//!   根出口的每条路径都必须清理，否则线程复用会串链路；
//! - 跨线程交接不依赖隐式继承：执行器显式捕获快照、在工作线程
//!   重放、退出路径恢复（传播器 SPI 的内置首个实现就是本模块）。

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use ling_core::ids::{TraceId, UnitId};
use ling_core::types::LabelSet;

#[derive(Default)]
struct TraceState {
    trace_id: Option<TraceId>,
    depth: u32,
    active_unit: Option<UnitId>,
    labels: LabelSet,
}

thread_local! {
    static TRACE: RefCell<TraceState> = RefCell::new(TraceState::default());
}

static TRACE_SEQ: AtomicU64 = AtomicU64::new(1);

/// SplitMix64 扰动：把单调序号打散成不易混淆的展示形态。
/// 确定性生成保证测试可复现；进程内唯一即满足契约。
/// 金丝雀路由的确定性掷签复用同一函数。
pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// 跨线程交接时捕获的追踪快照。
#[derive(Clone, Debug, Default)]
pub struct TraceSnapshot {
    pub trace_id: Option<TraceId>,
    pub active_unit: Option<UnitId>,
    pub labels: LabelSet,
}

/// 一次受治理调用在调用方线程上的入场凭证。
pub struct IngressToken {
    pub trace_id: TraceId,
    pub depth: u32,
    started_root: bool,
}

/// 工作线程本地追踪状态的静态访问面。
pub struct TraceContext;

impl TraceContext {
    /// 生成进程内唯一的新 trace id。
    pub fn next_trace_id() -> TraceId {
        let seq = TRACE_SEQ.fetch_add(1, Ordering::Relaxed);
        TraceId::parse(format!("ling-{:016x}", splitmix64(seq)))
            .unwrap_or_else(|_| TraceId::parse("ling-0").expect("static trace id"))
    }

    /// 根检测入场：无活动链路则开启新链路，否则继承；深度加一。
    pub fn begin_invocation() -> IngressToken {
        TRACE.with(|cell| {
            let mut state = cell.borrow_mut();
            let started_root = state.trace_id.is_none();
            if started_root {
                state.trace_id = Some(Self::next_trace_id());
            }
            state.depth += 1;
            IngressToken {
                trace_id: state.trace_id.clone().expect("trace id set above"),
                depth: state.depth,
                started_root,
            }
        })
    }

    /// 出场：深度减一；根出口清空线程状态。
    pub fn end_invocation(token: IngressToken) {
        TRACE.with(|cell| {
            let mut state = cell.borrow_mut();
            state.depth = state.depth.saturating_sub(1);
            if token.started_root {
                *state = TraceState::default();
            }
        });
    }

    pub fn current_trace_id() -> Option<TraceId> {
        TRACE.with(|cell| cell.borrow().trace_id.clone())
    }

    /// 覆盖当前 trace id（入站适配层继承外部链路时使用）。
    pub fn set_trace_id(trace_id: TraceId) {
        TRACE.with(|cell| cell.borrow_mut().trace_id = Some(trace_id));
    }

    pub fn depth() -> u32 {
        TRACE.with(|cell| cell.borrow().depth)
    }

    pub fn active_unit() -> Option<UnitId> {
        TRACE.with(|cell| cell.borrow().active_unit.clone())
    }

    pub fn set_active_unit(unit: Option<UnitId>) {
        TRACE.with(|cell| cell.borrow_mut().active_unit = unit);
    }

    pub fn labels() -> LabelSet {
        TRACE.with(|cell| cell.borrow().labels.clone())
    }

    pub fn set_labels(labels: LabelSet) {
        TRACE.with(|cell| cell.borrow_mut().labels = labels);
    }

    /// 捕获跨线程交接快照；在任务提交前于调用方线程执行。
    pub fn snapshot() -> TraceSnapshot {
        TRACE.with(|cell| {
            let state = cell.borrow();
            TraceSnapshot {
                trace_id: state.trace_id.clone(),
                active_unit: state.active_unit.clone(),
                labels: state.labels.clone(),
            }
        })
    }

    /// 重放快照；守卫析构时恢复先前状态（含 panic 展开路径）。
    pub fn replay(snapshot: &TraceSnapshot) -> TraceReplayGuard {
        let previous = TRACE.with(|cell| {
            let mut state = cell.borrow_mut();
            let previous = TraceSnapshot {
                trace_id: state.trace_id.take(),
                active_unit: state.active_unit.take(),
                labels: std::mem::take(&mut state.labels),
            };
            state.trace_id = snapshot.trace_id.clone();
            state.active_unit = snapshot.active_unit.clone();
            state.labels = snapshot.labels.clone();
            previous
        });
        TraceReplayGuard { previous }
    }

    /// 清空线程状态；全局停机与测试复位使用。
    pub fn clear() {
        TRACE.with(|cell| *cell.borrow_mut() = TraceState::default());
    }
}

/// 快照重放守卫。
pub struct TraceReplayGuard {
    previous: TraceSnapshot,
}

impl Drop for TraceReplayGuard {
    fn drop(&mut self) {
        TRACE.with(|cell| {
            let mut state = cell.borrow_mut();
            state.trace_id = self.previous.trace_id.take();
            state.active_unit = self.previous.active_unit.take();
            state.labels = std::mem::take(&mut self.previous.labels);
        });
    }
}
