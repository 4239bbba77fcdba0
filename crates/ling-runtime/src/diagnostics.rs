//! 调用历史诊断：按单元保留最近 N 次调用的概要快照。
//!
//! 保留条数由 `runtime.max-history-snapshots` 约束；仅诊断用途，
//! 不参与任何治理判定。

use std::collections::VecDeque;

use parking_lot::Mutex;

/// 一次调用的概要。
#[derive(Clone, Debug)]
pub struct InvocationSnapshot {
    pub fqsid: String,
    pub cost_nanos: u64,
    /// 成功为 `None`，失败为稳定错误码。
    pub error_code: Option<&'static str>,
}

pub struct HistoryRing {
    capacity: usize,
    entries: Mutex<VecDeque<InvocationSnapshot>>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, snapshot: InvocationSnapshot) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(snapshot);
    }

    /// 最近的调用概要，旧在前新在后。
    pub fn recent(&self) -> Vec<InvocationSnapshot> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
