//! 实例池：一个单元 id 名下的活动与垂死实例集合。
//!
//! # 不变量（What）
//! - `default ∈ active ∨ default = ∅`；
//! - `dying.len() ≤ max_dying`，达到上限即构成安装背压；
//! - 蓝绿替换中默认指针的写入是单次原子发布（arc-swap），并发读者
//!   要么看到旧默认要么看到新默认，不存在中间态。
//!
//! # 并发（How）
//! - 集合变更统一由池锁串行化；默认指针单独走 `ArcSwapOption`，
//!   读路径零锁；
//! - 排水清扫使用 `try_lock`，避免与安装/卸载互相阻塞。

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::debug;

use ling_core::ids::UnitId;
use ling_core::{LingError, Result};

use crate::instance::UnitInstance;

/// 池的诊断快照。
#[derive(Clone, Debug)]
pub struct PoolSnapshot {
    pub unit_id: String,
    pub active: Vec<InstanceSnapshot>,
    pub default_version: Option<String>,
    pub dying: Vec<InstanceSnapshot>,
}

#[derive(Clone, Debug)]
pub struct InstanceSnapshot {
    pub version: String,
    pub state: &'static str,
    pub refcount: u64,
    pub inflight_high_water: u64,
}

fn snapshot_of(instance: &Arc<UnitInstance>) -> InstanceSnapshot {
    InstanceSnapshot {
        version: instance.version().to_owned(),
        state: instance.state().as_str(),
        refcount: instance.refcount(),
        inflight_high_water: instance.inflight_high_water(),
    }
}

struct PoolInner {
    active: Vec<Arc<UnitInstance>>,
    dying: VecDeque<Arc<UnitInstance>>,
}

pub struct InstancePool {
    unit_id: UnitId,
    max_dying: usize,
    inner: Mutex<PoolInner>,
    default_ptr: ArcSwapOption<UnitInstance>,
}

impl InstancePool {
    pub fn new(unit_id: UnitId, max_dying: usize) -> Self {
        Self {
            unit_id,
            max_dying: max_dying.max(1),
            inner: Mutex::new(PoolInner {
                active: Vec::new(),
                dying: VecDeque::new(),
            }),
            default_ptr: ArcSwapOption::const_empty(),
        }
    }

    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    /// 标签无关调用的路由目标；零锁读。
    pub fn default_instance(&self) -> Option<Arc<UnitInstance>> {
        self.default_ptr.load_full()
    }

    pub fn active_instances(&self) -> Vec<Arc<UnitInstance>> {
        self.inner.lock().active.clone()
    }

    pub fn dying_count(&self) -> usize {
        self.inner.lock().dying.len()
    }

    /// 垂死队列是否已达背压上限。
    pub fn at_dying_capacity(&self) -> bool {
        self.dying_count() >= self.max_dying
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.active.is_empty() && inner.dying.is_empty()
    }

    /// 插入已就绪的新实例；`as_default` 时执行蓝绿切换。
    ///
    /// # 前置条件
    /// - 实例已经 READY（新实例先达到就绪再参与任何切换）；
    /// - 调用方已确认背压余量（本方法仍会复查，竞态下拒绝）。
    pub fn install(&self, instance: Arc<UnitInstance>, as_default: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner
            .active
            .iter()
            .any(|existing| existing.version() == instance.version())
        {
            return Err(LingError::install_failure(
                self.unit_id.as_str(),
                format!("version `{}` already active", instance.version()),
            ));
        }
        if as_default {
            if let Some(previous) = self.default_ptr.load_full() {
                if inner.dying.len() >= self.max_dying {
                    return Err(LingError::ServiceUnavailable {
                        unit: self.unit_id.as_str().to_owned(),
                        reason: format!("dying queue at capacity ({})", self.max_dying),
                    });
                }
                previous.mark_dying();
                inner
                    .active
                    .retain(|candidate| !Arc::ptr_eq(candidate, &previous));
                inner.dying.push_back(Arc::clone(&previous));
                debug!(
                    unit = %self.unit_id,
                    old = %previous.version(),
                    new = %instance.version(),
                    "blue-green default switch"
                );
            }
            inner.active.push(Arc::clone(&instance));
            // 原子发布：并发读者观察到的要么是旧默认要么是新默认。
            self.default_ptr.store(Some(instance));
        } else {
            inner.active.push(instance);
        }
        Ok(())
    }

    /// 卸载路径：全部活动实例转入垂死队列，清空默认指针。
    pub fn retire_all(&self) {
        let mut inner = self.inner.lock();
        self.default_ptr.store(None);
        let retired: Vec<_> = inner.active.drain(..).collect();
        for instance in retired {
            instance.mark_dying();
            inner.dying.push_back(instance);
        }
    }

    /// 摘取可销毁的垂死实例（计数归零者）。
    ///
    /// 使用 `try_lock`：清扫线程与安装/卸载竞争时直接跳过本轮。
    pub fn collect_destroyable(&self) -> Vec<Arc<UnitInstance>> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Vec::new();
        };
        let mut destroyable = Vec::new();
        inner.dying.retain(|instance| {
            if instance.is_destroyable() {
                destroyable.push(Arc::clone(instance));
                false
            } else {
                true
            }
        });
        destroyable
    }

    /// 强制清理：取走全部垂死实例，无论在途计数。
    pub fn drain_remaining(&self) -> Vec<Arc<UnitInstance>> {
        let mut inner = self.inner.lock();
        inner.dying.drain(..).collect()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock();
        PoolSnapshot {
            unit_id: self.unit_id.as_str().to_owned(),
            active: inner.active.iter().map(snapshot_of).collect(),
            default_version: self
                .default_ptr
                .load_full()
                .map(|instance| instance.version().to_owned()),
            dying: inner.dying.iter().map(snapshot_of).collect(),
        }
    }
}
