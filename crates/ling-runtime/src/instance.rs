//! 单元实例：一个活版本的运行体，引用计数与状态机的权威位置。

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tracing::error;

use ling_core::definition::UnitDefinition;
use ling_core::ids::UnitId;
use ling_core::spi::Container;
use ling_core::types::{LabelSet, UnitState};
use ling_core::{LingError, Result};

use crate::isolation::UnitNamespace;
use crate::registry::ServiceTable;

/// 单元实例。
///
/// # 所有权（What）
/// - 实例独占其命名空间与容器，二者随实例销毁一起关闭；
/// - 实例池是唯一的强引用持有者，路由与缓存只允许以单元 id 字符串
///   间接引用。
///
/// # 引用计数（How）
/// - [`enter`](Self::enter) 仅在 READY 态成功，返回的守卫在析构时
///   执行配对的 `exit`，任何代码路径都不会漏配；
/// - 计数为 64 位饱和语义；下溢按逻辑缺陷记错误日志而不回绕；
/// - `inflight_high_water` 单调递增，仅作诊断。
pub struct UnitInstance {
    unit_id: UnitId,
    version: String,
    definition: Arc<UnitDefinition>,
    namespace: Arc<UnitNamespace>,
    container: Arc<dyn Container>,
    /// 本实例容器注册的可调用方法；bean 归属随实例而非单元。
    services: ServiceTable,
    labels: LabelSet,
    state: AtomicU8,
    refcount: AtomicU64,
    high_water: AtomicU64,
}

impl UnitInstance {
    pub fn new(
        unit_id: UnitId,
        definition: Arc<UnitDefinition>,
        namespace: Arc<UnitNamespace>,
        container: Arc<dyn Container>,
        labels: LabelSet,
    ) -> Arc<Self> {
        let version = definition.version().to_owned();
        Arc::new(Self {
            unit_id,
            version,
            definition,
            namespace,
            container,
            services: ServiceTable::new(),
            labels,
            state: AtomicU8::new(UnitState::Loading as u8),
            refcount: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
        })
    }

    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn definition(&self) -> &Arc<UnitDefinition> {
        &self.definition
    }

    pub fn namespace(&self) -> &Arc<UnitNamespace> {
        &self.namespace
    }

    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(UnitState::Destroyed)
    }

    /// LOADING → READY；容器启动成功后由管理器推进。
    pub fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(
                UnitState::Loading as u8,
                UnitState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// READY → DYING；被替换或卸载。此后 `enter` 快速失败。
    pub fn mark_dying(&self) {
        let _ = self.state.compare_exchange(
            UnitState::Ready as u8,
            UnitState::Dying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // LOADING 态的半成品实例同样允许直接进入 DYING（安装回滚）。
        let _ = self.state.compare_exchange(
            UnitState::Loading as u8,
            UnitState::Dying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// DYING → DESTROYED；仅销毁序列调用，前置条件为计数已归零或强制清理。
    pub fn mark_destroyed(&self) {
        self.state
            .store(UnitState::Destroyed as u8, Ordering::Release);
    }

    /// 进入实例：仅 READY 态放行。
    ///
    /// 返回的守卫借用实例存续期；调用方（池或局部 `Arc`）持有强引用。
    pub fn enter(&self) -> Result<InstanceGuard<'_>> {
        if self.state() != UnitState::Ready {
            return Err(LingError::ServiceUnavailable {
                unit: self.unit_id.as_str().to_owned(),
                reason: format!("instance {} is {}", self.version, self.state()),
            });
        }
        let previous = self.refcount.fetch_add(1, Ordering::AcqRel);
        if previous == u64::MAX {
            // 饱和：回退本次增量，拒绝进入。
            self.refcount.store(u64::MAX, Ordering::Release);
            return Err(LingError::ServiceUnavailable {
                unit: self.unit_id.as_str().to_owned(),
                reason: "reference counter saturated".to_owned(),
            });
        }
        self.high_water.fetch_max(previous + 1, Ordering::AcqRel);
        Ok(InstanceGuard { instance: self })
    }

    fn exit(&self) {
        let result = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        if result.is_err() {
            error!(
                unit = %self.unit_id,
                version = %self.version,
                "reference counter underflow, exit without matching enter"
            );
        }
    }

    pub fn refcount(&self) -> u64 {
        self.refcount.load(Ordering::Acquire)
    }

    /// 历史最高并发进入数，诊断用。
    pub fn inflight_high_water(&self) -> u64 {
        self.high_water.load(Ordering::Acquire)
    }

    /// 是否满足销毁条件：DYING 且无在途调用。
    pub fn is_destroyable(&self) -> bool {
        self.state() == UnitState::Dying && self.refcount() == 0
    }
}

/// 进入守卫；析构即配对的 `exit`。
pub struct InstanceGuard<'a> {
    instance: &'a UnitInstance,
}

impl InstanceGuard<'_> {
    pub fn instance(&self) -> &UnitInstance {
        self.instance
    }
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        self.instance.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::{idle_container, namespace_for};

    fn instance(unit: &str, version: &str) -> Arc<UnitInstance> {
        let unit_id = UnitId::parse(unit).unwrap();
        let definition = Arc::new(UnitDefinition::new(unit, version, "demo.Entry"));
        UnitInstance::new(
            unit_id.clone(),
            definition,
            namespace_for(unit, version),
            idle_container(),
            LabelSet::from_pairs([("version", version)]),
        )
    }

    #[test]
    fn enter_requires_ready() {
        let inst = instance("user", "v1");
        assert!(inst.enter().is_err(), "LOADING 态拒绝进入");
        assert!(inst.mark_ready());
        {
            let _guard = inst.enter().expect("READY 态放行");
            assert_eq!(inst.refcount(), 1);
        }
        assert_eq!(inst.refcount(), 0);
        assert_eq!(inst.inflight_high_water(), 1);
    }

    #[test]
    fn dying_blocks_new_callers() {
        let inst = instance("user", "v1");
        inst.mark_ready();
        let guard = inst.enter().unwrap();
        inst.mark_dying();
        assert!(inst.enter().is_err(), "DYING 态禁止新调用方");
        assert!(!inst.is_destroyable(), "在途调用未结束");
        drop(guard);
        assert!(inst.is_destroyable());
    }

    #[test]
    fn high_water_is_monotonic() {
        let inst = instance("user", "v1");
        inst.mark_ready();
        let g1 = inst.enter().unwrap();
        let g2 = inst.enter().unwrap();
        drop(g1);
        let g3 = inst.enter().unwrap();
        assert_eq!(inst.inflight_high_water(), 2);
        drop(g2);
        drop(g3);
        assert_eq!(inst.inflight_high_water(), 2);
    }
}
