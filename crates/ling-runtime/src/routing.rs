//! 服务路由：实例挑选（标签匹配 + 金丝雀掷签）与路由代理。
//!
//! # 实例挑选（How）
//! 1. 请求标签非空：优先选标签超集实例；无命中回退默认实例；
//! 2. 否则查金丝雀配置：按 `percent/100` 概率命中 `version ==
//!    canary-version` 的实例，未命中走默认；掷签使用确定性
//!    SplitMix64，相同种子可复现；
//! 3. 平票按实例版本字典序取最小，保证决策确定。
//!
//! # 路由代理（What）
//! - 持有 `(调用方, 目标单元, 接口名)` 三元组字符串，不持有任何
//!   实例或命名空间引用；
//! - 每次调用重新解析当前目标运行时（热升级后自动命中新默认）；
//! - 调用上下文按线程池化复用，调用结束清空大字段。

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use ling_core::invocation::{InvocationContext, Value};
use ling_core::spi::ServiceHandle;
use ling_core::types::LabelSet;
use ling_core::{LingError, Result};
use ling_core::ids::UnitId;

use crate::instance::UnitInstance;
use crate::manager::UnitManager;
use crate::pool::InstancePool;
use crate::trace::splitmix64;

/// 金丝雀配置：`percent` ∈ [0,100]，`version` 为金丝雀实例的版本标签。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanaryConfig {
    pub percent: u8,
    pub version: String,
}

/// 金丝雀配置存储。
pub struct CanaryStore {
    entries: DashMap<String, CanaryConfig>,
}

impl CanaryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 设置金丝雀分流；百分比越界拒绝。
    pub fn set(&self, unit: &str, percent: u8, version: impl Into<String>) -> Result<()> {
        if percent > 100 {
            return Err(LingError::invalid_argument(format!(
                "canary percent must be in [0,100], got {percent}"
            )));
        }
        self.entries.insert(
            unit.to_owned(),
            CanaryConfig {
                percent,
                version: version.into(),
            },
        );
        Ok(())
    }

    pub fn get(&self, unit: &str) -> Option<CanaryConfig> {
        self.entries.get(unit).map(|entry| entry.value().clone())
    }

    pub fn clear(&self, unit: &str) {
        self.entries.remove(unit);
    }
}

impl Default for CanaryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 按版本字典序取最小的确定性平票规则。
fn min_by_version(candidates: Vec<Arc<UnitInstance>>) -> Option<Arc<UnitInstance>> {
    candidates
        .into_iter()
        .min_by(|a, b| a.version().cmp(b.version()))
}

/// 为一次调用挑选目标实例。
pub fn pick_instance(
    pool: &InstancePool,
    labels: &LabelSet,
    canary: Option<CanaryConfig>,
    seed: u64,
) -> Option<Arc<UnitInstance>> {
    let active = pool.active_instances();
    if active.is_empty() {
        return None;
    }

    if !labels.is_empty() {
        let matching: Vec<_> = active
            .iter()
            .filter(|instance| instance.labels().contains_all(labels))
            .cloned()
            .collect();
        if !matching.is_empty() {
            return min_by_version(matching);
        }
        return pool.default_instance();
    }

    if let Some(config) = canary {
        let roll = splitmix64(seed) % 100;
        if roll < config.percent as u64 {
            let canaries: Vec<_> = active
                .iter()
                .filter(|instance| instance.labels().get("version") == Some(config.version.as_str()))
                .cloned()
                .collect();
            if !canaries.is_empty() {
                return min_by_version(canaries);
            }
        }
    }
    pool.default_instance()
}

static CALL_SEQ: AtomicU64 = AtomicU64::new(1);

/// 每次调用的掷签种子：进程内单调序号，分布均匀且可复现。
pub(crate) fn next_call_seed() -> u64 {
    CALL_SEQ.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static CONTEXT_POOL: RefCell<Vec<InvocationContext>> = const { RefCell::new(Vec::new()) };
}

const CONTEXT_POOL_LIMIT: usize = 4;

/// 线程内池化的调用上下文；嵌套调用各取一份。
pub(crate) fn with_pooled_context<R>(f: impl FnOnce(&mut InvocationContext) -> R) -> R {
    let mut ctx = CONTEXT_POOL
        .with(|pool| pool.borrow_mut().pop())
        .unwrap_or_default();
    let out = f(&mut ctx);
    ctx.reset();
    CONTEXT_POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < CONTEXT_POOL_LIMIT {
            pool.push(ctx);
        }
    });
    out
}

/// 路由代理：`get-service` 返回给调用方的调用面。
pub struct ServiceProxy {
    manager: UnitManager,
    caller: Option<UnitId>,
    target: UnitId,
    interface: String,
}

impl ServiceProxy {
    pub(crate) fn new(
        manager: UnitManager,
        caller: Option<UnitId>,
        target: UnitId,
        interface: String,
    ) -> Self {
        Self {
            manager,
            caller,
            target,
            interface,
        }
    }
}

impl ServiceHandle for ServiceProxy {
    fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Option<Value>> {
        // 每次调用重新解析目标运行时，升级与晚绑定自然生效。
        self.manager
            .invoke_on_unit(self.caller.clone(), &self.target, operation, args)
    }

    fn interface_name(&self) -> &str {
        &self.interface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::{labeled_instance, ready_instance};

    fn pool_with_canary() -> InstancePool {
        let pool = InstancePool::new(UnitId::parse("user").unwrap(), 4);
        pool.install(ready_instance("user", "v1"), true).unwrap();
        pool.install(labeled_instance("user", "v2", [("zone", "canary")]), false)
            .unwrap();
        pool
    }

    #[test]
    fn canary_percent_zero_and_hundred() {
        let pool = pool_with_canary();
        let config = CanaryConfig {
            percent: 0,
            version: "v2".into(),
        };
        for seed in 0..64 {
            let picked =
                pick_instance(&pool, &LabelSet::new(), Some(config.clone()), seed).unwrap();
            assert_eq!(picked.version(), "v1", "0% 全走默认");
        }
        let config = CanaryConfig {
            percent: 100,
            version: "v2".into(),
        };
        for seed in 0..64 {
            let picked =
                pick_instance(&pool, &LabelSet::new(), Some(config.clone()), seed).unwrap();
            assert_eq!(picked.version(), "v2", "100% 全走金丝雀");
        }
    }

    #[test]
    fn canary_ratio_within_tolerance() {
        let pool = pool_with_canary();
        let config = CanaryConfig {
            percent: 25,
            version: "v2".into(),
        };
        let total = 10_000u64;
        let canary_hits = (0..total)
            .filter(|seed| {
                pick_instance(&pool, &LabelSet::new(), Some(config.clone()), *seed)
                    .unwrap()
                    .version()
                    == "v2"
            })
            .count() as f64;
        let ratio = canary_hits / total as f64;
        assert!(
            (0.22..=0.28).contains(&ratio),
            "canary ratio {ratio} out of [0.22, 0.28]"
        );
    }

    #[test]
    fn label_superset_preferred_over_default() {
        let pool = pool_with_canary();
        let labels = LabelSet::from_pairs([("zone", "canary")]);
        let picked = pick_instance(&pool, &labels, None, 7).unwrap();
        assert_eq!(picked.version(), "v2");

        let unmatched = LabelSet::from_pairs([("zone", "nowhere")]);
        let picked = pick_instance(&pool, &unmatched, None, 7).unwrap();
        assert_eq!(picked.version(), "v1", "无命中回退默认");
    }

    #[test]
    fn missing_canary_config_routes_default() {
        let pool = pool_with_canary();
        let picked = pick_instance(&pool, &LabelSet::new(), None, 42).unwrap();
        assert_eq!(picked.version(), "v1");
    }

    #[test]
    fn canary_store_round_trip() {
        let store = CanaryStore::new();
        assert!(store.get("user").is_none());
        store.set("user", 25, "v2").unwrap();
        assert_eq!(
            store.get("user"),
            Some(CanaryConfig {
                percent: 25,
                version: "v2".into()
            })
        );
        store.clear("user");
        assert!(store.get("user").is_none(), "clear 还原先前状态");
        assert!(store.set("user", 101, "v2").is_err());
    }
}
