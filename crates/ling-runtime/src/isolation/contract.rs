//! 共享合约层：进程级单例，承载跨单元边界的接口与值类型定义。

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use ling_core::spi::TypeDescriptor;

/// 一份合约归档：名称、自有前缀与携带的类型定义。
#[derive(Clone, Debug, Default)]
pub struct ContractArchive {
    pub name: String,
    pub prefixes: Vec<String>,
    pub types: Vec<TypeDescriptor>,
}

impl ContractArchive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefixes: Vec::new(),
            types: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }
}

/// 共享合约层。
///
/// # 契约说明（What）
/// - 启动期初始化一次，装载配置的合约归档列表；
/// - **全进程单版本**：同名类型以首个定义为准，后续归档中的冲突
///   定义被拒绝并告警（first wins）；
/// - 追踪自有包前缀集合，单元层据此决定是否强制上溯。
///
/// # 全局性与测试（Trade-offs）
/// - 单元命名空间在无运行时句柄的场景下也要触达合约层，因此保留
///   进程级单例（[`install_global`](Self::install_global)）；
/// - 测试必须能复位全局状态，提供 [`reset_global`](Self::reset_global)。
pub struct SharedContractSpace {
    types: DashMap<String, Arc<TypeDescriptor>>,
    prefixes: RwLock<Vec<String>>,
}

static GLOBAL: RwLock<Option<Arc<SharedContractSpace>>> = RwLock::new(None);

impl SharedContractSpace {
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
            prefixes: RwLock::new(Vec::new()),
        }
    }

    /// 装载一份合约归档；冲突类型 first-wins 并告警。
    pub fn load_archive(&self, archive: &ContractArchive) {
        for descriptor in &archive.types {
            let name = descriptor.name.clone();
            match self.types.entry(name) {
                dashmap::mapref::entry::Entry::Occupied(existing) => {
                    warn!(
                        type_name = %descriptor.name,
                        kept = %existing.get().origin,
                        rejected = %archive.name,
                        "conflicting contract definition rejected, first definition wins"
                    );
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(Arc::new(descriptor.clone()));
                }
            }
        }
        let mut prefixes = self.prefixes.write();
        for prefix in &archive.prefixes {
            if !prefixes.contains(prefix) {
                prefixes.push(prefix.clone());
            }
        }
        debug!(archive = %archive.name, types = archive.types.len(), "contract archive loaded");
    }

    /// 解析合约类型。
    pub fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// 名称是否落在合约层自有前缀内。
    pub fn owns_prefix(&self, name: &str) -> bool {
        self.prefixes.read().iter().any(|p| name.starts_with(p))
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// 安装为进程级单例；重复安装保留首个实例并告警。
    pub fn install_global(space: Arc<SharedContractSpace>) -> Arc<SharedContractSpace> {
        let mut global = GLOBAL.write();
        match global.as_ref() {
            Some(existing) => {
                warn!("shared contract space already initialized, keeping the first instance");
                Arc::clone(existing)
            }
            None => {
                *global = Some(Arc::clone(&space));
                space
            }
        }
    }

    /// 读取全局单例；未初始化时返回空的合约层并完成安装。
    pub fn global() -> Arc<SharedContractSpace> {
        if let Some(existing) = GLOBAL.read().as_ref() {
            return Arc::clone(existing);
        }
        Self::install_global(Arc::new(Self::new()))
    }

    /// 复位全局单例；仅测试使用。
    pub fn reset_global() {
        *GLOBAL.write() = None;
    }
}

impl Default for SharedContractSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, origin: &str) -> TypeDescriptor {
        TypeDescriptor::new(name, Some("1.0".into()), origin)
    }

    #[test]
    fn first_definition_wins() {
        let space = SharedContractSpace::new();
        space.load_archive(
            &ContractArchive::new("api-a.jar")
                .with_prefix("ling.contract.user.")
                .with_type(descriptor("ling.contract.user.UserService", "api-a.jar")),
        );
        space.load_archive(
            &ContractArchive::new("api-b.jar")
                .with_type(descriptor("ling.contract.user.UserService", "api-b.jar")),
        );
        let resolved = space.resolve("ling.contract.user.UserService").unwrap();
        assert_eq!(resolved.origin, "api-a.jar");
        assert_eq!(space.type_count(), 1);
    }

    #[test]
    fn prefix_ownership_tracked() {
        let space = SharedContractSpace::new();
        space.load_archive(&ContractArchive::new("api.jar").with_prefix("ling.contract.order."));
        assert!(space.owns_prefix("ling.contract.order.OrderService"));
        assert!(!space.owns_prefix("com.demo.OrderImpl"));
    }
}
