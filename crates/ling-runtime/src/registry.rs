//! 服务注册表：协议级 `fqsid → unit-id` 归属表与单元服务表。
//!
//! # 不变量（What）
//! - 任一时刻一个 FQSID 至多归属一个单元；重复注册覆盖旧记录并
//!   记录冲突日志；
//! - 两张表都以标识符字符串为键，不持有任何命名空间引用。

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use ling_core::ids::{Fqsid, UnitId};
use ling_core::spi::{BeanRef, ServiceMethod};
use ling_core::types::AccessType;

use ling_core::decision::infer_access_from_name;

/// 一条服务记录：FQSID、归属单元、bean 引用与方法句柄。
pub struct ServiceRecord {
    pub fqsid: Fqsid,
    pub unit_id: UnitId,
    pub bean: BeanRef,
    pub method: Arc<ServiceMethod>,
    /// 注册期敲定的声明访问类型：显式元数据优先，缺省按名称推断。
    pub declared_access: AccessType,
}

impl ServiceRecord {
    pub fn new(fqsid: Fqsid, unit_id: UnitId, bean: BeanRef, method: ServiceMethod) -> Self {
        let declared_access = method
            .metadata
            .access
            .unwrap_or_else(|| infer_access_from_name(&method.short_id));
        Self {
            fqsid,
            unit_id,
            bean,
            method: Arc::new(method),
            declared_access,
        }
    }
}

/// 协议注册表：全局 FQSID 归属。
pub struct ProtocolRegistry {
    owners: DashMap<String, String>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            owners: DashMap::new(),
        }
    }

    /// 登记归属；归属变更视为冲突，覆盖并告警。
    pub fn register(&self, fqsid: &Fqsid, unit: &UnitId) {
        if let Some(previous) = self
            .owners
            .insert(fqsid.as_str().to_owned(), unit.as_str().to_owned())
        {
            if previous != unit.as_str() {
                warn!(
                    fqsid = %fqsid,
                    previous = %previous,
                    new = %unit,
                    "fqsid ownership conflict, re-registration overwrites"
                );
            }
        }
    }

    pub fn owner_of(&self, fqsid: &str) -> Option<String> {
        self.owners.get(fqsid).map(|entry| entry.value().clone())
    }

    /// 移除单元名下的全部归属。
    pub fn remove_unit(&self, unit: &UnitId) {
        self.owners
            .retain(|_, owner| owner.as_str() != unit.as_str());
    }

    /// 仅当归属仍指向 `unit` 时移除单条记录（安装回滚用）。
    pub fn remove_if_owner(&self, fqsid: &str, unit: &UnitId) {
        self.owners
            .remove_if(fqsid, |_, owner| owner == unit.as_str());
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 单元服务表：`fqsid → 可调用记录`。
pub struct ServiceTable {
    records: DashMap<String, Arc<ServiceRecord>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// 插入记录；同名覆盖并记录冲突。
    pub fn insert(&self, record: ServiceRecord) {
        let key = record.fqsid.as_str().to_owned();
        if self.records.insert(key, Arc::new(record)).is_some() {
            warn!("service table re-registration overwrites existing record");
        }
    }

    pub fn remove(&self, fqsid: &str) {
        self.records.remove(fqsid);
    }

    pub fn contains(&self, fqsid: &str) -> bool {
        self.records.contains_key(fqsid)
    }

    pub fn get(&self, fqsid: &str) -> Option<Arc<ServiceRecord>> {
        self.records.get(fqsid).map(|entry| Arc::clone(entry.value()))
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn fqsids(&self) -> Vec<String> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ServiceTable {
    fn default() -> Self {
        Self::new()
    }
}
