//! 权限服务：内存 ACL 表与访问格判定。

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::debug;

use ling_core::ids::Capability;
use ling_core::types::AccessType;

/// 权限服务。
///
/// # 契约说明（What）
/// - 表结构 `unit-id → (capability → access)`；`revoke` 置 NONE 而非
///   删除行，授权历史由审计承载；
/// - 白名单：合约前缀能力一律放行——合约方法不可被权限门禁拦截；
/// - 判定使用访问格：授予不低于要求即放行。
///
/// # 并发（How）
/// - 外层 `DashMap` 分段锁；单元内能力表整体替换式更新，读多写少。
pub struct PermissionService {
    table: DashMap<String, BTreeMap<String, AccessType>>,
}

impl PermissionService {
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// 授予能力；重复授予幂等覆盖。
    pub fn grant(&self, unit: &str, capability: &str, access: AccessType) {
        self.table
            .entry(unit.to_owned())
            .or_default()
            .insert(capability.to_owned(), access);
        debug!(unit, capability, access = access.as_str(), "permission granted");
    }

    /// 撤销能力（置 NONE）。
    pub fn revoke(&self, unit: &str, capability: &str) {
        if let Some(mut row) = self.table.get_mut(unit) {
            row.insert(capability.to_owned(), AccessType::None);
        }
    }

    /// 查询授予级别；未授予返回 NONE。
    pub fn get_permission(&self, unit: &str, capability: &str) -> AccessType {
        self.table
            .get(unit)
            .and_then(|row| row.get(capability).copied())
            .unwrap_or(AccessType::None)
    }

    /// 判定 `caller` 对 `capability` 是否满足 `required`。
    pub fn is_allowed(&self, caller: &str, capability: &Capability, required: AccessType) -> bool {
        if capability.is_contract() {
            return true;
        }
        self.get_permission(caller, capability.as_str())
            .satisfies(required)
    }

    /// 移除单元的整行授权；卸载序列调用。
    pub fn remove_unit(&self, unit: &str) {
        self.table.remove(unit);
    }
}

impl Default for PermissionService {
    fn default() -> Self {
        Self::new()
    }
}
