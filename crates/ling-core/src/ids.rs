//! 标识符契约：单元、服务、能力与链路追踪的受约束 ID 类型。
//!
//! # 设计动机（Why）
//! - 消除“字符串即 ID”的隐式耦合：路由缓存、权限表、审计记录都以
//!   标识符字符串为键（见所有权规则——缓存禁止持有命名空间引用），
//!   因此 ID 必须在构造期完成校验，而非在每个使用点重复防御；
//! - 与 [`crate::types::NonEmptyStr`] 搭配，保证 ID 不会退化为空串。
//!
//! # 集成方式（How）
//! - 推荐通过 [`crate::prelude`] 一次性引入；
//! - 生成 ID 时只需在落地前调用对应类型的 `parse` 完成契约校验。

use std::fmt;
use std::sync::Arc;

use crate::error::LingError;
use crate::types::NonEmptyStr;

/// 合约能力包的保留前缀；以其开头的能力对所有单元无条件放行。
pub const CONTRACT_CAPABILITY_PREFIX: &str = "ling.contract";

/// 单元标识，全局唯一；同一 `UnitId` 的多个活动定义必须版本互异。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(NonEmptyStr);

impl UnitId {
    /// 从原始字符串解析单元标识。
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self, LingError> {
        Ok(Self(NonEmptyStr::new(value)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 全限定服务标识（FQSID），形如 `unit-id:short-id`。
///
/// # 契约说明（What）
/// - **前置条件**：必须包含一个 `:` 分隔符，两侧均非空；
/// - **后置条件**：[`unit_part`](Self::unit_part) 与
///   [`short_part`](Self::short_part) 以零拷贝方式切出两段；
/// - 协议注册表保证任一时刻一个 FQSID 至多归属一个单元。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqsid(NonEmptyStr);

impl Fqsid {
    /// 解析完整的 FQSID 字符串；缺少分隔符或任一侧为空时拒绝。
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self, LingError> {
        let inner = NonEmptyStr::new(value)?;
        match inner.as_str().split_once(':') {
            Some((unit, short)) if !unit.trim().is_empty() && !short.trim().is_empty() => {
                Ok(Self(inner))
            }
            _ => Err(LingError::invalid_argument(format!(
                "fqsid `{inner}` must take the form `unit-id:short-id`"
            ))),
        }
    }

    /// 由单元标识与短服务名拼装 FQSID。
    pub fn compose(unit: &UnitId, short_id: &str) -> Result<Self, LingError> {
        Self::parse(format!("{}:{short_id}", unit.as_str()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// FQSID 的单元段。
    pub fn unit_part(&self) -> &str {
        self.as_str()
            .split_once(':')
            .map(|(unit, _)| unit)
            .unwrap_or_default()
    }

    /// FQSID 的短服务名段。
    pub fn short_part(&self) -> &str {
        self.as_str()
            .split_once(':')
            .map(|(_, short)| short)
            .unwrap_or_default()
    }
}

impl fmt::Display for Fqsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 受保护操作的能力标识，如 `storage:sql`、`cache:redis`、`ipc:<unit>`。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(NonEmptyStr);

impl Capability {
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self, LingError> {
        Ok(Self(NonEmptyStr::new(value)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// 是否属于合约能力包；合约方法不可被权限门禁拦截。
    pub fn is_contract(&self) -> bool {
        self.as_str().starts_with(CONTRACT_CAPABILITY_PREFIX)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 链路追踪标识；进程生命周期内唯一即可，无需全局唯一。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(NonEmptyStr);

impl TraceId {
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self, LingError> {
        Ok(Self(NonEmptyStr::new(value)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqsid_requires_two_segments() {
        assert!(Fqsid::parse("user:get_user").is_ok());
        assert!(Fqsid::parse("user").is_err());
        assert!(Fqsid::parse(":get_user").is_err());
        assert!(Fqsid::parse("user:").is_err());
    }

    #[test]
    fn fqsid_splits_parts() {
        let unit = UnitId::parse("user").unwrap();
        let fqsid = Fqsid::compose(&unit, "get_user").unwrap();
        assert_eq!(fqsid.unit_part(), "user");
        assert_eq!(fqsid.short_part(), "get_user");
        assert_eq!(fqsid.as_str(), "user:get_user");
    }

    #[test]
    fn contract_capability_prefix_detected() {
        assert!(Capability::parse("ling.contract:any").unwrap().is_contract());
        assert!(!Capability::parse("storage:sql").unwrap().is_contract());
    }
}
