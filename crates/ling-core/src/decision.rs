//! 治理决策模型：每次跨界调用合并出的策略记录。
//!
//! # 设计动机（Why）
//! - 决策由优先级有序的策略提供者链逐个贡献（宿主规则 → 动态补丁 →
//!   单元声明 → 方法元数据 → 名称前缀推断 → 兜底常量）；低序号先行，
//!   **先填充者胜**——后续提供者只能补齐仍然缺失的字段；
//! - 以“部分决策 + 合并”而非深继承层次建模，提供者之间互不感知。
//!
//! # 契约说明（What）
//! - [`GovernanceDecision`]：全字段可选的部分决策；
//! - [`ResolvedDecision`]：经 [`GovernanceDecision::finalize`] 施加兜底
//!   常量后的完整决策，进入权限检查与执行器；
//! - 审计的隐式规则：WRITE/EXECUTE 默认开启审计，READ 默认关闭。

use std::time::Duration;

use crate::types::AccessType;

/// 兜底权限字符串，任何提供者都未给出要求时生效。
pub const DEFAULT_PERMISSION: &str = "default:execute";

/// 决策来源标签，写入权限拒绝错误与审计记录。
pub mod source_tags {
    pub const HOST_RULE: &str = "host-rule";
    pub const PATCH: &str = "patch";
    pub const UNIT_POLICY: &str = "unit-policy";
    pub const METHOD_METADATA: &str = "method-metadata";
    pub const NAME_INFERENCE: &str = "name-inference";
    pub const DEFAULT: &str = "default";
}

/// 依据方法名前缀推断访问类型（链末兜底推断）。
///
/// # 推断表
/// - `get/find/query/list/select/count/check/is/has` → READ；
/// - `create/save/insert/update/modify/delete/remove/add/set` → WRITE；
/// - 其余 → EXECUTE。
pub fn infer_access_from_name(method: &str) -> AccessType {
    const READ_PREFIXES: [&str; 9] = [
        "get", "find", "query", "list", "select", "count", "check", "is", "has",
    ];
    const WRITE_PREFIXES: [&str; 9] = [
        "create", "save", "insert", "update", "modify", "delete", "remove", "add", "set",
    ];
    if READ_PREFIXES.iter().any(|p| method.starts_with(p)) {
        AccessType::Read
    } else if WRITE_PREFIXES.iter().any(|p| method.starts_with(p)) {
        AccessType::Write
    } else {
        AccessType::Execute
    }
}

/// 部分治理决策；提供者返回 `None` 表示“无意见”。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GovernanceDecision {
    pub required_permission: Option<String>,
    pub access_type: Option<AccessType>,
    pub audit_enabled: Option<bool>,
    pub audit_action: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
    pub fallback_value: Option<serde_json::Value>,
    pub source_tag: Option<String>,
}

impl GovernanceDecision {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否尚未贡献任何字段。
    pub fn is_empty(&self) -> bool {
        self.required_permission.is_none()
            && self.access_type.is_none()
            && self.audit_enabled.is_none()
            && self.audit_action.is_none()
            && self.timeout.is_none()
            && self.retry_count.is_none()
            && self.fallback_value.is_none()
    }

    /// 用 `other` 补齐本决策仍然缺失的字段（先填充者胜）。
    ///
    /// # 合并规则
    /// - 已填字段一律保留，调用方显式设定的值因此永不被覆盖；
    /// - 首个填入 `required_permission` 或 `access_type` 的提供者同时
    ///   烙下 `source_tag`，供权限拒绝时定位规则出处。
    pub fn merge_missing(&mut self, other: &GovernanceDecision, tag: &str) {
        let fills_permission = self.required_permission.is_none()
            && other.required_permission.is_some();
        let fills_access = self.access_type.is_none() && other.access_type.is_some();

        if fills_permission {
            self.required_permission = other.required_permission.clone();
        }
        if fills_access {
            self.access_type = other.access_type;
        }
        if self.audit_enabled.is_none() {
            self.audit_enabled = other.audit_enabled;
        }
        if self.audit_action.is_none() {
            self.audit_action = other.audit_action.clone();
        }
        if self.timeout.is_none() {
            self.timeout = other.timeout;
        }
        if self.retry_count.is_none() {
            self.retry_count = other.retry_count;
        }
        if self.fallback_value.is_none() {
            self.fallback_value = other.fallback_value.clone();
        }
        if self.source_tag.is_none() && (fills_permission || fills_access) {
            self.source_tag = Some(tag.to_owned());
        }
    }

    /// 决策的核心字段（权限 + 访问类型）是否都已敲定。
    pub fn is_settled(&self) -> bool {
        self.required_permission.is_some() && self.access_type.is_some()
    }

    /// 全部字段是否都已填充；管道据此提前收束。
    pub fn is_complete(&self) -> bool {
        self.required_permission.is_some()
            && self.access_type.is_some()
            && self.audit_enabled.is_some()
            && self.audit_action.is_some()
            && self.timeout.is_some()
            && self.retry_count.is_some()
            && self.fallback_value.is_some()
    }

    /// 施加兜底常量，产出完整决策。
    ///
    /// # 兜底规则
    /// - 权限缺失 → [`DEFAULT_PERMISSION`] + EXECUTE；
    /// - 审计开关缺失 → WRITE/EXECUTE 隐式开启，READ 关闭；
    /// - 超时/重试缺失 → 取宿主配置给出的缺省值。
    pub fn finalize(self, default_timeout: Duration) -> ResolvedDecision {
        let access = self.access_type.unwrap_or(AccessType::Execute);
        let audit_enabled = self
            .audit_enabled
            .unwrap_or(access >= AccessType::Write);
        ResolvedDecision {
            required_permission: self
                .required_permission
                .unwrap_or_else(|| DEFAULT_PERMISSION.to_owned()),
            access_type: access,
            audit_enabled,
            audit_action: self.audit_action.unwrap_or_default(),
            timeout: self.timeout.unwrap_or(default_timeout),
            retry_count: self.retry_count.unwrap_or(0),
            fallback_value: self.fallback_value,
            source_tag: self
                .source_tag
                .unwrap_or_else(|| source_tags::DEFAULT.to_owned()),
        }
    }
}

/// 完整治理决策，权限检查与调用执行器的直接输入。
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDecision {
    pub required_permission: String,
    pub access_type: AccessType,
    pub audit_enabled: bool,
    pub audit_action: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub fallback_value: Option<serde_json::Value>,
    pub source_tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_inference_table() {
        assert_eq!(infer_access_from_name("getUser"), AccessType::Read);
        assert_eq!(infer_access_from_name("listOrders"), AccessType::Read);
        assert_eq!(infer_access_from_name("isActive"), AccessType::Read);
        assert_eq!(infer_access_from_name("saveUser"), AccessType::Write);
        assert_eq!(infer_access_from_name("deleteAll"), AccessType::Write);
        assert_eq!(infer_access_from_name("setFlag"), AccessType::Write);
        assert_eq!(infer_access_from_name("transfer"), AccessType::Execute);
    }

    #[test]
    fn first_filler_wins() {
        let mut merged = GovernanceDecision::new();
        let p0 = GovernanceDecision {
            access_type: Some(AccessType::Read),
            ..Default::default()
        };
        merged.merge_missing(&p0, source_tags::HOST_RULE);

        let p2 = GovernanceDecision {
            required_permission: Some("user:READ".into()),
            access_type: Some(AccessType::Write),
            retry_count: Some(2),
            ..Default::default()
        };
        merged.merge_missing(&p2, source_tags::UNIT_POLICY);

        // 访问类型由先行的宿主规则敲定，单元声明只能补上权限与重试。
        assert_eq!(merged.access_type, Some(AccessType::Read));
        assert_eq!(merged.required_permission.as_deref(), Some("user:READ"));
        assert_eq!(merged.retry_count, Some(2));
        assert_eq!(merged.source_tag.as_deref(), Some(source_tags::HOST_RULE));
    }

    #[test]
    fn finalize_applies_failsafe() {
        let resolved = GovernanceDecision::new().finalize(Duration::from_millis(500));
        assert_eq!(resolved.required_permission, DEFAULT_PERMISSION);
        assert_eq!(resolved.access_type, AccessType::Execute);
        assert!(resolved.audit_enabled, "EXECUTE 隐式开启审计");
        assert_eq!(resolved.retry_count, 0);
        assert_eq!(resolved.source_tag, source_tags::DEFAULT);
    }

    #[test]
    fn read_not_audited_unless_enabled() {
        let decision = GovernanceDecision {
            access_type: Some(AccessType::Read),
            ..Default::default()
        };
        assert!(!decision.finalize(Duration::from_secs(1)).audit_enabled);

        let decision = GovernanceDecision {
            access_type: Some(AccessType::Read),
            audit_enabled: Some(true),
            ..Default::default()
        };
        assert!(decision.finalize(Duration::from_secs(1)).audit_enabled);
    }
}
