//! 内置策略提供者链，按序号从小到大依次仲裁：宿主规则、动态补丁、
//! 单元声明、方法元数据、名称推断。

use dashmap::DashMap;
use parking_lot::RwLock;

use ling_core::decision::{GovernanceDecision, infer_access_from_name, source_tags};
use ling_core::invocation::InvocationContext;
use ling_core::spi::{PolicyProvider, PolicyQuery};

use super::pattern::glob_match;

/// 宿主配置的模式化规则：最高优先级的权威覆盖。
#[derive(Clone, Debug)]
pub struct HostRule {
    /// 目标单元通配，如 `user*`。
    pub unit_pattern: String,
    pub method_pattern: String,
    pub decision: GovernanceDecision,
}

pub struct HostRuleProvider {
    rules: RwLock<Vec<HostRule>>,
}

impl HostRuleProvider {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn add_rule(&self, rule: HostRule) {
        self.rules.write().push(rule);
    }

    pub fn clear(&self) {
        self.rules.write().clear();
    }
}

impl Default for HostRuleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyProvider for HostRuleProvider {
    fn order(&self) -> i32 {
        0
    }

    fn tag(&self) -> &str {
        source_tags::HOST_RULE
    }

    fn resolve(
        &self,
        query: &PolicyQuery<'_>,
        ctx: &InvocationContext,
    ) -> Option<GovernanceDecision> {
        let unit = ctx.target.as_ref().map(|u| u.as_str()).unwrap_or("");
        self.rules
            .read()
            .iter()
            .find(|rule| {
                glob_match(&rule.unit_pattern, unit)
                    && glob_match(&rule.method_pattern, query.operation)
            })
            .map(|rule| rule.decision.clone())
    }
}

/// 动态补丁注册表：运行中热修复，仅次于宿主规则。
///
/// 键为 `unit-id:operation` 的精确定位；补丁决策整体替换式存取。
pub struct PatchRegistry {
    patches: DashMap<String, GovernanceDecision>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self {
            patches: DashMap::new(),
        }
    }

    fn key(unit: &str, operation: &str) -> String {
        format!("{unit}:{operation}")
    }

    /// 安放或覆盖一个补丁。
    pub fn put(&self, unit: &str, operation: &str, decision: GovernanceDecision) {
        self.patches.insert(Self::key(unit, operation), decision);
    }

    /// 移除补丁；不存在时为空操作。
    pub fn remove(&self, unit: &str, operation: &str) {
        self.patches.remove(&Self::key(unit, operation));
    }

    /// 移除单元名下全部补丁（卸载清理）。
    pub fn remove_unit(&self, unit: &str) {
        let prefix = format!("{unit}:");
        self.patches.retain(|key, _| !key.starts_with(&prefix));
    }
}

impl Default for PatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyProvider for PatchRegistry {
    fn order(&self) -> i32 {
        1
    }

    fn tag(&self) -> &str {
        source_tags::PATCH
    }

    fn resolve(
        &self,
        query: &PolicyQuery<'_>,
        ctx: &InvocationContext,
    ) -> Option<GovernanceDecision> {
        let unit = ctx.target.as_ref()?;
        self.patches
            .get(&Self::key(unit.as_str(), query.operation))
            .map(|entry| entry.value().clone())
    }
}

/// 单元自声明策略：清单 governance 段的权限与审计规则。
pub struct DefinitionPolicyProvider;

impl PolicyProvider for DefinitionPolicyProvider {
    fn order(&self) -> i32 {
        2
    }

    fn tag(&self) -> &str {
        source_tags::UNIT_POLICY
    }

    fn resolve(
        &self,
        query: &PolicyQuery<'_>,
        _ctx: &InvocationContext,
    ) -> Option<GovernanceDecision> {
        let definition = query.definition?;
        let governance = definition.governance();
        let mut decision = GovernanceDecision::new();
        if let Some(rule) = governance
            .permissions
            .iter()
            .find(|rule| glob_match(&rule.method_pattern, query.operation))
        {
            decision.required_permission = Some(rule.permission_id.clone());
        }
        if let Some(rule) = governance
            .audits
            .iter()
            .find(|rule| glob_match(&rule.method_pattern, query.operation))
        {
            decision.audit_enabled = Some(rule.enabled);
            decision.audit_action = rule.action.clone();
        }
        if decision.is_empty() {
            None
        } else {
            Some(decision)
        }
    }
}

/// 方法元数据声明：注册期随方法句柄附带的注解式信息。
pub struct MethodMetadataProvider;

impl PolicyProvider for MethodMetadataProvider {
    fn order(&self) -> i32 {
        3
    }

    fn tag(&self) -> &str {
        source_tags::METHOD_METADATA
    }

    fn resolve(
        &self,
        query: &PolicyQuery<'_>,
        _ctx: &InvocationContext,
    ) -> Option<GovernanceDecision> {
        let metadata = query.metadata?;
        if metadata.is_empty() {
            return None;
        }
        Some(GovernanceDecision {
            required_permission: metadata.permission.clone(),
            access_type: metadata.access,
            audit_enabled: metadata.audit_enabled,
            audit_action: metadata.audit_action.clone(),
            timeout: metadata.timeout,
            retry_count: metadata.retry_count,
            fallback_value: metadata.fallback_value.clone(),
            source_tag: None,
        })
    }
}

/// 名称前缀推断（链末兜底）：`<声明类型短名>:<ACCESS>`。
pub struct NameInferenceProvider;

impl PolicyProvider for NameInferenceProvider {
    fn order(&self) -> i32 {
        4
    }

    fn tag(&self) -> &str {
        source_tags::NAME_INFERENCE
    }

    fn resolve(
        &self,
        query: &PolicyQuery<'_>,
        _ctx: &InvocationContext,
    ) -> Option<GovernanceDecision> {
        let access = infer_access_from_name(query.operation);
        let short_name = query
            .declaring_type
            .rsplit('.')
            .next()
            .unwrap_or(query.declaring_type);
        Some(GovernanceDecision {
            required_permission: Some(format!("{short_name}:{}", access.as_str())),
            access_type: Some(access),
            ..Default::default()
        })
    }
}
