//! 调用上下文：单次跨界调用的可变元数据载体。
//!
//! # 设计动机（Why）
//! - 治理内核、执行器与审计管道共享同一份调用元数据；集中在一个
//!   结构上富化，避免在层间传递零散参数；
//! - 路由代理按线程复用上下文对象以削减分配，调用结束后必须通过
//!   [`InvocationContext::reset`] 清空大字段（参数、标签）。

use crate::decision::GovernanceDecision;
use crate::ids::{TraceId, UnitId};
use crate::types::{LabelSet, ResourceKind};

/// 跨单元边界的参数与返回值统一使用 JSON 值表达。
pub type Value = serde_json::Value;

/// 单次调用的可变记录。
///
/// # 契约说明（What）
/// - `caller`/`target` 为单元标识；宿主发起的调用 `caller` 可为空；
/// - `resource_id` 通常为 FQSID 字符串或受保护资源描述（如 SQL 摘要）；
/// - `decision` 在治理管道仲裁后富化——调用方显式预设的字段不会被
///   提供者覆盖（见 [`GovernanceDecision::merge_missing`] 的先填充者胜）。
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    pub trace_id: Option<TraceId>,
    pub caller: Option<UnitId>,
    pub target: Option<UnitId>,
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    pub operation: String,
    pub args: Vec<Value>,
    pub labels: LabelSet,
    pub decision: GovernanceDecision,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置调用基本要素，路由代理在每次调用前调用。
    pub fn prepare(
        &mut self,
        caller: Option<UnitId>,
        target: UnitId,
        operation: impl Into<String>,
        args: Vec<Value>,
    ) {
        self.caller = caller;
        self.target = Some(target);
        self.operation = operation.into();
        self.args = args;
    }

    /// 调用收尾：清空大字段，保留结构本体以供线程内复用。
    pub fn reset(&mut self) {
        self.trace_id = None;
        self.caller = None;
        self.target = None;
        self.resource_kind = ResourceKind::default();
        self.resource_id.clear();
        self.operation.clear();
        self.args = Vec::new();
        self.labels.clear();
        self.decision = GovernanceDecision::default();
    }

    /// 权限检查的主体：调用方缺席时回退为目标单元。
    pub fn permission_subject(&self) -> Option<&UnitId> {
        self.caller.as_ref().or(self.target.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_large_fields() {
        let mut ctx = InvocationContext::new();
        ctx.prepare(
            None,
            UnitId::parse("user").unwrap(),
            "get_user",
            vec![Value::from(42)],
        );
        ctx.labels.insert("version", "v2");
        ctx.reset();
        assert!(ctx.args.is_empty());
        assert!(ctx.labels.is_empty());
        assert!(ctx.target.is_none());
        assert!(ctx.operation.is_empty());
    }

    #[test]
    fn permission_subject_falls_back_to_target() {
        let mut ctx = InvocationContext::new();
        let target = UnitId::parse("user").unwrap();
        ctx.prepare(None, target.clone(), "get_user", Vec::new());
        assert_eq!(ctx.permission_subject(), Some(&target));

        let caller = UnitId::parse("order").unwrap();
        ctx.caller = Some(caller.clone());
        assert_eq!(ctx.permission_subject(), Some(&caller));
    }
}
