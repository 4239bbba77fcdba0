//! 治理内核：每次跨界调用的决策仲裁、权限检查、重试回退与审计。
//!
//! # 每次调用的流程（How）
//! 1. 根检测：无活动链路则开启新链路，嵌套调用继承并递增深度，
//!    发射 ingress 追踪事件；
//! 2. 仲裁：按优先级走提供者链合并部分决策（先填充者胜，调用方
//!    显式设定的字段不被覆盖），施加兜底常量；
//! 3. 权限检查：恒以调用方为主体（缺席回退目标）；拒绝携带
//!    `(调用方, 能力, 要求级别, 规则来源)`；
//! 4. 重试：非权限类可重试错误至多 `retry-count` 次；
//! 5. 回退：重试耗尽且决策含回退值时以回退值收束，按“已处理
//!    失败”记账；
//! 6. egress 追踪事件（RETURN / FALLBACK / ERROR）；
//! 7. 审计开启时异步提交记录；
//! 8. 深度递减，根出口清理链路状态。
//!
//! # 开发模式（What）
//! - 进程级开关：权限拒绝改为醒目告警后放行；
//! - 审计记录呈现真实判定（`DENIED`）与旁路标记，放行事实不可
//!   在审计里被伪装成批准。

mod pattern;
mod providers;

pub use pattern::glob_match;
pub use providers::{
    DefinitionPolicyProvider, HostRule, HostRuleProvider, MethodMetadataProvider,
    NameInferenceProvider, PatchRegistry,
};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use ling_core::audit::{AuditOutcome, AuditRecord};
use ling_core::config::LingConfig;
use ling_core::decision::ResolvedDecision;
use ling_core::ids::Capability;
use ling_core::invocation::{InvocationContext, Value};
use ling_core::spi::{PolicyProvider, PolicyQuery};
use ling_core::{LingError, Result};

use crate::audit::AuditPipeline;
use crate::permission::PermissionService;
use crate::trace::TraceContext;

enum PermissionVerdict {
    Allowed,
    DevBypassed,
    Denied(LingError),
}

pub struct GovernanceKernel {
    providers: RwLock<Vec<Arc<dyn PolicyProvider>>>,
    host_rules: Arc<HostRuleProvider>,
    patches: Arc<PatchRegistry>,
    permission: Arc<PermissionService>,
    audit: Arc<AuditPipeline>,
    config: Arc<LingConfig>,
}

impl GovernanceKernel {
    pub fn new(
        permission: Arc<PermissionService>,
        audit: Arc<AuditPipeline>,
        config: Arc<LingConfig>,
    ) -> Self {
        let host_rules = Arc::new(HostRuleProvider::new());
        let patches = Arc::new(PatchRegistry::new());
        let mut providers: Vec<Arc<dyn PolicyProvider>> = vec![
            Arc::clone(&host_rules) as _,
            Arc::clone(&patches) as _,
            Arc::new(DefinitionPolicyProvider) as _,
            Arc::new(MethodMetadataProvider) as _,
            Arc::new(NameInferenceProvider) as _,
        ];
        providers.sort_by_key(|p| p.order());
        Self {
            providers: RwLock::new(providers),
            host_rules,
            patches,
            permission,
            audit,
            config,
        }
    }

    /// 宿主规则入口（序号 0）。
    pub fn host_rules(&self) -> &Arc<HostRuleProvider> {
        &self.host_rules
    }

    /// 动态补丁入口（序号 1）。
    pub fn patches(&self) -> &Arc<PatchRegistry> {
        &self.patches
    }

    pub fn permission_service(&self) -> &Arc<PermissionService> {
        &self.permission
    }

    /// 注册宿主扩展提供者；链按 order 重新排序。
    pub fn register_provider(&self, provider: Arc<dyn PolicyProvider>) {
        let mut providers = self.providers.write();
        providers.push(provider);
        providers.sort_by_key(|p| p.order());
    }

    /// 走提供者链合并部分决策；调用方显式预设的字段先行占位。
    fn merge_chain(
        &self,
        query: &PolicyQuery<'_>,
        ctx: &InvocationContext,
    ) -> ling_core::decision::GovernanceDecision {
        let mut merged = ctx.decision.clone();
        let providers: Vec<Arc<dyn PolicyProvider>> = self.providers.read().clone();
        for provider in providers {
            if merged.is_complete() {
                break;
            }
            let tag = provider.tag().to_owned();
            match panic::catch_unwind(AssertUnwindSafe(|| provider.resolve(query, ctx))) {
                Ok(Some(partial)) => merged.merge_missing(&partial, &tag),
                Ok(None) => {}
                Err(_) => {
                    // 提供者故障按非致命处理，管道继续。
                    warn!(order = provider.order(), tag = %tag, "policy provider panicked, skipped");
                }
            }
        }
        merged
    }

    /// 仲裁决策：走提供者链并施加兜底。
    pub fn arbitrate(
        &self,
        query: &PolicyQuery<'_>,
        ctx: &InvocationContext,
    ) -> ResolvedDecision {
        self.merge_chain(query, ctx)
            .finalize(Duration::from_millis(self.config.runtime.default_timeout))
    }

    fn check_permission(
        &self,
        ctx: &InvocationContext,
        decision: &ResolvedDecision,
    ) -> PermissionVerdict {
        let capability = match Capability::parse(decision.required_permission.as_str()) {
            Ok(capability) => capability,
            Err(err) => return PermissionVerdict::Denied(err),
        };
        if capability.is_contract() {
            return PermissionVerdict::Allowed;
        }
        let subject = match ctx.permission_subject() {
            Some(unit) => unit.as_str().to_owned(),
            None => {
                // 纯宿主调用：按全局配置决定是否纳入权限检查。
                if !self.config.host_governance.check_permissions {
                    return PermissionVerdict::Allowed;
                }
                "host".to_owned()
            }
        };
        if self
            .permission
            .is_allowed(&subject, &capability, decision.access_type)
        {
            return PermissionVerdict::Allowed;
        }
        if self.config.dev_mode {
            warn!(
                caller = %subject,
                capability = %capability,
                required = decision.access_type.as_str(),
                rule = %decision.source_tag,
                "DEV-MODE BYPASS: permission denied but allowed"
            );
            return PermissionVerdict::DevBypassed;
        }
        PermissionVerdict::Denied(LingError::PermissionDenied {
            caller: subject,
            capability: capability.as_str().to_owned(),
            required: decision.access_type,
            source_tag: decision.source_tag.clone(),
        })
    }

    /// 包裹一次跨界调用的完整治理流程。
    ///
    /// `execute` 为实际执行体（路由选择 + 执行器），每次重试调用一次。
    pub fn invoke<F>(
        &self,
        ctx: &mut InvocationContext,
        query: &PolicyQuery<'_>,
        execute: F,
    ) -> Result<Option<Value>>
    where
        F: Fn(&InvocationContext, &ResolvedDecision) -> Result<Value>,
    {
        let token = TraceContext::begin_invocation();
        ctx.trace_id = Some(token.trace_id.clone());
        debug!(
            trace_id = %token.trace_id,
            caller = ctx.caller.as_ref().map(|u| u.as_str()).unwrap_or("host"),
            target = ctx.target.as_ref().map(|u| u.as_str()).unwrap_or("-"),
            resource = ctx.resource_kind.as_str(),
            depth = token.depth,
            "ingress"
        );

        // 富化调用上下文：合并后的部分决策写回，调用方预设字段不被覆盖。
        let merged = self.merge_chain(query, ctx);
        let decision = merged
            .clone()
            .finalize(Duration::from_millis(self.config.runtime.default_timeout));
        ctx.decision = merged;
        let verdict = self.check_permission(ctx, &decision);
        let dev_bypass = matches!(verdict, PermissionVerdict::DevBypassed);

        let started = Instant::now();
        let executed = match verdict {
            PermissionVerdict::Denied(err) => Err(err),
            PermissionVerdict::Allowed | PermissionVerdict::DevBypassed => {
                let mut attempt: u32 = 0;
                loop {
                    match execute(ctx, &decision) {
                        Ok(value) => break Ok(value),
                        Err(err) if err.is_permission_denied() => break Err(err),
                        Err(err)
                            if err.category() == ling_core::ErrorCategory::Retryable
                                && attempt < decision.retry_count =>
                        {
                            attempt += 1;
                            warn!(
                                trace_id = %token.trace_id,
                                attempt,
                                max = decision.retry_count,
                                error = %err,
                                "invocation retry"
                            );
                        }
                        Err(err) => break Err(err),
                    }
                }
            }
        };
        let cost = started.elapsed();

        let mut audit_outcome = match &executed {
            Ok(_) => AuditOutcome::Success,
            Err(err) if err.is_permission_denied() => AuditOutcome::Denied,
            Err(_) => AuditOutcome::Error,
        };
        let result = match executed {
            Err(err)
                if !err.is_permission_denied() && decision.fallback_value.is_some() =>
            {
                audit_outcome = AuditOutcome::HandledFailure;
                warn!(
                    trace_id = %token.trace_id,
                    error = %err,
                    "retries exhausted, returning fallback value"
                );
                Ok(decision.fallback_value.clone())
            }
            Err(err) => Err(err),
            Ok(value) => Ok(Some(value)),
        };

        let egress = match (&result, audit_outcome) {
            (Ok(_), AuditOutcome::HandledFailure) => "FALLBACK",
            (Ok(_), _) => "RETURN",
            (Err(_), _) => "ERROR",
        };
        debug!(trace_id = %token.trace_id, egress, depth = token.depth, "egress");

        // 开发模式旁路的审计呈现真实判定。
        if dev_bypass {
            audit_outcome = AuditOutcome::Denied;
        }
        if decision.audit_enabled || audit_outcome == AuditOutcome::Denied {
            let action = if decision.audit_action.is_empty() {
                ctx.operation.clone()
            } else {
                decision.audit_action.clone()
            };
            let mut record = AuditRecord::new(
                token.trace_id.as_str(),
                ctx.caller.as_ref().map(|u| u.as_str()).unwrap_or("host"),
                action,
                ctx.resource_id.clone(),
                cost.as_nanos() as u64,
                audit_outcome,
            );
            if dev_bypass {
                record = record.with_dev_bypass();
            }
            if let Some(Value::String(detail)) = ctx.args.first() {
                record = record.with_detail(detail.clone());
            }
            self.audit.submit(record);
        }

        TraceContext::end_invocation(token);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use ling_core::decision::{GovernanceDecision, source_tags};
    use ling_core::ids::UnitId;
    use ling_core::spi::MethodMetadata;
    use ling_core::types::AccessType;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn kernel(config: LingConfig) -> GovernanceKernel {
        let bus = Arc::new(EventBus::new());
        GovernanceKernel::new(
            Arc::new(PermissionService::new()),
            AuditPipeline::new(1_000, bus),
            Arc::new(config),
        )
    }

    fn ctx(caller: Option<&str>, target: &str, operation: &str) -> InvocationContext {
        let mut ctx = InvocationContext::new();
        ctx.caller = caller.map(|c| UnitId::parse(c).unwrap());
        ctx.target = Some(UnitId::parse(target).unwrap());
        ctx.operation = operation.to_owned();
        ctx.resource_id = format!("{target}:{operation}");
        ctx
    }

    #[test]
    fn chain_priority_and_failsafe() {
        let kernel = kernel(LingConfig::default());
        let ctx = ctx(Some("order"), "user", "transfer");
        let query = PolicyQuery {
            operation: "transfer",
            declaring_type: "com.demo.user.UserService",
            metadata: None,
            definition: None,
        };
        let decision = kernel.arbitrate(&query, &ctx);
        // 名称推断：transfer 非读写前缀，落到 EXECUTE。
        assert_eq!(decision.access_type, AccessType::Execute);
        assert_eq!(decision.required_permission, "UserService:EXECUTE");
        assert_eq!(decision.source_tag, source_tags::NAME_INFERENCE);
        assert!(decision.audit_enabled, "EXECUTE 隐式审计");
    }

    #[test]
    fn patch_overrides_metadata() {
        let kernel = kernel(LingConfig::default());
        kernel.patches().put(
            "user",
            "get_user",
            GovernanceDecision {
                retry_count: Some(7),
                ..Default::default()
            },
        );
        let metadata = MethodMetadata {
            retry_count: Some(1),
            ..Default::default()
        };
        let ctx = ctx(Some("order"), "user", "get_user");
        let query = PolicyQuery {
            operation: "get_user",
            declaring_type: "UserService",
            metadata: Some(&metadata),
            definition: None,
        };
        assert_eq!(kernel.arbitrate(&query, &ctx).retry_count, 7, "低序号先行");
    }

    #[test]
    fn denied_caller_gets_rule_source() {
        let kernel = kernel(LingConfig::default());
        kernel.permission_service().grant("b", "storage:sql", AccessType::Read);
        let metadata = MethodMetadata {
            permission: Some("storage:sql".into()),
            access: Some(AccessType::Write),
            ..Default::default()
        };
        let mut ctx = ctx(Some("b"), "storage", "write_rows");
        let query = PolicyQuery {
            operation: "write_rows",
            declaring_type: "SqlGateway",
            metadata: Some(&metadata),
            definition: None,
        };
        let err = kernel
            .invoke(&mut ctx, &query, |_, _| Ok(Value::Null))
            .unwrap_err();
        match err {
            LingError::PermissionDenied {
                caller,
                capability,
                required,
                source_tag,
            } => {
                assert_eq!(caller, "b");
                assert_eq!(capability, "storage:sql");
                assert_eq!(required, AccessType::Write);
                assert_eq!(source_tag, source_tags::METHOD_METADATA);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dev_mode_bypasses_but_executes() {
        let config = LingConfig {
            dev_mode: true,
            ..LingConfig::default()
        };
        let kernel = kernel(config);
        let metadata = MethodMetadata {
            permission: Some("storage:sql".into()),
            access: Some(AccessType::Write),
            ..Default::default()
        };
        let mut ctx = ctx(Some("b"), "storage", "write_rows");
        let query = PolicyQuery {
            operation: "write_rows",
            declaring_type: "SqlGateway",
            metadata: Some(&metadata),
            definition: None,
        };
        let result = kernel
            .invoke(&mut ctx, &query, |_, _| Ok(Value::from("written")))
            .unwrap();
        assert_eq!(result, Some(Value::from("written")));
    }

    #[test]
    fn retry_then_success() {
        let kernel = kernel(LingConfig::default());
        let metadata = MethodMetadata {
            retry_count: Some(2),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let mut ctx = ctx(Some("order"), "user", "get_user");
        let query = PolicyQuery {
            operation: "get_user",
            declaring_type: "UserService",
            metadata: Some(&metadata),
            definition: None,
        };
        let result = kernel
            .invoke(&mut ctx, &query, |_, _| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LingError::InvocationFailure {
                        message: "transient".into(),
                    })
                } else {
                    Ok(Value::from("OK"))
                }
            })
            .unwrap();
        assert_eq!(result, Some(Value::from("OK")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3, "两次重试后成功");
    }

    #[test]
    fn exhausted_retries_fall_back() {
        let kernel = kernel(LingConfig::default());
        let metadata = MethodMetadata {
            retry_count: Some(2),
            fallback_value: Some(Value::from("X")),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let mut ctx = ctx(Some("order"), "user", "get_user");
        let query = PolicyQuery {
            operation: "get_user",
            declaring_type: "UserService",
            metadata: Some(&metadata),
            definition: None,
        };
        let result = kernel
            .invoke(&mut ctx, &query, |_, _| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LingError::InvocationFailure {
                    message: "permanent".into(),
                })
            })
            .unwrap();
        assert_eq!(result, Some(Value::from("X")), "回退值兜底");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn permission_errors_never_retried() {
        let kernel = kernel(LingConfig::default());
        let metadata = MethodMetadata {
            retry_count: Some(5),
            permission: Some("ling.contract:open".into()),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let mut ctx = ctx(Some("order"), "user", "get_user");
        let query = PolicyQuery {
            operation: "get_user",
            declaring_type: "UserService",
            metadata: Some(&metadata),
            definition: None,
        };
        let err = kernel
            .invoke(&mut ctx, &query, |_, _| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LingError::PermissionDenied {
                    caller: "order".into(),
                    capability: "storage:sql".into(),
                    required: AccessType::Write,
                    source_tag: "nested".into(),
                })
            })
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "权限错误不重试");
    }

    #[test]
    fn trace_cleared_on_root_exit() {
        TraceContext::clear();
        let kernel = kernel(LingConfig::default());
        let mut ctx = ctx(Some("order"), "user", "get_user");
        let query = PolicyQuery {
            operation: "get_user",
            declaring_type: "UserService",
            metadata: None,
            definition: None,
        };
        kernel
            .invoke(&mut ctx, &query, |_, _| Ok(Value::Null))
            .unwrap();
        assert!(TraceContext::current_trace_id().is_none());
        assert_eq!(TraceContext::depth(), 0);
    }
}
