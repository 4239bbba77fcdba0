//! 错误域：微内核对外暴露的全部错误语义与稳定错误码。
//!
//! # 角色定位（Why）
//! - 治理内核的重试、回退与审计策略全部由错误的**分类**驱动，而非类型
//!   名称匹配；集中定义可保证“权限拒绝永不重试”“熔断拒绝可自愈”等
//!   约束在所有调用路径上一致生效。
//!
//! # 设计要求（What）
//! - 所有错误实现 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - 每个错误携带稳定错误码（`<域>.<语义>`，见 [`codes`]），供日志、
//!   指标与告警做机读分类；
//! - [`ErrorCategory`] 把可重试性显式化，上层不得解析消息字符串推断。

use thiserror::Error;

use crate::types::AccessType;

/// 稳定错误码常量表，`<域>.<语义>` 命名。
///
/// 新增错误码需同步更新 [`LingError::code`] 与分类映射。
pub mod codes {
    pub const PERMISSION_DENIED: &str = "permission.denied";
    pub const SERVICE_NOT_FOUND: &str = "service.not_found";
    pub const SERVICE_UNAVAILABLE: &str = "service.unavailable";
    pub const BULKHEAD_FULL: &str = "bulkhead.full";
    pub const RATE_LIMITED: &str = "rate.limited";
    pub const CALL_NOT_PERMITTED: &str = "call.not_permitted";
    pub const INVOKE_TIMEOUT: &str = "invoke.timeout";
    pub const INVOKE_FAILURE: &str = "invoke.failure";
    pub const INSTALL_FAILURE: &str = "install.failure";
    pub const INVALID_ARGUMENT: &str = "app.invalid_argument";
    pub const NAMESPACE_CLOSED: &str = "namespace.closed";
    pub const ISOLATION_FAILURE: &str = "isolation.failure";
    pub const INTERNAL: &str = "internal.error";
}

/// 错误的处置分类，驱动自动化容错策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 可按治理决策中的 `retry-count` 重试。
    Retryable,
    /// 不重试，直接向调用方传播。
    NonRetryable,
    /// 致命错误：事件总线等吞错路径必须重新抛出，快速失败。
    Fatal,
}

/// 微内核错误域。
///
/// # 契约说明（What）
/// - 所有变体均为 `Send + Sync + 'static`，可安全跨线程传播；
/// - [`code`](Self::code) 返回稳定错误码，[`category`](Self::category)
///   返回处置分类；二者共同构成治理策略的机读输入；
/// - 变体携带的上下文字段（调用方、能力、规则来源等）按语义必需裁剪，
///   使用 `String` 保存，牺牲少量堆分配换取诊断可读性。
#[derive(Debug, Error)]
pub enum LingError {
    /// 授权不满足所需访问级别；永不重试，审计结果记为 `DENIED`。
    #[error(
        "permission denied: caller `{caller}` lacks {required} on `{capability}` (rule: {source_tag})"
    )]
    PermissionDenied {
        caller: String,
        capability: String,
        required: AccessType,
        source_tag: String,
    },

    /// 没有单元暴露所请求的接口或 FQSID。
    #[error("service not found: `{target}`")]
    ServiceNotFound { target: String },

    /// 目标单元缺失、未就绪或管理器已关闭；路由代理下次调用时会重新解析。
    #[error("service unavailable: unit `{unit}` ({reason})")]
    ServiceUnavailable { unit: String, reason: String },

    /// 舱壁许可在等待窗口内未获得。
    #[error("bulkhead full: unit `{unit}` rejected after {wait_ms}ms")]
    BulkheadFull { unit: String, wait_ms: u64 },

    /// 令牌桶耗尽，快速失败。
    #[error("rate limited: `{fqsid}`")]
    RateLimited { fqsid: String },

    /// 熔断器处于 OPEN / FORCED-OPEN，拒绝进入。
    #[error("call not permitted: circuit breaker open for `{fqsid}`")]
    CallNotPermitted { fqsid: String },

    /// 执行器等待超出 `timeout-ms`；任务已被取消。
    #[error("invocation timed out after {timeout_ms}ms: `{fqsid}`")]
    Timeout { fqsid: String, timeout_ms: u64 },

    /// 目标方法抛出业务错误。
    #[error("invocation failure: {message}")]
    InvocationFailure { message: String },

    /// 安装期故障；部分状态必须已回滚。
    #[error("install failure for unit `{unit}`: {message}")]
    InstallFailure { unit: String, message: String },

    /// 入参违反契约约束。
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// 单元命名空间已关闭（中毒），后续解析请求一律拒绝。
    #[error("namespace closed: unit `{unit}`")]
    NamespaceClosed { unit: String },

    /// 名称解析或归档装载失败（类加载层故障）。
    #[error("isolation failure: {message}")]
    IsolationFailure { message: String },

    /// 框架内部错误；`fatal` 为真时吞错路径必须重新抛出。
    #[error("internal error: {message}")]
    Internal { message: String, fatal: bool },
}

impl LingError {
    /// 便捷构造：入参校验失败。
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// 便捷构造：安装失败。
    pub fn install_failure(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InstallFailure {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// 便捷构造：可吞没的内部错误。
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            fatal: false,
        }
    }

    /// 便捷构造：致命内部错误，吞错路径必须重新抛出。
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            fatal: true,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => codes::PERMISSION_DENIED,
            Self::ServiceNotFound { .. } => codes::SERVICE_NOT_FOUND,
            Self::ServiceUnavailable { .. } => codes::SERVICE_UNAVAILABLE,
            Self::BulkheadFull { .. } => codes::BULKHEAD_FULL,
            Self::RateLimited { .. } => codes::RATE_LIMITED,
            Self::CallNotPermitted { .. } => codes::CALL_NOT_PERMITTED,
            Self::Timeout { .. } => codes::INVOKE_TIMEOUT,
            Self::InvocationFailure { .. } => codes::INVOKE_FAILURE,
            Self::InstallFailure { .. } => codes::INSTALL_FAILURE,
            Self::InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            Self::NamespaceClosed { .. } => codes::NAMESPACE_CLOSED,
            Self::IsolationFailure { .. } => codes::ISOLATION_FAILURE,
            Self::Internal { .. } => codes::INTERNAL,
        }
    }

    /// 返回处置分类。
    ///
    /// # 分类约定
    /// - 瞬时性故障（超时、业务失败、容量拒绝、熔断、目标未就绪）为
    ///   `Retryable`，受治理决策的 `retry-count` 约束；
    /// - 权限拒绝、契约违规与安装失败为 `NonRetryable`；
    /// - 仅显式标记的内部错误为 `Fatal`。
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. }
            | Self::InvocationFailure { .. }
            | Self::BulkheadFull { .. }
            | Self::RateLimited { .. }
            | Self::CallNotPermitted { .. }
            | Self::ServiceUnavailable { .. } => ErrorCategory::Retryable,
            Self::PermissionDenied { .. }
            | Self::ServiceNotFound { .. }
            | Self::InstallFailure { .. }
            | Self::InvalidArgument { .. }
            | Self::NamespaceClosed { .. }
            | Self::IsolationFailure { .. } => ErrorCategory::NonRetryable,
            Self::Internal { fatal, .. } => {
                if *fatal {
                    ErrorCategory::Fatal
                } else {
                    ErrorCategory::NonRetryable
                }
            }
        }
    }

    /// 是否为权限拒绝；治理内核据此跳过重试与回退。
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_never_retryable() {
        let err = LingError::PermissionDenied {
            caller: "b".into(),
            capability: "storage:sql".into(),
            required: AccessType::Write,
            source_tag: "unit-policy".into(),
        };
        assert_eq!(err.code(), codes::PERMISSION_DENIED);
        assert_eq!(err.category(), ErrorCategory::NonRetryable);
        assert!(err.is_permission_denied());
    }

    #[test]
    fn transient_failures_are_retryable() {
        let timeout = LingError::Timeout {
            fqsid: "user:get_user".into(),
            timeout_ms: 100,
        };
        assert_eq!(timeout.category(), ErrorCategory::Retryable);
        let failure = LingError::InvocationFailure {
            message: "boom".into(),
        };
        assert_eq!(failure.category(), ErrorCategory::Retryable);
    }

    #[test]
    fn fatal_flag_promotes_category() {
        assert_eq!(
            LingError::fatal("bus handler corrupted").category(),
            ErrorCategory::Fatal
        );
        assert_eq!(
            LingError::internal("benign").category(),
            ErrorCategory::NonRetryable
        );
    }
}
