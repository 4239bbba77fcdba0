//! 审计记录模型：一次性写入、异步发射的治理凭证。
//!
//! # 设计动机（Why）
//! - 审计是治理闭环的证据链：每条记录关联链路追踪标识，按发射顺序
//!   可还原单条链路的完整调用序列；
//! - 记录构造后不再修改（write-once），发射失败只计数告警，绝不影响
//!   业务主流程。

use std::fmt;

/// 资源明细（如 SQL 文本）的截断上限，防止审计通道被大负载撑爆。
pub const MAX_DETAIL_LEN: usize = 256;

/// 审计结果分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuditOutcome {
    /// 调用成功返回。
    Success,
    /// 调用最终失败并向上传播。
    Error,
    /// 权限拒绝。
    Denied,
    /// 重试耗尽后由回退值兜住，按“已处理失败”记账。
    HandledFailure,
}

impl AuditOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Denied => "DENIED",
            Self::HandledFailure => "HANDLED_FAILURE",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条审计记录。
///
/// # 契约说明（What）
/// - `dev_bypass`：开发模式放行了本应拒绝的调用时置真——记录保留真实
///   判定结果（`outcome` 仍为 `Denied`），旁路事实单独呈现；
/// - `detail` 超过 [`MAX_DETAIL_LEN`] 的部分在构造期截断。
#[derive(Clone, Debug, PartialEq)]
pub struct AuditRecord {
    pub trace_id: String,
    pub caller: String,
    pub action: String,
    pub resource: String,
    pub cost_nanos: u64,
    pub outcome: AuditOutcome,
    pub dev_bypass: bool,
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(
        trace_id: impl Into<String>,
        caller: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        cost_nanos: u64,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            caller: caller.into(),
            action: action.into(),
            resource: resource.into(),
            cost_nanos,
            outcome,
            dev_bypass: false,
            detail: None,
        }
    }

    /// 标记开发模式旁路；真实判定结果保持不变。
    pub fn with_dev_bypass(mut self) -> Self {
        self.dev_bypass = true;
        self
    }

    /// 附加资源明细，超长部分按字符边界截断。
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let truncated = if detail.chars().count() > MAX_DETAIL_LEN {
            detail.chars().take(MAX_DETAIL_LEN).collect()
        } else {
            detail
        };
        self.detail = Some(truncated);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_truncated_to_cap() {
        let long = "x".repeat(MAX_DETAIL_LEN * 2);
        let record = AuditRecord::new("t-1", "b", "write", "storage:sql", 10, AuditOutcome::Denied)
            .with_detail(long);
        assert_eq!(record.detail.as_ref().unwrap().len(), MAX_DETAIL_LEN);
    }

    #[test]
    fn dev_bypass_keeps_real_outcome() {
        let record = AuditRecord::new("t-1", "b", "write", "storage:sql", 10, AuditOutcome::Denied)
            .with_dev_bypass();
        assert!(record.dev_bypass);
        assert_eq!(record.outcome, AuditOutcome::Denied);
    }
}
