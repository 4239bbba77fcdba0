#![deny(unsafe_code)]
#![doc = "ling-core: 单元治理微内核的契约层。"]
#![doc = ""]
#![doc = "本 crate 定义跨单元边界流动的所有数据模型与 SPI 契约："]
#![doc = "标识符、访问权限格、治理决策、调用上下文、审计记录、事件模型、"]
#![doc = "宿主配置以及容器/校验器/传播器等扩展点。运行时机制（实例池、"]
#![doc = "调用执行器、隔离命名空间）由 `ling-runtime` 提供，本层保持纯契约。"]
#![doc = ""]
#![doc = "== 分层约定 =="]
#![doc = "1. 契约类型必须可安全跨线程移动（`Send + Sync` 或纯值语义）；"]
#![doc = "2. 跨单元传递的业务值统一使用 `serde_json::Value`，禁止原生引用穿越边界；"]
#![doc = "3. 所有标识符经过构造期校验，杜绝空字符串在运行时扩散。"]

pub mod audit;
pub mod config;
pub mod decision;
pub mod definition;
pub mod error;
pub mod event;
pub mod ids;
pub mod invocation;
pub mod spi;
pub mod types;

pub use error::{ErrorCategory, LingError};
pub use ids::{Capability, Fqsid, TraceId, UnitId};
pub use types::{AccessType, LabelSet, ResourceKind, UnitState};

/// 常用契约类型的统一导入口。
///
/// # 使用方式（How）
/// - 业务与运行时代码推荐 `use ling_core::prelude::*;` 一次性引入高频类型；
/// - 低频类型（SPI、配置）仍建议按模块路径显式引用，保持调用点可读。
pub mod prelude {
    pub use crate::audit::{AuditOutcome, AuditRecord};
    pub use crate::config::LingConfig;
    pub use crate::decision::{GovernanceDecision, ResolvedDecision};
    pub use crate::definition::{UnitDefinition, UnitSource};
    pub use crate::error::{ErrorCategory, LingError};
    pub use crate::event::{EventKind, LingEvent};
    pub use crate::ids::{Capability, Fqsid, TraceId, UnitId};
    pub use crate::invocation::InvocationContext;
    pub use crate::types::{AccessType, LabelSet, ResourceKind, UnitState};
}

/// 框架统一的 `Result` 别名，错误类型默认为 [`LingError`]。
pub type Result<T, E = LingError> = core::result::Result<T, E>;
