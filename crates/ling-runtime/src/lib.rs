#![deny(unsafe_code)]
#![doc = "ling-runtime: 单元治理微内核的进程内运行时。"]
#![doc = ""]
#![doc = "在 `ling-core` 契约之上落地四个紧耦合子系统："]
#![doc = "1. 单元生命周期与实例池（蓝绿原子切换、引用计数排水、泄漏探测）；"]
#![doc = "2. 隔离与命名空间模型（宿主 / 共享合约 / 单元三层，child-first 解析）；"]
#![doc = "3. 治理内核（优先级决策管道、权限、重试回退、审计追踪）；"]
#![doc = "4. 服务路由与调用执行器（FQSID 分发、金丝雀路由、舱壁、熔断、限流）。"]
#![doc = ""]
#![doc = "顶层入口为 [`runtime::LingRuntime`]；测试替身集中在 [`test_stubs`]。"]

pub mod audit;
pub mod budget;
pub mod diagnostics;
pub mod event;
pub mod executor;
pub mod governance;
pub mod instance;
pub mod isolation;
pub mod lifecycle;
pub mod manager;
pub mod permission;
pub mod pool;
pub mod registry;
pub mod routing;
pub mod runtime;
pub mod test_stubs;
pub mod trace;

pub use manager::UnitManager;
pub use runtime::{LingRuntime, LingRuntimeBuilder};
