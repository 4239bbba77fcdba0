//! 运行时门面：SPI 装配、全局单例接线与停机语义。
//!
//! # 装配（How）
//! - [`LingRuntimeBuilder`] 收敛全部 SPI 注入点：容器工厂（必选）、
//!   安全校验器、事务探测、服务调用器、传播器、资源守卫、合约归档
//!   与治理策略扩展；
//! - 三个进程级单例在此接线：共享合约层（静态可复位）、审计工作
//!   线程与链路上下文存储（线程本地）；全部具备显式停机/复位
//!   语义，测试可重建。

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use ling_core::config::LingConfig;
use ling_core::ids::UnitId;
use ling_core::spi::{
    ContainerFactory, HandleInvoker, PolicyProvider, Propagator, ResourceGuard, SecurityVerifier,
    ServiceInvoker, TransactionVerifier,
};
use ling_core::{LingError, Result};

use crate::audit::{AuditPipeline, MIN_QUEUE_CAPACITY};
use crate::event::EventBus;
use crate::governance::GovernanceKernel;
use crate::isolation::{ContractArchive, ForcedParentPrefixes, HostTier, SharedContractSpace};
use crate::lifecycle::LifecycleManager;
use crate::manager::UnitManager;
use crate::permission::PermissionService;
use crate::trace::TraceContext;

/// 保守事务探测：无可靠判定来源时一律按非事务处理。
///
/// 代价是丢失跨舱壁的事务传播，换来判定永不误报。
#[derive(Clone, Copy, Debug, Default)]
pub struct ConservativeTransactionVerifier;

impl TransactionVerifier for ConservativeTransactionVerifier {
    fn is_transactional(&self, _method: &str, _declaring_type: &str) -> bool {
        false
    }
}

/// 缺省资源守卫：无全局注册需要逆转。
#[derive(Clone, Copy, Debug, Default)]
struct NoopResourceGuard;

impl ResourceGuard for NoopResourceGuard {
    fn cleanup(&self, _unit_id: &UnitId) {}
}

/// 运行时装配器。
pub struct LingRuntimeBuilder {
    config: LingConfig,
    factory: Option<Arc<dyn ContainerFactory>>,
    security: Vec<Arc<dyn SecurityVerifier>>,
    tx_verifier: Option<Arc<dyn TransactionVerifier>>,
    invoker: Option<Arc<dyn ServiceInvoker>>,
    propagators: Vec<Arc<dyn Propagator>>,
    guard: Option<Arc<dyn ResourceGuard>>,
    contract_archives: Vec<ContractArchive>,
    forced_prefixes: Vec<String>,
    providers: Vec<Arc<dyn PolicyProvider>>,
}

impl LingRuntimeBuilder {
    pub fn new(config: LingConfig) -> Self {
        Self {
            config,
            factory: None,
            security: Vec::new(),
            tx_verifier: None,
            invoker: None,
            propagators: Vec::new(),
            guard: None,
            contract_archives: Vec::new(),
            forced_prefixes: Vec::new(),
            providers: Vec::new(),
        }
    }

    /// 容器工厂（必选 SPI）。
    pub fn with_container_factory(mut self, factory: Arc<dyn ContainerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_security_verifier(mut self, verifier: Arc<dyn SecurityVerifier>) -> Self {
        self.security.push(verifier);
        self
    }

    pub fn with_transaction_verifier(mut self, verifier: Arc<dyn TransactionVerifier>) -> Self {
        self.tx_verifier = Some(verifier);
        self
    }

    pub fn with_service_invoker(mut self, invoker: Arc<dyn ServiceInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_propagator(mut self, propagator: Arc<dyn Propagator>) -> Self {
        self.propagators.push(propagator);
        self
    }

    pub fn with_resource_guard(mut self, guard: Arc<dyn ResourceGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// 预装一份共享合约归档（对应 `preload-api-jars` 的程序化形态）。
    pub fn with_contract_archive(mut self, archive: ContractArchive) -> Self {
        self.contract_archives.push(archive);
        self
    }

    /// 追加宿主自定义的强制上溯前缀。
    pub fn with_forced_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.forced_prefixes.push(prefix.into());
        self
    }

    /// 注册宿主治理策略扩展。
    pub fn with_policy_provider(mut self, provider: Arc<dyn PolicyProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Result<LingRuntime> {
        let factory = self.factory.ok_or_else(|| {
            LingError::invalid_argument("container factory SPI is required to build the runtime")
        })?;
        let config = Arc::new(self.config);

        // 共享合约层：进程单例，一次初始化。
        let contract = SharedContractSpace::global();
        for archive in &self.contract_archives {
            contract.load_archive(archive);
        }

        let forced = Arc::new(ForcedParentPrefixes::new());
        for prefix in self.forced_prefixes {
            forced.add(prefix)?;
        }
        let host_tier = Arc::new(HostTier::new(Arc::clone(&forced)));

        let bus = Arc::new(EventBus::new());
        let audit = AuditPipeline::new(MIN_QUEUE_CAPACITY, Arc::clone(&bus));
        let permission = Arc::new(PermissionService::new());
        let kernel = Arc::new(GovernanceKernel::new(
            Arc::clone(&permission),
            Arc::clone(&audit),
            Arc::clone(&config),
        ));
        for provider in self.providers {
            kernel.register_provider(provider);
        }

        let runtimes = Arc::new(DashMap::new());
        let guard = self
            .guard
            .unwrap_or_else(|| Arc::new(NoopResourceGuard) as Arc<dyn ResourceGuard>);
        let lifecycle = LifecycleManager::new(
            Arc::clone(&runtimes),
            Arc::clone(&bus),
            Arc::clone(&guard),
            &config,
        );
        LifecycleManager::start(&lifecycle);

        let manager = UnitManager::new(
            Arc::clone(&config),
            runtimes,
            permission,
            Arc::clone(&kernel),
            Arc::clone(&bus),
            Arc::clone(&lifecycle),
            factory,
            self.security,
            self.tx_verifier
                .unwrap_or_else(|| Arc::new(ConservativeTransactionVerifier)),
            self.invoker.unwrap_or_else(|| Arc::new(HandleInvoker)),
            Arc::new(self.propagators),
            forced,
            contract,
            host_tier,
        );
        debug!("ling runtime assembled");
        Ok(LingRuntime {
            manager,
            bus,
            audit,
            kernel,
        })
    }
}

/// 微内核运行时：顶层持有者。
pub struct LingRuntime {
    manager: UnitManager,
    bus: Arc<EventBus>,
    audit: Arc<AuditPipeline>,
    kernel: Arc<GovernanceKernel>,
}

impl LingRuntime {
    pub fn builder(config: LingConfig) -> LingRuntimeBuilder {
        LingRuntimeBuilder::new(config)
    }

    pub fn manager(&self) -> &UnitManager {
        &self.manager
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn kernel(&self) -> &Arc<GovernanceKernel> {
        &self.kernel
    }

    pub fn audit(&self) -> &Arc<AuditPipeline> {
        &self.audit
    }

    /// 全局停机：卸载全部单元、停调度器、排空审计、清理链路状态。
    pub fn shutdown(&self) {
        self.manager.shutdown();
        self.audit.shutdown();
        TraceContext::clear();
    }
}

impl Drop for LingRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
