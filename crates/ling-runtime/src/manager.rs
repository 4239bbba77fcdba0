//! 单元管理器：安装、升级、卸载与服务路由的编排中枢。
//!
//! # 安装算法（How，一个原子工作单元）
//! 1. 安全校验器逐个过一遍来源，任一失败即中止；
//! 2. 已存在同名单元则按升级处理（该单元的接口缓存失效）；
//! 3. 新建单元命名空间与容器并启动容器——启动扫描回调
//!    `register_service` 上报可调用方法；
//! 4. 复查背压：垂死队列满则中止并销毁半成品实例；
//! 5. 新实例入池；默认位原子换指针，旧默认转入垂死队列；
//! 6. 应用定义声明的能力授权；
//! 7. 发布 `installed` 事件。
//! 任一步失败必须回滚：停容器、关命名空间、撤销局部服务注册、
//! 归还线程配额。
//!
//! # 路由缓存纪律（Why）
//! - 接口缓存以接口全名字符串为键、单元 id 字符串为值——绝不缓存
//!   类型或命名空间引用，避免钉住垂死实例。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use ling_core::config::{LingConfig, RuntimeOptions};
use ling_core::definition::{UnitDefinition, UnitSource};
use ling_core::event::LingEvent;
use ling_core::ids::{Capability, Fqsid, UnitId};
use ling_core::invocation::Value;
use ling_core::spi::{
    BeanRef, ContainerFactory, NameResolver, PolicyQuery, Propagator, SecurityVerifier,
    ServiceHandle, ServiceInvoker, ServiceMethod, TransactionVerifier, UnitContext,
};
use ling_core::types::{AccessType, LabelSet};
use ling_core::{LingError, Result};

use crate::budget::ThreadBudget;
use crate::event::EventBus;
use crate::executor::UnitExecutor;
use crate::governance::GovernanceKernel;
use crate::instance::UnitInstance;
use crate::isolation::{ForcedParentPrefixes, HostTier, SharedContractSpace, UnitNamespace};
use crate::lifecycle::LifecycleManager;
use crate::permission::PermissionService;
use crate::pool::{InstancePool, PoolSnapshot};
use crate::registry::{ProtocolRegistry, ServiceRecord};
use crate::routing::{self, CanaryConfig, CanaryStore, ServiceProxy};
use crate::trace::TraceContext;

/// 一个单元 id 的常驻运行时：实例池与执行器跨升级存续。
///
/// 服务表归属实例（bean 活在注册它的容器里）；运行时只保管与
/// 版本无关的资产：池、线程配额与执行器。
pub struct UnitRuntime {
    unit_id: UnitId,
    definition: RwLock<Arc<UnitDefinition>>,
    source: RwLock<UnitSource>,
    pool: InstancePool,
    executor: UnitExecutor,
    threads: usize,
}

impl UnitRuntime {
    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    pub fn definition(&self) -> Arc<UnitDefinition> {
        Arc::clone(&self.definition.read())
    }

    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    pub fn executor(&self) -> &UnitExecutor {
        &self.executor
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

pub(crate) struct ManagerCore {
    pub(crate) config: Arc<LingConfig>,
    pub(crate) runtimes: Arc<DashMap<String, Arc<UnitRuntime>>>,
    pub(crate) protocol: ProtocolRegistry,
    interface_cache: DashMap<String, String>,
    pub(crate) permission: Arc<PermissionService>,
    pub(crate) kernel: Arc<GovernanceKernel>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) lifecycle: Arc<LifecycleManager>,
    canary: CanaryStore,
    pub(crate) budget: ThreadBudget,
    factory: Arc<dyn ContainerFactory>,
    security: Vec<Arc<dyn SecurityVerifier>>,
    tx_verifier: Arc<dyn TransactionVerifier>,
    invoker: Arc<dyn ServiceInvoker>,
    propagators: Arc<Vec<Arc<dyn Propagator>>>,
    forced: Arc<ForcedParentPrefixes>,
    contract: Arc<SharedContractSpace>,
    host_tier: Arc<HostTier>,
    shutting_down: AtomicBool,
}

/// 单元管理器门面；可廉价克隆，内部共享同一核心。
#[derive(Clone)]
pub struct UnitManager {
    core: Arc<ManagerCore>,
}

#[allow(clippy::too_many_arguments)]
impl UnitManager {
    pub(crate) fn new(
        config: Arc<LingConfig>,
        runtimes: Arc<DashMap<String, Arc<UnitRuntime>>>,
        permission: Arc<PermissionService>,
        kernel: Arc<GovernanceKernel>,
        bus: Arc<EventBus>,
        lifecycle: Arc<LifecycleManager>,
        factory: Arc<dyn ContainerFactory>,
        security: Vec<Arc<dyn SecurityVerifier>>,
        tx_verifier: Arc<dyn TransactionVerifier>,
        invoker: Arc<dyn ServiceInvoker>,
        propagators: Arc<Vec<Arc<dyn Propagator>>>,
        forced: Arc<ForcedParentPrefixes>,
        contract: Arc<SharedContractSpace>,
        host_tier: Arc<HostTier>,
    ) -> Self {
        let budget = ThreadBudget::new(config.global_max_ling_threads);
        Self {
            core: Arc::new(ManagerCore {
                config,
                runtimes,
                protocol: ProtocolRegistry::new(),
                interface_cache: DashMap::new(),
                permission,
                kernel,
                bus,
                lifecycle,
                canary: CanaryStore::new(),
                budget,
                factory,
                security,
                tx_verifier,
                invoker,
                propagators,
                forced,
                contract,
                host_tier,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_operational(&self) -> Result<()> {
        if !self.core.config.enabled {
            return Err(LingError::ServiceUnavailable {
                unit: "<manager>".to_owned(),
                reason: "ling runtime disabled by configuration".to_owned(),
            });
        }
        if self.core.shutting_down.load(Ordering::Acquire) {
            return Err(LingError::ServiceUnavailable {
                unit: "<manager>".to_owned(),
                reason: "ling runtime shutting down".to_owned(),
            });
        }
        Ok(())
    }

    /// 安装生产单元（打包来源）。
    pub fn install(&self, definition: UnitDefinition, source: UnitSource) -> Result<()> {
        let as_default = !definition.is_canary();
        self.install_internal(definition, source, LabelSet::new(), as_default)
    }

    /// 开发安装（未打包目录）。
    pub fn install_dev(
        &self,
        definition: UnitDefinition,
        source_dir: impl Into<std::path::PathBuf>,
    ) -> Result<()> {
        let as_default = !definition.is_canary();
        self.install_internal(
            definition,
            UnitSource::Directory(source_dir.into()),
            LabelSet::new(),
            as_default,
        )
    }

    /// 在既有默认旁部署带标签的金丝雀实例。
    pub fn deploy_canary(
        &self,
        definition: UnitDefinition,
        source: UnitSource,
        labels: LabelSet,
    ) -> Result<()> {
        self.install_internal(definition, source, labels, false)
    }

    /// 开发热重载：按记录的来源重新安装。
    ///
    /// 同版本重装与“活动定义版本互异”不变量冲突，因此落地为
    /// 同步卸载后重装（观测上等价于单次安装）。
    pub fn reload(&self, unit: &str) -> Result<()> {
        if !self.core.config.dev_mode {
            return Err(LingError::invalid_argument(
                "reload is a dev-mode operation (enable `dev-mode`)",
            ));
        }
        let runtime = self.runtime_of(unit)?;
        let definition = runtime.definition().as_ref().clone();
        let source = runtime.source.read().clone();
        self.uninstall(unit)?;
        self.install_internal(definition, source, LabelSet::new(), true)
    }

    fn runtime_of(&self, unit: &str) -> Result<Arc<UnitRuntime>> {
        self.core
            .runtimes
            .get(unit)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LingError::ServiceUnavailable {
                unit: unit.to_owned(),
                reason: "unit not installed".to_owned(),
            })
    }

    fn effective_runtime_options(&self, definition: &UnitDefinition) -> RuntimeOptions {
        let mut opts = self.core.config.runtime.clone();
        // 单元属性可覆盖限流配置（如 `rate-limit: 100`）。
        if let Some(rate) = definition
            .property_str("rate-limit")
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            opts.rate_limit.rate = rate;
            if opts.rate_limit.burst == 0 {
                opts.rate_limit.burst = rate;
            }
        }
        if let Some(burst) = definition
            .property_str("rate-limit-burst")
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            opts.rate_limit.burst = burst;
        }
        opts
    }

    fn install_internal(
        &self,
        definition: UnitDefinition,
        source: UnitSource,
        extra_labels: LabelSet,
        as_default: bool,
    ) -> Result<()> {
        self.ensure_operational()?;
        definition.validate()?;
        let unit = definition.unit_id()?;
        let version = definition.version().to_owned();

        // 步骤 1：安全校验。
        for verifier in &self.core.security {
            verifier.verify(&unit, &source)?;
        }

        // 步骤 2：升级检测与缓存失效；顺带预检背压。
        let existing = self
            .core
            .runtimes
            .get(unit.as_str())
            .map(|entry| Arc::clone(entry.value()));
        if existing.is_some() {
            self.core
                .interface_cache
                .retain(|_, owner| owner.as_str() != unit.as_str());
            debug!(unit = %unit, version = %version, "existing unit found, treating as upgrade");
        }
        if let Some(runtime) = &existing {
            if as_default && runtime.pool.at_dying_capacity() {
                return Err(LingError::ServiceUnavailable {
                    unit: unit.as_str().to_owned(),
                    reason: "dying queue at capacity, install refused".to_owned(),
                });
            }
        }

        // 首个安装冻结强制上溯前缀表。
        self.core.forced.freeze();

        // 步骤 3：命名空间 + 容器。
        let namespace = UnitNamespace::new(
            unit.clone(),
            version.clone(),
            Arc::clone(&self.core.forced),
            Arc::clone(&self.core.contract),
            Arc::clone(&self.core.host_tier),
        );
        namespace.attach_source(&source)?;
        let resolver: Arc<dyn NameResolver> = Arc::clone(&namespace) as _;
        let container = match self.core.factory.create(&unit, &source, resolver) {
            Ok(container) => container,
            Err(err) => {
                namespace.close();
                return Err(err);
            }
        };

        let definition = Arc::new(definition);
        let mut labels = LabelSet::from_pairs([("version", version.as_str())]);
        for (key, value) in extra_labels.iter() {
            labels.insert(key, value);
        }
        let instance = UnitInstance::new(
            unit.clone(),
            Arc::clone(&definition),
            Arc::clone(&namespace),
            Arc::clone(&container),
            labels,
        );

        // 升级复用既有运行时（池/执行器/线程配额跨版本存续）。
        let (runtime, fresh_threads) = match existing {
            Some(runtime) => (runtime, None),
            None => {
                let threads = match self.core.budget.allocate(
                    self.core.config.default_threads_per_ling,
                    self.core.config.max_threads_per_ling,
                ) {
                    Ok(threads) => threads,
                    Err(err) => {
                        namespace.close();
                        return Err(err);
                    }
                };
                let executor = match UnitExecutor::new(
                    unit.clone(),
                    threads,
                    self.effective_runtime_options(&definition),
                    Arc::clone(&self.core.tx_verifier),
                    Arc::clone(&self.core.invoker),
                    Arc::clone(&self.core.propagators),
                ) {
                    Ok(executor) => executor,
                    Err(err) => {
                        self.core.budget.release(threads);
                        namespace.close();
                        return Err(err);
                    }
                };
                let runtime = Arc::new(UnitRuntime {
                    unit_id: unit.clone(),
                    definition: RwLock::new(Arc::clone(&definition)),
                    source: RwLock::new(source.clone()),
                    pool: InstancePool::new(unit.clone(), self.core.config.runtime.max_dying),
                    executor,
                    threads,
                });
                (runtime, Some(threads))
            }
        };

        // 容器启动驱动服务扫描回调；登记动作全程留痕以便回滚。
        let context = UnitContextImpl {
            manager: self.clone(),
            runtime: Arc::clone(&runtime),
            instance: Arc::clone(&instance),
            unit: unit.clone(),
            registrations: Mutex::new(Vec::new()),
        };
        let rollback = |context: &UnitContextImpl, reason: LingError| -> LingError {
            context.rollback_registrations();
            if let Err(err) = container.stop() {
                warn!(unit = %unit, error = %err, "container stop during rollback failed");
            }
            namespace.close();
            if let Some(threads) = fresh_threads {
                runtime.executor.shutdown();
                self.core.budget.release(threads);
            }
            reason
        };

        if let Err(err) = container.start(&context) {
            return Err(rollback(
                &context,
                LingError::install_failure(
                    unit.as_str(),
                    format!("container start failed: {err}"),
                ),
            ));
        }
        if !instance.mark_ready() {
            return Err(rollback(
                &context,
                LingError::install_failure(unit.as_str(), "instance not in LOADING state"),
            ));
        }

        // 步骤 4：背压复查——竞态下垂死队列可能在启动期间被灌满。
        if as_default && runtime.pool.at_dying_capacity() {
            instance.mark_dying();
            return Err(rollback(
                &context,
                LingError::ServiceUnavailable {
                    unit: unit.as_str().to_owned(),
                    reason: "dying queue filled during container start".to_owned(),
                },
            ));
        }

        // 步骤 5：入池 + 原子默认切换。
        if let Err(err) = runtime.pool.install(Arc::clone(&instance), as_default) {
            instance.mark_dying();
            return Err(rollback(&context, err));
        }

        *runtime.definition.write() = Arc::clone(&definition);
        *runtime.source.write() = source;
        self.core
            .runtimes
            .insert(unit.as_str().to_owned(), Arc::clone(&runtime));

        // 步骤 6：应用声明式能力授权。
        for grant in &definition.governance().capabilities {
            self.core
                .permission
                .grant(unit.as_str(), &grant.capability, grant.access_type);
        }

        // 步骤 7：安装事件。
        info!(unit = %unit, version = %version, default = as_default, "unit installed");
        if let Err(err) = self.core.bus.publish(&LingEvent::Installed {
            unit: unit.clone(),
            version,
        }) {
            warn!(unit = %unit, error = %err, "installed event publication failed");
        }
        Ok(())
    }

    /// 卸载：排水并销毁一个单元的全部实例。
    pub fn uninstall(&self, unit: &str) -> Result<()> {
        let runtime = self.runtime_of(unit)?;
        let unit_id = runtime.unit_id().clone();

        // 步骤 1：预告事件；致命处理器错误构成否决。
        if let Err(err) = self.core.bus.publish(&LingEvent::Uninstalling {
            unit: unit_id.clone(),
        }) {
            warn!(unit = %unit_id, error = %err, "uninstall vetoed by fatal handler error");
            return Err(err);
        }

        // 步骤 2：从活动映射、缓存与协议注册表摘除。
        self.core.runtimes.remove(unit);
        self.core
            .interface_cache
            .retain(|_, owner| owner.as_str() != unit);
        self.core.protocol.remove_unit(&unit_id);
        self.core.kernel.patches().remove_unit(unit);
        self.core.canary.clear(unit);

        // 步骤 3：交给生命周期管理器排水。
        runtime.pool.retire_all();
        self.core.lifecycle.drain_unit(&runtime);

        // 步骤 4~6：订阅清理、权限回收、线程配额归还。
        self.core.bus.remove_owner(&unit_id);
        self.core.permission.remove_unit(unit);
        runtime.executor.shutdown();
        self.core.budget.release(runtime.threads);

        info!(unit = %unit_id, "unit uninstalled");
        if let Err(err) = self
            .core
            .bus
            .publish(&LingEvent::Uninstalled { unit: unit_id })
        {
            warn!(error = %err, "uninstalled event publication failed");
        }
        Ok(())
    }

    /// 按接口获取路由代理。无提供者返回 `None`。
    pub fn get_service(
        &self,
        caller: Option<UnitId>,
        interface: &str,
    ) -> Option<Arc<dyn ServiceHandle>> {
        self.ensure_operational().ok()?;
        let owner = self.resolve_interface_owner(interface)?;
        let target = UnitId::parse(owner).ok()?;
        Some(Arc::new(ServiceProxy::new(
            self.clone(),
            caller,
            target,
            interface.to_owned(),
        )))
    }

    fn resolve_interface_owner(&self, interface: &str) -> Option<String> {
        if let Some(cached) = self.core.interface_cache.get(interface) {
            let owner = cached.value().clone();
            drop(cached);
            if self.core.runtimes.contains_key(&owner) {
                return Some(owner);
            }
            self.core.interface_cache.remove(interface);
        }
        let mut providers: Vec<String> = self
            .core
            .runtimes
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .pool
                    .default_instance()
                    .map(|instance| instance.container().bean_by_interface(interface).is_some())
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        if providers.is_empty() {
            return None;
        }
        providers.sort();
        if providers.len() > 1 {
            warn!(
                interface,
                winner = %providers[0],
                contenders = providers.len(),
                "multiple units expose interface, smallest unit-id wins"
            );
        }
        let winner = providers.swap_remove(0);
        // 缓存键与值都是标识符字符串，绝不钉住命名空间。
        self.core
            .interface_cache
            .insert(interface.to_owned(), winner.clone());
        Some(winner)
    }

    /// 协议级分发：`fqsid` 直达调用。
    pub fn invoke_service(
        &self,
        caller: Option<UnitId>,
        fqsid: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let parsed = Fqsid::parse(fqsid)?;
        let owner = self
            .core
            .protocol
            .owner_of(parsed.as_str())
            .ok_or_else(|| LingError::ServiceNotFound {
                target: fqsid.to_owned(),
            })?;
        let target = UnitId::parse(owner)?;
        self.invoke_on_unit(caller, &target, parsed.short_part(), args)
    }

    /// 路由代理与协议分发共用的受治理调用路径。
    pub(crate) fn invoke_on_unit(
        &self,
        caller: Option<UnitId>,
        target: &UnitId,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        self.ensure_operational()?;
        let runtime = self.runtime_of(target.as_str())?;
        let fqsid = Fqsid::compose(target, operation)?;
        // 代表性记录提供仲裁所需的方法侧信息；执行时再按所选实例取表。
        let representative = self
            .pick(&runtime, &TraceContext::labels())?
            .services()
            .get(fqsid.as_str())
            .ok_or_else(|| LingError::ServiceNotFound {
                target: fqsid.as_str().to_owned(),
            })?;

        // 宿主发起且未开启宿主治理：跳过内核，直接限流/路由/执行。
        if caller.is_none() && !self.core.config.host_governance.enabled {
            let instance = self.pick(&runtime, &TraceContext::labels())?;
            let record = self.record_of(&instance, fqsid.as_str())?;
            let _guard = instance.enter()?;
            let timeout =
                std::time::Duration::from_millis(self.core.config.runtime.default_timeout);
            return runtime
                .executor
                .execute(&instance, &record, &args, timeout)
                .map(Some);
        }

        let definition = runtime.definition();
        routing::with_pooled_context(|ctx| {
            ctx.prepare(caller.clone(), target.clone(), operation, args);
            ctx.resource_id = fqsid.as_str().to_owned();
            ctx.labels = TraceContext::labels();
            let query = PolicyQuery {
                operation,
                declaring_type: &representative.method.declaring_type,
                metadata: Some(&representative.method.metadata),
                definition: Some(definition.as_ref()),
            };
            self.core.kernel.invoke(ctx, &query, |ctx, decision| {
                let instance = self.pick(&runtime, &ctx.labels)?;
                let record = self.record_of(&instance, fqsid.as_str())?;
                let guard = instance.enter()?;
                let result =
                    runtime
                        .executor
                        .execute(&instance, &record, &ctx.args, decision.timeout);
                drop(guard);
                result
            })
        })
    }

    fn record_of(&self, instance: &Arc<UnitInstance>, fqsid: &str) -> Result<Arc<ServiceRecord>> {
        instance
            .services()
            .get(fqsid)
            .ok_or_else(|| LingError::ServiceNotFound {
                target: fqsid.to_owned(),
            })
    }

    fn pick(&self, runtime: &Arc<UnitRuntime>, labels: &LabelSet) -> Result<Arc<UnitInstance>> {
        routing::pick_instance(
            &runtime.pool,
            labels,
            self.core.canary.get(runtime.unit_id().as_str()),
            routing::next_call_seed(),
        )
        .ok_or_else(|| LingError::ServiceUnavailable {
            unit: runtime.unit_id().as_str().to_owned(),
            reason: "no active instance".to_owned(),
        })
    }

    /// 协议服务登记（容器适配层的带外入口，落到当前默认实例）。
    pub fn register_protocol_service(
        &self,
        unit: &UnitId,
        method: ServiceMethod,
        bean: BeanRef,
    ) -> Result<Fqsid> {
        let runtime = self.runtime_of(unit.as_str())?;
        let instance =
            runtime
                .pool
                .default_instance()
                .ok_or_else(|| LingError::ServiceUnavailable {
                    unit: unit.as_str().to_owned(),
                    reason: "no default instance to register against".to_owned(),
                })?;
        let fqsid = Fqsid::compose(unit, &method.short_id)?;
        instance
            .services()
            .insert(ServiceRecord::new(fqsid.clone(), unit.clone(), bean, method));
        self.core.protocol.register(&fqsid, unit);
        Ok(fqsid)
    }

    /// 设置金丝雀分流。
    pub fn set_canary(&self, unit: &str, percent: u8, version: impl Into<String>) -> Result<()> {
        self.core.canary.set(unit, percent, version)
    }

    pub fn get_canary(&self, unit: &str) -> Option<CanaryConfig> {
        self.core.canary.get(unit)
    }

    pub fn clear_canary(&self, unit: &str) {
        self.core.canary.clear(unit)
    }

    /// 池诊断快照。
    pub fn pool_snapshot(&self, unit: &str) -> Option<PoolSnapshot> {
        self.core
            .runtimes
            .get(unit)
            .map(|entry| entry.value().pool.snapshot())
    }

    /// 指定单元的运行时句柄（诊断与测试入口）。
    pub fn runtime(&self, unit: &str) -> Option<Arc<UnitRuntime>> {
        self.core
            .runtimes
            .get(unit)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn installed_units(&self) -> Vec<String> {
        let mut units: Vec<String> = self
            .core
            .runtimes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        units.sort();
        units
    }

    pub fn permission_service(&self) -> &Arc<PermissionService> {
        &self.core.permission
    }

    pub fn kernel(&self) -> &Arc<GovernanceKernel> {
        &self.core.kernel
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.core.bus
    }

    /// 已分配线程总数（不变量：≤ 全局预算）。
    pub fn allocated_threads(&self) -> usize {
        self.core.budget.allocated()
    }

    /// 全局停机：卸载全部单元、停调度器并发布 `shutdown` 事件。
    pub fn shutdown(&self) {
        if self.core.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for unit in self.installed_units() {
            if let Err(err) = self.uninstall(&unit) {
                warn!(unit = %unit, error = %err, "uninstall during shutdown failed");
            }
        }
        self.core.lifecycle.flush_probes();
        self.core.lifecycle.shutdown();
        if let Err(err) = self.core.bus.publish(&LingEvent::Shutdown) {
            warn!(error = %err, "shutdown event publication failed");
        }
    }
}

/// 交还给单元容器的运行时访问面。
struct UnitContextImpl {
    manager: UnitManager,
    runtime: Arc<UnitRuntime>,
    instance: Arc<UnitInstance>,
    unit: UnitId,
    registrations: Mutex<Vec<String>>,
}

impl UnitContextImpl {
    /// 撤销本次启动窗口的协议归属登记。
    ///
    /// 实例级服务表随被丢弃的实例一起消亡；这里只需要把全局归属
    /// 还原：仍有存活实例提供该 FQSID 时保留，否则摘除。
    fn rollback_registrations(&self) {
        let mut registrations = self.registrations.lock();
        while let Some(fqsid) = registrations.pop() {
            let still_provided = self
                .runtime
                .pool
                .default_instance()
                .map(|instance| instance.services().contains(&fqsid))
                .unwrap_or(false);
            if !still_provided {
                self.manager.core.protocol.remove_if_owner(&fqsid, &self.unit);
            }
        }
    }
}

impl UnitContext for UnitContextImpl {
    fn unit_id(&self) -> &UnitId {
        &self.unit
    }

    fn invoke(&self, fqsid: &str, args: Vec<Value>) -> Result<Option<Value>> {
        self.manager
            .invoke_service(Some(self.unit.clone()), fqsid, args)
    }

    fn get_service(&self, interface: &str) -> Option<Arc<dyn ServiceHandle>> {
        self.manager.get_service(Some(self.unit.clone()), interface)
    }

    fn register_service(&self, method: ServiceMethod, bean: BeanRef) -> Result<()> {
        let fqsid = Fqsid::compose(&self.unit, &method.short_id)?;
        self.instance.services().insert(ServiceRecord::new(
            fqsid.clone(),
            self.unit.clone(),
            bean,
            method,
        ));
        self.manager.core.protocol.register(&fqsid, &self.unit);
        self.registrations.lock().push(fqsid.as_str().to_owned());
        Ok(())
    }

    fn publish_event(&self, event: LingEvent) -> Result<()> {
        self.manager.core.bus.publish(&event)
    }

    fn is_allowed(&self, capability: &str, required: AccessType) -> bool {
        match Capability::parse(capability) {
            Ok(capability) => {
                self.manager
                    .core
                    .permission
                    .is_allowed(self.unit.as_str(), &capability, required)
            }
            Err(_) => false,
        }
    }
}
