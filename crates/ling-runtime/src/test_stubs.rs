//! 测试替身集合：容器、校验器、传播器与实例构造的最小实现。
//!
//! # 模块职责（Why）
//! - 合约与集成测试需要满足容器工厂等 SPI，但多数用例只关注治理
//!   语义；集中提供可配置的桩实现，避免在各测试文件重复定义；
//! - 桩对象同样适用于示例与适配层冒烟验证，故保持为常规模块。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use ling_core::config::LingConfig;
use ling_core::definition::{UnitDefinition, UnitSource};
use ling_core::event::LingEvent;
use ling_core::ids::{Fqsid, UnitId};
use ling_core::invocation::Value;
use ling_core::spi::{
    BeanRef, Container, ContainerFactory, MethodMetadata, NameResolver, Propagator, ResourceGuard,
    SecurityVerifier, ServiceHandler, ServiceMethod, TransactionVerifier, UnitContext,
};
use ling_core::types::LabelSet;
use ling_core::{LingError, Result};

use crate::instance::UnitInstance;
use crate::isolation::{ForcedParentPrefixes, HostTier, SharedContractSpace, UnitNamespace};
use crate::registry::ServiceRecord;

/// 独立命名空间（不触碰全局合约单例）。
pub fn namespace_for(unit: &str, version: &str) -> Arc<UnitNamespace> {
    let forced = Arc::new(ForcedParentPrefixes::new());
    let contract = Arc::new(SharedContractSpace::new());
    let host = Arc::new(HostTier::new(Arc::clone(&forced)));
    UnitNamespace::new(
        UnitId::parse(unit).expect("test unit id"),
        version,
        forced,
        contract,
        host,
    )
}

/// 不注册任何服务的容器。
pub fn idle_container() -> Arc<dyn Container> {
    Arc::new(StubContainer {
        services: Vec::new(),
        resolver: Mutex::new(None),
        active: AtomicBool::new(true),
    })
}

/// 已就绪实例，标签含 `version`。
pub fn ready_instance(unit: &str, version: &str) -> Arc<UnitInstance> {
    labeled_instance::<&str, &str>(unit, version, [])
}

/// 已就绪实例，附加自定义标签。
pub fn labeled_instance<K, V>(
    unit: &str,
    version: &str,
    extra: impl IntoIterator<Item = (K, V)>,
) -> Arc<UnitInstance>
where
    K: Into<String>,
    V: Into<String>,
{
    let mut labels = LabelSet::from_pairs([("version", version)]);
    for (key, value) in extra {
        labels.insert(key, value);
    }
    let definition = Arc::new(UnitDefinition::new(unit, version, "stub.Entry"));
    let instance = UnitInstance::new(
        UnitId::parse(unit).expect("test unit id"),
        definition,
        namespace_for(unit, version),
        idle_container(),
        labels,
    );
    assert!(instance.mark_ready());
    instance
}

/// 由闭包构造的服务记录。
pub fn service_record<F>(unit: &str, short_id: &str, handler: F) -> Arc<ServiceRecord>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    let unit_id = UnitId::parse(unit).expect("test unit id");
    let fqsid = Fqsid::compose(&unit_id, short_id).expect("test fqsid");
    Arc::new(ServiceRecord::new(
        fqsid,
        unit_id,
        Arc::new(()) as BeanRef,
        ServiceMethod::new(short_id, "StubService", Arc::new(handler) as ServiceHandler),
    ))
}

/// 睡眠指定时长后返回的服务记录（超时与舱壁用例）。
pub fn sleeping_record(unit: &str, short_id: &str, sleep: Duration) -> Arc<ServiceRecord> {
    service_record(unit, short_id, move |_args| {
        std::thread::sleep(sleep);
        Ok(Value::Null)
    })
}

/// 可配置事务探测。
pub struct FlagTransactionVerifier {
    transactional: AtomicBool,
}

impl FlagTransactionVerifier {
    pub fn new(transactional: bool) -> Self {
        Self {
            transactional: AtomicBool::new(transactional),
        }
    }

    pub fn set(&self, transactional: bool) {
        self.transactional.store(transactional, Ordering::SeqCst);
    }
}

impl TransactionVerifier for FlagTransactionVerifier {
    fn is_transactional(&self, _method: &str, _declaring_type: &str) -> bool {
        self.transactional.load(Ordering::SeqCst)
    }
}

/// 计数传播器：验证 capture/replay/restore 的配对与次序。
pub struct CountingPropagator {
    captures: AtomicU32,
    replays: AtomicU32,
    restores: AtomicU32,
}

impl CountingPropagator {
    pub fn new() -> Self {
        Self {
            captures: AtomicU32::new(0),
            replays: AtomicU32::new(0),
            restores: AtomicU32::new(0),
        }
    }

    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn replays(&self) -> u32 {
        self.replays.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> u32 {
        self.restores.load(Ordering::SeqCst)
    }
}

impl Default for CountingPropagator {
    fn default() -> Self {
        Self::new()
    }
}

impl Propagator for CountingPropagator {
    fn name(&self) -> &str {
        "counting"
    }

    fn capture(&self) -> Box<dyn std::any::Any + Send> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Box::new(())
    }

    fn replay(&self, _snapshot: &(dyn std::any::Any + Send)) -> Box<dyn std::any::Any + Send> {
        self.replays.fetch_add(1, Ordering::SeqCst);
        Box::new(())
    }

    fn restore(&self, _token: Box<dyn std::any::Any + Send>) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}

/// 一律拒绝的安全校验器。
pub struct RejectingVerifier;

impl SecurityVerifier for RejectingVerifier {
    fn verify(&self, unit_id: &UnitId, _source: &UnitSource) -> Result<()> {
        Err(LingError::install_failure(
            unit_id.as_str(),
            "rejected by security verifier",
        ))
    }
}

/// 记录清理动作的资源守卫。
pub struct RecordingGuard {
    cleaned: Mutex<Vec<String>>,
}

impl RecordingGuard {
    pub fn new() -> Self {
        Self {
            cleaned: Mutex::new(Vec::new()),
        }
    }

    pub fn cleaned_units(&self) -> Vec<String> {
        self.cleaned.lock().clone()
    }
}

impl Default for RecordingGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceGuard for RecordingGuard {
    fn cleanup(&self, unit_id: &UnitId) {
        self.cleaned.lock().push(unit_id.as_str().to_owned());
    }
}

/// 桩服务声明：短名、接口、元数据与处理闭包。
#[derive(Clone)]
pub struct StubService {
    pub short_id: String,
    pub declaring_type: String,
    pub interface: Option<String>,
    pub metadata: MethodMetadata,
    pub handler: ServiceHandler,
}

impl StubService {
    pub fn new<F>(short_id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            short_id: short_id.into(),
            declaring_type: "StubService".to_owned(),
            interface: None,
            metadata: MethodMetadata::default(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_declaring_type(mut self, declaring_type: impl Into<String>) -> Self {
        self.declaring_type = declaring_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: MethodMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 桩容器：启动时把声明的服务逐条登记进单元上下文。
pub struct StubContainer {
    services: Vec<StubService>,
    resolver: Mutex<Option<Arc<dyn NameResolver>>>,
    active: AtomicBool,
}

impl Container for StubContainer {
    fn start(&self, ctx: &dyn UnitContext) -> Result<()> {
        for service in &self.services {
            let method = ServiceMethod::new(
                service.short_id.clone(),
                service.declaring_type.clone(),
                Arc::clone(&service.handler),
            )
            .with_metadata(service.metadata.clone());
            ctx.register_service(method, Arc::new(()) as BeanRef)?;
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn bean(&self, name: &str) -> Option<BeanRef> {
        self.services
            .iter()
            .any(|service| service.short_id == name)
            .then(|| Arc::new(()) as BeanRef)
    }

    fn bean_by_interface(&self, interface: &str) -> Option<BeanRef> {
        self.services
            .iter()
            .any(|service| service.interface.as_deref() == Some(interface))
            .then(|| Arc::new(()) as BeanRef)
    }

    fn bean_names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|service| service.short_id.clone())
            .collect()
    }

    fn resolver(&self) -> Arc<dyn NameResolver> {
        self.resolver
            .lock()
            .clone()
            .expect("stub container not bound to a resolver")
    }
}

/// 桩容器工厂：按单元 id 配置启动行为。
pub struct StubContainerFactory {
    units: DashMap<String, Vec<StubService>>,
    failing: DashMap<String, String>,
    created: AtomicU32,
}

impl StubContainerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            units: DashMap::new(),
            failing: DashMap::new(),
            created: AtomicU32::new(0),
        })
    }

    /// 配置某单元启动时登记的服务。
    pub fn register_unit(&self, unit: &str, services: Vec<StubService>) {
        self.units.insert(unit.to_owned(), services);
    }

    /// 令某单元的容器构造失败（安装回滚用例）。
    pub fn fail_unit(&self, unit: &str, reason: impl Into<String>) {
        self.failing.insert(unit.to_owned(), reason.into());
    }

    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

impl ContainerFactory for StubContainerFactory {
    fn create(
        &self,
        unit_id: &UnitId,
        _source: &UnitSource,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Arc<dyn Container>> {
        if let Some(reason) = self.failing.get(unit_id.as_str()) {
            return Err(LingError::install_failure(
                unit_id.as_str(),
                reason.value().clone(),
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let services = self
            .units
            .get(unit_id.as_str())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(Arc::new(StubContainer {
            services,
            resolver: Mutex::new(Some(resolver)),
            active: AtomicBool::new(false),
        }))
    }
}

/// 收集事件类别序列的订阅辅助。
pub fn record_events(
    bus: &crate::event::EventBus,
    kind: ling_core::event::EventKind,
) -> Arc<Mutex<Vec<LingEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(
        None,
        kind,
        Arc::new(move |event| {
            sink.lock().push(event.clone());
            Ok(())
        }),
    );
    seen
}

/// 集成测试用的快节奏配置：毫秒级排水与泄漏探测。
pub fn fast_config() -> LingConfig {
    let mut config = LingConfig::default();
    config.runtime.dying_check_interval = 20;
    config.runtime.leak_check_delay = 50;
    config.runtime.force_cleanup_delay = 2_000;
    config.runtime.default_timeout = 2_000;
    config
}
