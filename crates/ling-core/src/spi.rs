//! SPI 契约：微内核消费的全部扩展点。
//!
//! # 角色定位（Why）
//! - 核心把“容器”“安全校验”“事务探测”“上下文传播”“资源守卫”与
//!   “治理策略提供者”都视为外部协作者，仅依赖本模块的对象安全
//!   Trait；具体 DI 框架、ORM 或事务机制的选择不进入契约；
//! - 所有 Trait 要求 `Send + Sync`，实现必须可被 `Arc` 跨线程共享。
//!
//! # 契约说明（What）
//! - **前置条件**：实现方注册到运行时之前必须自行完成初始化；
//! - **后置条件**：运行时保证在全局停机后不再回调任何 SPI；
//! - 策略提供者与传播器抛出的错误由内核按非致命处理：记录日志并
//!   继续管道，绝不中断业务调用。

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::decision::GovernanceDecision;
use crate::definition::{UnitDefinition, UnitSource};
use crate::error::LingError;
use crate::event::LingEvent;
use crate::ids::UnitId;
use crate::invocation::{InvocationContext, Value};
use crate::types::AccessType;

/// 类型描述符：合约层与单元层解析出的“名字 → 版本化定义”记录。
///
/// Rust 移植下的命名空间分层以描述符注册表落地：宿主镜像、合约
/// 单例与单元命名空间各自持有描述符表，名称解析返回共享描述符。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// 全限定类型名，如 `com.demo.user.UserService`。
    pub name: String,
    /// 定义版本；宿主内建类型可为空。
    pub version: Option<String>,
    /// 定义出处（归档名或层级标记），冲突告警时输出。
    pub origin: String,
}

impl TypeDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: Option<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            origin: origin.into(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{} ({})", self.name, version, self.origin),
            None => write!(f, "{} ({})", self.name, self.origin),
        }
    }
}

/// 名称解析器：单元命名空间向容器暴露的只读视图。
///
/// 容器通过它解析类型与资源（child-first，合约前缀强制上溯）；
/// 命名空间关闭后任何解析请求返回 `namespace.closed`。
pub trait NameResolver: Send + Sync {
    /// 解析类型名。
    fn resolve_type(&self, name: &str) -> Result<Arc<TypeDescriptor>, LingError>;
    /// 解析资源路径（配置文件、资源包）。
    fn resolve_resource(&self, path: &str) -> Result<Arc<[u8]>, LingError>;
    /// 解析器是否已关闭（中毒）。
    fn is_closed(&self) -> bool;
}

/// 容器内 bean 的类型擦除引用。
pub type BeanRef = Arc<dyn Any + Send + Sync>;

/// 方法句柄：短服务名到可调用体的绑定。
pub type ServiceHandler =
    Arc<dyn Fn(&[Value]) -> Result<Value, LingError> + Send + Sync>;

/// 方法上的声明式治理元数据（元数据提供者的输入，等价于注解声明）。
#[derive(Clone, Debug, Default)]
pub struct MethodMetadata {
    pub permission: Option<String>,
    pub access: Option<AccessType>,
    pub audit_enabled: Option<bool>,
    pub audit_action: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
    pub fallback_value: Option<Value>,
}

impl MethodMetadata {
    /// 元数据是否未声明任何字段。
    pub fn is_empty(&self) -> bool {
        self.permission.is_none()
            && self.access.is_none()
            && self.audit_enabled.is_none()
            && self.audit_action.is_none()
            && self.timeout.is_none()
            && self.retry_count.is_none()
            && self.fallback_value.is_none()
    }
}

/// 注册到服务表的方法：短名、声明类型、元数据与句柄。
#[derive(Clone)]
pub struct ServiceMethod {
    pub short_id: String,
    /// 声明该方法的接口/类型短名；名称推断的权限串由它拼出。
    pub declaring_type: String,
    pub metadata: MethodMetadata,
    pub handler: ServiceHandler,
}

impl ServiceMethod {
    pub fn new(
        short_id: impl Into<String>,
        declaring_type: impl Into<String>,
        handler: ServiceHandler,
    ) -> Self {
        Self {
            short_id: short_id.into(),
            declaring_type: declaring_type.into(),
            metadata: MethodMetadata::default(),
            handler,
        }
    }

    pub fn with_metadata(mut self, metadata: MethodMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Debug for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMethod")
            .field("short_id", &self.short_id)
            .field("declaring_type", &self.declaring_type)
            .finish_non_exhaustive()
    }
}

/// 容器契约：单元私有的 bean 宿主。
///
/// # 生命周期（What）
/// - `start` 成功后容器处于活动态，期间须响应 bean 查询；
/// - `start` 的回调窗口内应完成服务扫描并通过
///   [`UnitContext::register_service`] 上报可调用方法；
/// - `stop` 释放全部 bean 与资源，幂等。
pub trait Container: Send + Sync {
    fn start(&self, ctx: &dyn UnitContext) -> Result<(), LingError>;
    fn stop(&self) -> Result<(), LingError>;
    fn is_active(&self) -> bool;
    /// 按 bean 名查询。
    fn bean(&self, name: &str) -> Option<BeanRef>;
    /// 按接口全名查询可赋值 bean；服务路由的扫描入口。
    fn bean_by_interface(&self, interface: &str) -> Option<BeanRef>;
    fn bean_names(&self) -> Vec<String>;
    /// 容器绑定的名称解析器。
    fn resolver(&self) -> Arc<dyn NameResolver>;
}

/// 容器工厂：给定单元来源与命名空间视图构造容器实例。
pub trait ContainerFactory: Send + Sync {
    fn create(
        &self,
        unit_id: &UnitId,
        source: &UnitSource,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Arc<dyn Container>, LingError>;
}

/// 对外服务句柄：路由代理实现的最小调用面。
pub trait ServiceHandle: Send + Sync {
    /// 以操作名发起一次受治理调用。
    fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Option<Value>, LingError>;
    /// 句柄面向的接口全名。
    fn interface_name(&self) -> &str;
}

/// 单元上下文：容器启动时交还给单元的运行时访问面。
pub trait UnitContext: Send + Sync {
    fn unit_id(&self) -> &UnitId;
    /// 协议级调用另一单元的服务。
    fn invoke(&self, fqsid: &str, args: Vec<Value>) -> Result<Option<Value>, LingError>;
    /// 获取接口的路由代理。
    fn get_service(&self, interface: &str) -> Option<Arc<dyn ServiceHandle>>;
    /// 容器适配层在启动扫描中登记可调用方法。
    fn register_service(&self, method: ServiceMethod, bean: BeanRef) -> Result<(), LingError>;
    fn publish_event(&self, event: LingEvent) -> Result<(), LingError>;
    /// 权限查询（只读）。
    fn is_allowed(&self, capability: &str, required: AccessType) -> bool;
}

/// 安装期安全校验；返回错误即中止安装。
pub trait SecurityVerifier: Send + Sync {
    fn verify(&self, unit_id: &UnitId, source: &UnitSource) -> Result<(), LingError>;
}

/// 事务探测：判定调用是否参与环境事务。
///
/// 命中时执行器在调用方工作线程上同步执行，绕过舱壁与跨线程交接
/// 以保全事务语义。无法提供可靠判定的实现应保守返回 `false`。
pub trait TransactionVerifier: Send + Sync {
    fn is_transactional(&self, method: &str, declaring_type: &str) -> bool;
}

/// 服务调用器：执行器与方法句柄之间的最后一跳。
pub trait ServiceInvoker: Send + Sync {
    fn invoke(
        &self,
        bean: &BeanRef,
        method: &ServiceMethod,
        args: &[Value],
    ) -> Result<Value, LingError>;
}

/// 缺省调用器：直接驱动方法句柄（快路径）。
#[derive(Clone, Copy, Debug, Default)]
pub struct HandleInvoker;

impl ServiceInvoker for HandleInvoker {
    fn invoke(
        &self,
        _bean: &BeanRef,
        method: &ServiceMethod,
        args: &[Value],
    ) -> Result<Value, LingError> {
        (method.handler)(args)
    }
}

/// 环境状态传播器：把调用方工作线程上的环境状态带到执行工作线程。
///
/// # 顺序保证（What）
/// - `capture` 在任务提交前于调用方线程执行；
/// - `replay` 在目标调用前于工作线程执行，返回恢复令牌；
/// - `restore` 在工作线程退出路径上执行（包括异常路径）。
pub trait Propagator: Send + Sync {
    fn name(&self) -> &str;
    fn capture(&self) -> Box<dyn Any + Send>;
    fn replay(&self, snapshot: &(dyn Any + Send)) -> Box<dyn Any + Send>;
    fn restore(&self, token: Box<dyn Any + Send>);
}

/// 资源守卫：逆转单元造成的全局注册，并辅助泄漏诊断。
pub trait ResourceGuard: Send + Sync {
    /// 销毁序列中回收单元的全局性注册（驱动类单例等）。
    fn cleanup(&self, unit_id: &UnitId);
    /// 泄漏探测钩子；返回 `true` 表示怀疑泄漏，运行时据此告警。
    fn detect_leak(&self, unit_id: &UnitId) -> bool {
        let _ = unit_id;
        false
    }
}

/// 策略提供者解析时可见的方法侧信息。
#[derive(Clone, Copy)]
pub struct PolicyQuery<'a> {
    pub operation: &'a str,
    pub declaring_type: &'a str,
    /// 注册期声明的方法元数据；协议直连调用可能缺失。
    pub metadata: Option<&'a MethodMetadata>,
    /// 目标单元的定义；目标缺席（纯宿主调用）时为空。
    pub definition: Option<&'a UnitDefinition>,
}

/// 治理策略提供者：决策管道的一环。
///
/// # 契约说明（What）
/// - `order` 越小优先级越高；内置链占用 0..=4，宿主扩展建议避开；
/// - `resolve` 返回 `None` 表示无意见；返回部分决策时仅对自身有把握
///   的字段赋值，未知字段保持 `None`；
/// - 实现内部错误不得向外抛出决策之外的影响——内核记录并继续。
pub trait PolicyProvider: Send + Sync {
    fn order(&self) -> i32;
    /// 决策来源标签；写入 `source_tag` 供权限拒绝定位规则出处。
    fn tag(&self) -> &str {
        "provider"
    }
    fn resolve(&self, query: &PolicyQuery<'_>, ctx: &InvocationContext)
    -> Option<GovernanceDecision>;
}
