//! 单元命名空间与宿主层：名称解析的落地实现。

use std::cell::RefCell;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use ling_core::definition::UnitSource;
use ling_core::ids::UnitId;
use ling_core::spi::{NameResolver, TypeDescriptor};
use ling_core::{LingError, Result};

use super::contract::SharedContractSpace;
use super::prefix::ForcedParentPrefixes;

/// 宿主层：进程镜像内建类型加上宿主显式注册的定义。
///
/// # 解析语义（What）
/// - 显式注册的描述符优先返回；
/// - 命中强制上溯前缀的名称视为镜像内建，按需合成描述符——它们
///   由宿主二进制静态链接，不存在“未装载”状态。
pub struct HostTier {
    registered: DashMap<String, Arc<TypeDescriptor>>,
    forced: Arc<ForcedParentPrefixes>,
}

impl HostTier {
    pub fn new(forced: Arc<ForcedParentPrefixes>) -> Self {
        Self {
            registered: DashMap::new(),
            forced,
        }
    }

    /// 宿主显式注册一个内建类型描述符。
    pub fn register(&self, descriptor: TypeDescriptor) {
        self.registered
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        if let Some(entry) = self.registered.get(name) {
            return Some(Arc::clone(entry.value()));
        }
        if self.forced.matches(name) {
            return Some(Arc::new(TypeDescriptor::new(name, None, "host-image")));
        }
        None
    }
}

/// 已打开的归档句柄；关闭命名空间时统一释放。
struct ArchiveHandle {
    path: PathBuf,
    // 句柄本体只为占住文件存续期，关闭时随 Vec 清空一起释放。
    _file: File,
}

/// 单元命名空间：一个实例独占的名称与资源解析器。
///
/// # 解析顺序（How）
/// 1. 强制上溯前缀或合约层自有前缀 → 合约层，未命中再宿主层；
/// 2. 其余名称 child-first：局部表 → 合约层 → 宿主层；
/// 3. 资源 child-first：局部注册表 → 开发目录文件。
///
/// # 关闭契约（What）
/// - [`close`](Self::close) 释放归档句柄、清空局部表并令解析器中毒；
/// - 关闭后任何解析请求返回 `namespace.closed`；
/// - 实现防御性地清空内部集合，即便调用方遗漏了标准关闭路径，
///   泄漏探测（弱引用宽限探活）仍能给出可读告警。
pub struct UnitNamespace {
    unit_id: UnitId,
    version: String,
    forced: Arc<ForcedParentPrefixes>,
    contract: Arc<SharedContractSpace>,
    host: Arc<HostTier>,
    local_types: DashMap<String, Arc<TypeDescriptor>>,
    local_resources: DashMap<String, Arc<[u8]>>,
    archives: Mutex<Vec<ArchiveHandle>>,
    source_dir: Mutex<Option<PathBuf>>,
    closed: AtomicBool,
}

impl UnitNamespace {
    pub fn new(
        unit_id: UnitId,
        version: impl Into<String>,
        forced: Arc<ForcedParentPrefixes>,
        contract: Arc<SharedContractSpace>,
        host: Arc<HostTier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            unit_id,
            version: version.into(),
            forced,
            contract,
            host,
            local_types: DashMap::new(),
            local_resources: DashMap::new(),
            archives: Mutex::new(Vec::new()),
            source_dir: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 绑定单元来源：打包归档打开并持有句柄，开发目录记录根路径。
    pub fn attach_source(&self, source: &UnitSource) -> Result<()> {
        self.ensure_open()?;
        match source {
            UnitSource::Packaged(path) => {
                let file = File::open(path).map_err(|err| LingError::IsolationFailure {
                    message: format!("cannot open unit archive `{}`: {err}", path.display()),
                })?;
                self.archives.lock().push(ArchiveHandle {
                    path: path.clone(),
                    _file: file,
                });
            }
            UnitSource::Directory(path) => {
                if !path.is_dir() {
                    return Err(LingError::IsolationFailure {
                        message: format!("unit source dir `{}` does not exist", path.display()),
                    });
                }
                *self.source_dir.lock() = Some(path.clone());
            }
        }
        Ok(())
    }

    /// 登记单元局部类型定义（容器适配层在装载扫描中调用）。
    pub fn register_type(&self, descriptor: TypeDescriptor) -> Result<()> {
        self.ensure_open()?;
        self.local_types
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// 登记单元局部资源。
    pub fn register_resource(&self, path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        self.ensure_open()?;
        self.local_resources.insert(path.into(), bytes.into());
        Ok(())
    }

    /// 关闭命名空间：释放句柄、清空缓存、置中毒标记。幂等。
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = {
            let mut archives = self.archives.lock();
            let paths: Vec<_> = archives.iter().map(|h| h.path.clone()).collect();
            archives.clear();
            paths
        };
        self.local_types.clear();
        self.local_resources.clear();
        *self.source_dir.lock() = None;
        debug!(
            unit = %self.unit_id,
            version = %self.version,
            archives = released.len(),
            "unit namespace closed"
        );
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LingError::NamespaceClosed {
                unit: self.unit_id.as_str().to_owned(),
            });
        }
        Ok(())
    }

    fn delegate_up(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        if let Some(descriptor) = self.contract.resolve(name) {
            return Ok(descriptor);
        }
        if let Some(descriptor) = self.host.resolve(name) {
            return Ok(descriptor);
        }
        Err(LingError::IsolationFailure {
            message: format!(
                "type `{name}` not found in unit `{}` nor parent tiers",
                self.unit_id
            ),
        })
    }
}

impl NameResolver for UnitNamespace {
    fn resolve_type(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        self.ensure_open()?;
        if self.forced.matches(name) || self.contract.owns_prefix(name) {
            return self.delegate_up(name);
        }
        if let Some(local) = self.local_types.get(name) {
            return Ok(Arc::clone(local.value()));
        }
        self.delegate_up(name)
    }

    fn resolve_resource(&self, path: &str) -> Result<Arc<[u8]>> {
        self.ensure_open()?;
        if let Some(local) = self.local_resources.get(path) {
            return Ok(Arc::clone(local.value()));
        }
        // 开发目录：child-first 直接读单元自己的文件。
        if let Some(dir) = self.source_dir.lock().clone() {
            let candidate = dir.join(path);
            if candidate.is_file() {
                let bytes = std::fs::read(&candidate).map_err(|err| LingError::IsolationFailure {
                    message: format!("cannot read resource `{}`: {err}", candidate.display()),
                })?;
                return Ok(Arc::from(bytes.into_boxed_slice()));
            }
        }
        Err(LingError::IsolationFailure {
            message: format!("resource `{path}` not found in unit `{}`", self.unit_id),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

thread_local! {
    static CURRENT_NAMESPACE: RefCell<Vec<Arc<UnitNamespace>>> = const { RefCell::new(Vec::new()) };
}

/// 工作线程的命名空间上下文：反射式名称解析看到当前单元的名字。
pub struct NamespaceContext;

impl NamespaceContext {
    /// 进入单元命名空间；守卫析构时恢复上一层。
    pub fn enter(namespace: Arc<UnitNamespace>) -> NamespaceGuard {
        CURRENT_NAMESPACE.with(|stack| stack.borrow_mut().push(namespace));
        NamespaceGuard { _private: () }
    }

    /// 当前线程生效的命名空间。
    pub fn current() -> Option<Arc<UnitNamespace>> {
        CURRENT_NAMESPACE.with(|stack| stack.borrow().last().cloned())
    }
}

/// 命名空间上下文守卫；任何退出路径（含 panic 展开）都会恢复。
pub struct NamespaceGuard {
    _private: (),
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        CURRENT_NAMESPACE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
