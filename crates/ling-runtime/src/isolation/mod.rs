//! 隔离与命名空间模型：宿主 / 共享合约 / 单元三层解析。
//!
//! # 体系定位（Why）
//! - 单元之间互不可见，唯一的共享视界是合约层：跨单元流动的接口与
//!   值类型必须从同一棵定义树解析，否则一个层里创建的合约值无法被
//!   另一层识别——强制上溯（forced-parent）策略因此是正确性条件，
//!   而非优化；
//! - Rust 移植下“类加载器”落地为版本化类型描述符注册表：宿主镜像
//!   对应内建表，合约层是进程级单例，每个单元实例持有自己的局部表
//!   与归档句柄。
//!
//! # 解析顺序（How）
//! - 命中强制上溯前缀（内建、日志、合约包、合约层自有前缀与宿主
//!   追加项）→ 向上委派：先合约层，后宿主层；
//! - 其余名称 child-first：先查单元局部表，未命中再向上委派；
//! - 资源解析同样 child-first，单元读到自己的配置而非宿主的。
//!
//! # 关闭契约（What）
//! - 关闭单元层必须：释放归档句柄、清空内部缓存、令解析器中毒
//!   （后续请求返回 `namespace.closed`）、允许回收器回收自身；
//! - 生命周期管理器在宽限期后用弱引用探测可达性（仅诊断）。

mod contract;
mod namespace;
mod prefix;

pub use contract::{ContractArchive, SharedContractSpace};
pub use namespace::{HostTier, NamespaceContext, NamespaceGuard, UnitNamespace};
pub use prefix::ForcedParentPrefixes;
