//! 强制上溯前缀表：单元层必须向上委派的名称前缀集合。

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use ling_core::LingError;
use ling_core::ids::CONTRACT_CAPABILITY_PREFIX;

/// 宿主内建前缀：运行时内部类型、日志门面与序列化契约。
const INTRINSIC_PREFIXES: [&str; 4] = ["std.", "core.", "logging.", "serde."];

/// 强制上溯前缀表。
///
/// # 契约说明（What）
/// - 启动期可变：宿主通过 [`add`](Self::add) 追加自定义前缀；
/// - 首个单元安装时冻结（[`freeze`](Self::freeze)），此后追加请求
///   被拒绝并告警——前缀表在运行中途变化会破坏已解析名称的一致性。
pub struct ForcedParentPrefixes {
    entries: RwLock<Vec<String>>,
    frozen: AtomicBool,
}

impl ForcedParentPrefixes {
    pub fn new() -> Self {
        let mut entries: Vec<String> = INTRINSIC_PREFIXES.iter().map(|p| (*p).to_owned()).collect();
        entries.push(format!("{CONTRACT_CAPABILITY_PREFIX}."));
        Self {
            entries: RwLock::new(entries),
            frozen: AtomicBool::new(false),
        }
    }

    /// 追加宿主自定义前缀；冻结后拒绝。
    pub fn add(&self, prefix: impl Into<String>) -> Result<(), LingError> {
        if self.frozen.load(Ordering::Acquire) {
            let prefix = prefix.into();
            warn!(%prefix, "forced-parent prefix table is frozen, addition rejected");
            return Err(LingError::invalid_argument(format!(
                "forced-parent prefix table is read-only after first install (rejected `{prefix}`)"
            )));
        }
        let mut entries = self.entries.write();
        let prefix = prefix.into();
        if !entries.contains(&prefix) {
            entries.push(prefix);
        }
        Ok(())
    }

    /// 冻结前缀表；幂等。
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// 名称是否命中任一强制上溯前缀。
    pub fn matches(&self, name: &str) -> bool {
        self.entries.read().iter().any(|p| name.starts_with(p))
    }

    /// 当前前缀快照，诊断用。
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.read().clone()
    }
}

impl Default for ForcedParentPrefixes {
    fn default() -> Self {
        Self::new()
    }
}
