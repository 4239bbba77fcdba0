//! 事件总线：同步类型化发布订阅。
//!
//! # 契约说明（What）
//! - 订阅以 `(属主单元, 事件类别)` 登记；卸载单元时其全部订阅强制
//!   移除——处理器闭包会捕获单元内对象，不清理将钉住其命名空间；
//! - 发布同步执行；处理器错误记录日志后吞没，**致命类别**的错误
//!   重新抛出以快速失败。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use ling_core::event::{EventKind, LingEvent};
use ling_core::ids::UnitId;
use ling_core::{ErrorCategory, Result};

/// 事件处理器。返回错误时由总线按分类处置。
pub type EventHandler = Arc<dyn Fn(&LingEvent) -> Result<()> + Send + Sync>;

struct Subscription {
    id: u64,
    owner: Option<UnitId>,
    kind: EventKind,
    handler: EventHandler,
}

pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 登记订阅；`owner` 为空表示宿主订阅者（不随任何单元清理）。
    pub fn subscribe(
        &self,
        owner: Option<UnitId>,
        kind: EventKind,
        handler: EventHandler,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push(Subscription {
            id,
            owner,
            kind,
            handler,
        });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.write().retain(|sub| sub.id != id);
    }

    /// 移除单元名下的全部订阅；卸载序列的强制步骤。
    pub fn remove_owner(&self, unit: &UnitId) {
        self.subscriptions
            .write()
            .retain(|sub| sub.owner.as_ref() != Some(unit));
    }

    /// 同步发布。
    ///
    /// # 错误语义
    /// - 普通处理器错误：告警并继续分发；
    /// - 致命类别错误：立即向调用方重新抛出。
    pub fn publish(&self, event: &LingEvent) -> Result<()> {
        let kind = event.kind();
        let handlers: Vec<(u64, EventHandler)> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|sub| sub.kind == kind)
                .map(|sub| (sub.id, Arc::clone(&sub.handler)))
                .collect()
        };
        for (id, handler) in handlers {
            if let Err(err) = handler(event) {
                if err.category() == ErrorCategory::Fatal {
                    return Err(err);
                }
                warn!(
                    subscription = id,
                    kind = kind.as_str(),
                    error = %err,
                    "event handler failed, swallowed"
                );
            }
        }
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ling_core::LingError;
    use std::sync::atomic::AtomicUsize;

    fn installed_event(unit: &str) -> LingEvent {
        LingEvent::Installed {
            unit: UnitId::parse(unit).unwrap(),
            version: "v1".into(),
        }
    }

    #[test]
    fn publish_reaches_matching_kind_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(
            None,
            EventKind::Installed,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        bus.publish(&installed_event("user")).unwrap();
        bus.publish(&LingEvent::Shutdown).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_errors_swallowed_unless_fatal() {
        let bus = EventBus::new();
        bus.subscribe(
            None,
            EventKind::Installed,
            Arc::new(|_| Err(LingError::internal("flaky handler"))),
        );
        assert!(bus.publish(&installed_event("user")).is_ok());

        bus.subscribe(
            None,
            EventKind::Installed,
            Arc::new(|_| Err(LingError::fatal("corrupted state"))),
        );
        assert!(bus.publish(&installed_event("user")).is_err());
    }

    #[test]
    fn owner_cleanup_removes_subscriptions() {
        let bus = EventBus::new();
        let unit = UnitId::parse("user").unwrap();
        bus.subscribe(Some(unit.clone()), EventKind::Installed, Arc::new(|_| Ok(())));
        bus.subscribe(None, EventKind::Installed, Arc::new(|_| Ok(())));
        assert_eq!(bus.subscription_count(), 2);
        bus.remove_owner(&unit);
        assert_eq!(bus.subscription_count(), 1, "宿主订阅保留");
    }
}
