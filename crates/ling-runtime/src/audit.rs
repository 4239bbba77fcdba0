//! 审计管道：有界队列加单工作线程的异步发射。
//!
//! # 设计动机（Why）
//! - 审计绝不拖慢业务路径：入队为非阻塞 `try_send`，队满丢弃并计数，
//!   每满 100 次丢弃告警一次；
//! - 单工作线程保证同一链路的记录按提交顺序发射；
//! - 每条记录同时落结构化日志与事件总线旁路（面板订阅者消费）。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{info, warn};

use ling_core::audit::AuditRecord;
use ling_core::event::LingEvent;

use crate::event::EventBus;

/// 队列容量下限；构造参数低于此值时被抬升。
pub const MIN_QUEUE_CAPACITY: usize = 1_000;

const DROP_WARN_EVERY: u64 = 100;

enum AuditMessage {
    Record(AuditRecord),
    Shutdown,
}

pub struct AuditPipeline {
    tx: SyncSender<AuditMessage>,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditPipeline {
    /// 构造管道并启动专用工作线程。
    pub fn new(capacity: usize, bus: Arc<EventBus>) -> Arc<Self> {
        let capacity = capacity.max(MIN_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::sync_channel::<AuditMessage>(capacity);
        let worker = std::thread::Builder::new()
            .name("ling-audit".to_owned())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        AuditMessage::Record(record) => {
                            info!(
                                trace_id = %record.trace_id,
                                caller = %record.caller,
                                action = %record.action,
                                resource = %record.resource,
                                cost_nanos = record.cost_nanos,
                                outcome = record.outcome.as_str(),
                                dev_bypass = record.dev_bypass,
                                "audit"
                            );
                            // 旁路发射失败同样不影响业务流。
                            if let Err(err) = bus.publish(&LingEvent::AuditLog(record)) {
                                warn!(error = %err, "audit event emission failed, swallowed");
                            }
                        }
                        AuditMessage::Shutdown => break,
                    }
                }
            })
            .expect("spawn audit worker thread");
        Arc::new(Self {
            tx,
            dropped: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 异步提交一条记录；队满时丢弃并计数。
    pub fn submit(&self, record: AuditRecord) {
        match self.tx.try_send(AuditMessage::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_WARN_EVERY == 0 {
                    warn!(dropped, "audit queue full, records dropped");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                // 停机后的迟到记录：静默丢弃。
            }
        }
    }

    /// 累计丢弃数，诊断用。
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 停机：排空在队记录后结束工作线程。幂等。
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        // 阻塞式入队停机标记，保证此前提交的记录先被发射。
        let _ = self.tx.send(AuditMessage::Shutdown);
        if worker.join().is_err() {
            warn!("audit worker terminated abnormally");
        }
    }
}

impl Drop for AuditPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ling_core::audit::AuditOutcome;
    use ling_core::event::EventKind;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;

    fn record(trace: &str) -> AuditRecord {
        AuditRecord::new(trace, "b", "write", "storage:sql", 42, AuditOutcome::Success)
    }

    #[test]
    fn records_reach_bus_in_order() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            None,
            EventKind::AuditLog,
            Arc::new(move |event| {
                if let LingEvent::AuditLog(record) = event {
                    sink.lock().push(record.trace_id.clone());
                }
                Ok(())
            }),
        );
        let pipeline = AuditPipeline::new(MIN_QUEUE_CAPACITY, Arc::clone(&bus));
        for i in 0..16 {
            pipeline.submit(record(&format!("t-{i:02}")));
        }
        pipeline.shutdown();
        let seen = seen.lock();
        assert_eq!(seen.len(), 16);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(*seen, sorted, "单工作线程保持提交顺序");
    }

    #[test]
    fn full_queue_drops_and_counts() {
        use std::sync::atomic::AtomicBool;

        let bus = Arc::new(EventBus::new());
        // 首条记录阻塞工作线程片刻，让生产侧灌满队列逼出丢弃路径。
        let stalled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stalled);
        bus.subscribe(
            None,
            EventKind::AuditLog,
            Arc::new(move |_| {
                if !flag.swap(true, Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(())
            }),
        );
        let pipeline = AuditPipeline::new(MIN_QUEUE_CAPACITY, bus);
        for i in 0..(MIN_QUEUE_CAPACITY + 500) {
            pipeline.submit(record(&format!("t-{i}")));
        }
        assert!(pipeline.dropped() > 0);
        pipeline.shutdown();
    }
}
