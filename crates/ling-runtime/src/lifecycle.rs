//! 生命周期管理：垂死实例的排水、销毁序列与泄漏探测。
//!
//! # 排水与销毁（How）
//! - 共享调度线程按 `runtime.dying-check-interval` 巡检所有实例池，
//!   计数归零的垂死实例进入销毁序列：
//!   1. 发布 `stopping` 事件；
//!   2. 停止容器（释放 bean 与资源）；
//!   3. 调用资源守卫（逆转单元造成的全局注册）；
//!   4. 关闭单元命名空间；
//!   5. 登记延迟探活：宽限期后弱引用仍可升级则告警泄漏；
//!   6. 发布 `stopped` 事件。
//! - 单元停机（卸载或全局停机）同步排水，直至队列清空或
//!   `runtime.force-cleanup-delay` 耗尽后强制销毁；排水循环从不
//!   持有池锁休眠，清扫摘取使用 `try_lock`。
//!
//! # 泄漏语义（What）
//! - 弱引用探活是诊断而非正确性条件：只要求上报，不保证杜绝。

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use ling_core::config::LingConfig;
use ling_core::event::LingEvent;
use ling_core::spi::ResourceGuard;

use crate::event::EventBus;
use crate::instance::UnitInstance;
use crate::isolation::UnitNamespace;
use crate::manager::UnitRuntime;

struct LeakProbe {
    due: Instant,
    unit: ling_core::ids::UnitId,
    version: String,
    namespace: Weak<UnitNamespace>,
}

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

pub struct LifecycleManager {
    runtimes: Arc<DashMap<String, Arc<UnitRuntime>>>,
    bus: Arc<EventBus>,
    guard: Arc<dyn ResourceGuard>,
    tick: Duration,
    leak_delay: Duration,
    force_cleanup_delay: Duration,
    signal: Arc<StopSignal>,
    probes: Arc<Mutex<Vec<LeakProbe>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        runtimes: Arc<DashMap<String, Arc<UnitRuntime>>>,
        bus: Arc<EventBus>,
        guard: Arc<dyn ResourceGuard>,
        config: &LingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtimes,
            bus,
            guard,
            tick: Duration::from_millis(config.runtime.dying_check_interval.max(1)),
            leak_delay: Duration::from_millis(config.runtime.leak_check_delay),
            force_cleanup_delay: Duration::from_millis(config.runtime.force_cleanup_delay),
            signal: Arc::new(StopSignal {
                stopped: Mutex::new(false),
                wake: Condvar::new(),
            }),
            probes: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        })
    }

    /// 启动共享调度线程。幂等。
    pub fn start(this: &Arc<Self>) {
        let mut worker = this.worker.lock();
        if worker.is_some() {
            return;
        }
        let manager = Arc::clone(this);
        let handle = std::thread::Builder::new()
            .name("ling-lifecycle".to_owned())
            .spawn(move || {
                loop {
                    {
                        let mut stopped = manager.signal.stopped.lock();
                        if *stopped {
                            break;
                        }
                        let _ = manager
                            .signal
                            .wake
                            .wait_for(&mut stopped, manager.tick);
                        if *stopped {
                            break;
                        }
                    }
                    manager.sweep();
                }
            })
            .expect("spawn lifecycle scheduler thread");
        *worker = Some(handle);
    }

    /// 单轮巡检：销毁可回收实例并处理到期探活。
    pub fn sweep(&self) {
        for entry in self.runtimes.iter() {
            for instance in entry.value().pool().collect_destroyable() {
                self.destroy(&instance);
            }
        }
        self.check_probes();
    }

    fn publish(&self, event: LingEvent) {
        if let Err(err) = self.bus.publish(&event) {
            warn!(error = %err, "lifecycle event publication failed");
        }
    }

    /// 销毁序列；调用前实例已脱离池。
    fn destroy(&self, instance: &Arc<UnitInstance>) {
        let unit = instance.unit_id().clone();
        let version = instance.version().to_owned();
        self.publish(LingEvent::Stopping {
            unit: unit.clone(),
            version: version.clone(),
        });
        if let Err(err) = instance.container().stop() {
            warn!(unit = %unit, version = %version, error = %err, "container stop failed");
        }
        self.guard.cleanup(&unit);
        instance.namespace().close();
        self.probes.lock().push(LeakProbe {
            due: Instant::now() + self.leak_delay,
            unit: unit.clone(),
            version: version.clone(),
            namespace: Arc::downgrade(instance.namespace()),
        });
        instance.mark_destroyed();
        debug!(unit = %unit, version = %version, "instance destroyed");
        self.publish(LingEvent::Stopped { unit, version });
    }

    fn check_probes(&self) {
        let now = Instant::now();
        let due: Vec<LeakProbe> = {
            let mut probes = self.probes.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                probes.drain(..).partition(|probe| probe.due <= now);
            *probes = pending;
            ready
        };
        for probe in due {
            let leaked = probe.namespace.upgrade().is_some();
            if leaked || self.guard.detect_leak(&probe.unit) {
                warn!(
                    unit = %probe.unit,
                    version = %probe.version,
                    "namespace still reachable after grace delay, possible leak"
                );
            }
        }
    }

    /// 同步排空一个单元的垂死队列，超时后强制销毁。
    ///
    /// 池锁只在摘取瞬间持有，休眠永远发生在锁外。
    pub fn drain_unit(&self, runtime: &Arc<UnitRuntime>) {
        let deadline = Instant::now() + self.force_cleanup_delay;
        loop {
            for instance in runtime.pool().collect_destroyable() {
                self.destroy(&instance);
            }
            if runtime.pool().dying_count() == 0 {
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(self.tick.min(Duration::from_millis(20)));
        }
        for instance in runtime.pool().drain_remaining() {
            warn!(
                unit = %instance.unit_id(),
                version = %instance.version(),
                refcount = instance.refcount(),
                "force-destroying instance after cleanup delay"
            );
            self.destroy(&instance);
        }
    }

    /// 到期前强制执行全部探活（全局停机时避免丢失诊断）。
    pub fn flush_probes(&self) {
        let probes: Vec<LeakProbe> = std::mem::take(&mut *self.probes.lock());
        for probe in probes {
            if probe.namespace.upgrade().is_some() {
                warn!(
                    unit = %probe.unit,
                    version = %probe.version,
                    "namespace still reachable at shutdown, possible leak"
                );
            }
        }
    }

    /// 停止调度线程。幂等。
    pub fn shutdown(&self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wake.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
