//! 调用执行器：单元级的有界并发与环境状态搬运。
//!
//! # 准入顺序（How）
//! 1. 令牌桶限流（快速失败 `rate.limited`）；
//! 2. 熔断器准入（OPEN/FORCED-OPEN → `call.not_permitted`）；
//! 3. 事务性调用在调用方工作线程同步执行，绕过舱壁与跨线程交接
//!    以保全事务语义；
//! 4. 其余调用：舱壁许可（超时 → `bulkhead.full`）→ 捕获上下文
//!    快照 → 提交单元线程池 → 工作线程重放快照、切入单元命名
//!    空间、驱动方法句柄 → 每条退出路径恢复；
//! 5. 调用方按 `timeout-ms` 等待，超时取消任务；
//! 6. 熔断结果按真实调用时长记账（按 FQSID 串行化），许可在任何
//!    路径上都被归还。
//!
//! # 线程模型（Why）
//! - 单元线程池是按预算尺寸专建的多线程 tokio 运行时：分配几条
//!   线程就起几条工作线程，卸载时后台停机归还；
//! - 工作任务体是纯同步调用（方法句柄不挂起），线程本地的链路与
//!   命名空间上下文在任务区间内稳定。

mod breaker;
mod bulkhead;
mod limiter;
mod snapshot;

pub use breaker::{BreakerState, CircuitBreaker};
pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use limiter::TokenBucket;
pub use snapshot::{ContextSnapshot, SnapshotGuard};

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use ling_core::config::RuntimeOptions;
use ling_core::ids::UnitId;
use ling_core::invocation::Value;
use ling_core::spi::{Propagator, ServiceInvoker, TransactionVerifier};
use ling_core::{LingError, Result};

use crate::diagnostics::{HistoryRing, InvocationSnapshot};
use crate::instance::UnitInstance;
use crate::isolation::NamespaceContext;
use crate::registry::ServiceRecord;

pub struct UnitExecutor {
    unit_id: UnitId,
    opts: RuntimeOptions,
    pool: Mutex<Option<tokio::runtime::Runtime>>,
    bulkhead: Bulkhead,
    limiters: DashMap<String, Arc<TokenBucket>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    tx_verifier: Arc<dyn TransactionVerifier>,
    invoker: Arc<dyn ServiceInvoker>,
    propagators: Arc<Vec<Arc<dyn Propagator>>>,
    history: HistoryRing,
}

impl UnitExecutor {
    /// 构造执行器并启动尺寸为 `threads` 的单元线程池。
    pub fn new(
        unit_id: UnitId,
        threads: usize,
        opts: RuntimeOptions,
        tx_verifier: Arc<dyn TransactionVerifier>,
        invoker: Arc<dyn ServiceInvoker>,
        propagators: Arc<Vec<Arc<dyn Propagator>>>,
    ) -> Result<Self> {
        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(format!("ling-{}", unit_id.as_str()))
            .build()
            .map_err(|err| {
                LingError::install_failure(
                    unit_id.as_str(),
                    format!("cannot build unit worker pool: {err}"),
                )
            })?;
        let bulkhead = Bulkhead::new(opts.bulkhead_max_concurrent);
        let history = HistoryRing::new(opts.max_history_snapshots);
        Ok(Self {
            unit_id,
            opts,
            pool: Mutex::new(Some(pool)),
            bulkhead,
            limiters: DashMap::new(),
            breakers: DashMap::new(),
            tx_verifier,
            invoker,
            propagators,
            history,
        })
    }

    /// 指定 FQSID 的熔断器（运维强制态与测试入口）。
    pub fn breaker(&self, fqsid: &str) -> Arc<CircuitBreaker> {
        Arc::clone(
            self.breakers
                .entry(fqsid.to_owned())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.opts.breaker.clone())))
                .value(),
        )
    }

    fn limiter(&self, fqsid: &str) -> Arc<TokenBucket> {
        Arc::clone(
            self.limiters
                .entry(fqsid.to_owned())
                .or_insert_with(|| {
                    Arc::new(TokenBucket::new(
                        self.opts.rate_limit.rate,
                        self.opts.rate_limit.burst,
                    ))
                })
                .value(),
        )
    }

    /// 执行一次已通过权限检查的调用。
    pub fn execute(
        &self,
        instance: &Arc<UnitInstance>,
        record: &Arc<ServiceRecord>,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value> {
        let fqsid = record.fqsid.as_str();

        if !self.limiter(fqsid).try_acquire() {
            self.history.record(InvocationSnapshot {
                fqsid: fqsid.to_owned(),
                cost_nanos: 0,
                error_code: Some(ling_core::error::codes::RATE_LIMITED),
            });
            return Err(LingError::RateLimited {
                fqsid: fqsid.to_owned(),
            });
        }

        let breaker = self.breaker(fqsid);
        if !breaker.try_acquire() {
            self.history.record(InvocationSnapshot {
                fqsid: fqsid.to_owned(),
                cost_nanos: 0,
                error_code: Some(ling_core::error::codes::CALL_NOT_PERMITTED),
            });
            return Err(LingError::CallNotPermitted {
                fqsid: fqsid.to_owned(),
            });
        }

        let transactional = self
            .tx_verifier
            .is_transactional(&record.method.short_id, &record.method.declaring_type);

        let started = Instant::now();
        let result = if transactional {
            self.invoke_inline(instance, record, args)
        } else {
            self.invoke_pooled(instance, record, args, timeout, &breaker)
        };
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => breaker.on_success(elapsed),
            Err(LingError::BulkheadFull { .. }) => {
                // 未进入目标调用，不计入熔断窗口（探针名额已归还）。
            }
            Err(_) => breaker.on_error(elapsed),
        }

        self.history.record(InvocationSnapshot {
            fqsid: fqsid.to_owned(),
            cost_nanos: elapsed.as_nanos() as u64,
            error_code: result.as_ref().err().map(|err| err.code()),
        });
        result
    }

    /// 事务路径：调用方工作线程同步执行，仅切换命名空间上下文。
    fn invoke_inline(
        &self,
        instance: &Arc<UnitInstance>,
        record: &Arc<ServiceRecord>,
        args: &[Value],
    ) -> Result<Value> {
        let _namespace = NamespaceContext::enter(Arc::clone(instance.namespace()));
        self.invoker.invoke(&record.bean, &record.method, args)
    }

    fn invoke_pooled(
        &self,
        instance: &Arc<UnitInstance>,
        record: &Arc<ServiceRecord>,
        args: &[Value],
        timeout: Duration,
        breaker: &CircuitBreaker,
    ) -> Result<Value> {
        let acquire_timeout = Duration::from_millis(self.opts.bulkhead_acquire_timeout);
        let Some(permit) = self.bulkhead.acquire(acquire_timeout) else {
            breaker.on_discard();
            return Err(LingError::BulkheadFull {
                unit: self.unit_id.as_str().to_owned(),
                wait_ms: self.opts.bulkhead_acquire_timeout,
            });
        };

        // 快照捕获先于任务提交。
        let snapshot = ContextSnapshot::capture(&self.propagators);
        let (tx, rx) = mpsc::sync_channel::<Result<Value>>(1);
        let bean = Arc::clone(&record.bean);
        let method = Arc::clone(&record.method);
        let invoker = Arc::clone(&self.invoker);
        let namespace = Arc::clone(instance.namespace());
        let args: Vec<Value> = args.to_vec();

        let join = {
            let pool = self.pool.lock();
            let Some(runtime) = pool.as_ref() else {
                breaker.on_discard();
                return Err(LingError::ServiceUnavailable {
                    unit: self.unit_id.as_str().to_owned(),
                    reason: "unit worker pool is shut down".to_owned(),
                });
            };
            runtime.spawn(async move {
                let outcome = {
                    // 快照重放先于目标调用；上下文恢复先于结果发布。
                    let _replay = snapshot.replay();
                    let _namespace = NamespaceContext::enter(namespace);
                    invoker.invoke(&bean, &method, &args)
                };
                let _ = tx.send(outcome);
            })
        };

        let outcome = match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => {
                join.abort();
                debug!(unit = %self.unit_id, fqsid = %record.fqsid, "invocation timed out, task cancelled");
                Err(LingError::Timeout {
                    fqsid: record.fqsid.as_str().to_owned(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };
        drop(permit);
        outcome
    }

    /// 当前舱壁占用数，诊断用。
    pub fn bulkhead_in_use(&self) -> usize {
        self.bulkhead.in_use()
    }

    /// 最近调用历史（`runtime.max-history-snapshots` 条以内）。
    pub fn recent_history(&self) -> Vec<InvocationSnapshot> {
        self.history.recent()
    }

    /// 停机线程池并在后台回收工作线程。幂等。
    pub fn shutdown(&self) {
        if let Some(runtime) = self.pool.lock().take() {
            runtime.shutdown_background();
            debug!(unit = %self.unit_id, "unit worker pool shut down");
        }
    }
}

impl Drop for UnitExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::{
        FlagTransactionVerifier, ready_instance, service_record, sleeping_record,
    };
    use ling_core::config::{RateLimitOptions, RuntimeOptions};
    use ling_core::spi::HandleInvoker;
    use std::thread;

    fn executor(opts: RuntimeOptions) -> UnitExecutor {
        UnitExecutor::new(
            UnitId::parse("user").unwrap(),
            2,
            opts,
            Arc::new(FlagTransactionVerifier::new(false)),
            Arc::new(HandleInvoker),
            Arc::new(Vec::new()),
        )
        .expect("build executor")
    }

    fn small_opts() -> RuntimeOptions {
        RuntimeOptions {
            bulkhead_max_concurrent: 4,
            bulkhead_acquire_timeout: 10,
            ..RuntimeOptions::default()
        }
    }

    #[test]
    fn successful_invocation_returns_value() {
        let exec = executor(small_opts());
        let instance = ready_instance("user", "v1");
        let record = service_record("user", "get_user", |_args| Ok(Value::from("ok")));
        let result = exec
            .execute(&instance, &record, &[], Duration::from_millis(500))
            .unwrap();
        assert_eq!(result, Value::from("ok"));
    }

    #[test]
    fn bulkhead_saturation_fails_fast() {
        let exec = Arc::new(executor(small_opts()));
        let instance = ready_instance("user", "v1");
        let record = sleeping_record("user", "slow_op", Duration::from_millis(300));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let exec = Arc::clone(&exec);
            let instance = Arc::clone(&instance);
            let record = Arc::clone(&record);
            workers.push(thread::spawn(move || {
                let _ = exec.execute(&instance, &record, &[], Duration::from_secs(2));
            }));
        }
        // 等待四条长调用占满舱壁。
        let deadline = Instant::now() + Duration::from_secs(1);
        while exec.bulkhead_in_use() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        let err = exec
            .execute(&instance, &record, &[], Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, LingError::BulkheadFull { .. }));
        assert!(started.elapsed() < Duration::from_millis(200));

        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn timeout_cancels_and_reports() {
        let exec = executor(small_opts());
        let instance = ready_instance("user", "v1");
        let record = sleeping_record("user", "slow_op", Duration::from_millis(500));
        let err = exec
            .execute(&instance, &record, &[], Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, LingError::Timeout { .. }));
    }

    #[test]
    fn rate_limit_rejects_beyond_burst() {
        let opts = RuntimeOptions {
            rate_limit: RateLimitOptions { rate: 1, burst: 2 },
            ..small_opts()
        };
        let exec = executor(opts);
        let instance = ready_instance("user", "v1");
        let record = service_record("user", "get_user", |_args| Ok(Value::Null));
        assert!(exec.execute(&instance, &record, &[], Duration::from_secs(1)).is_ok());
        assert!(exec.execute(&instance, &record, &[], Duration::from_secs(1)).is_ok());
        let err = exec
            .execute(&instance, &record, &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, LingError::RateLimited { .. }));
    }

    #[test]
    fn transactional_call_runs_on_caller_thread() {
        let opts = small_opts();
        let exec = UnitExecutor::new(
            UnitId::parse("user").unwrap(),
            1,
            opts,
            Arc::new(FlagTransactionVerifier::new(true)),
            Arc::new(HandleInvoker),
            Arc::new(Vec::new()),
        )
        .unwrap();
        let caller_thread = thread::current().id();
        let instance = ready_instance("user", "v1");
        let record = service_record("user", "in_tx", move |_args| {
            assert_eq!(thread::current().id(), caller_thread, "事务调用不跨线程");
            Ok(Value::from(1))
        });
        let result = exec
            .execute(&instance, &record, &[], Duration::from_millis(100))
            .unwrap();
        assert_eq!(result, Value::from(1));
        assert_eq!(exec.bulkhead_in_use(), 0, "事务路径绕过舱壁");
    }

    #[test]
    fn history_bounded_by_config() {
        let opts = RuntimeOptions {
            max_history_snapshots: 2,
            ..small_opts()
        };
        let exec = executor(opts);
        let instance = ready_instance("user", "v1");
        let record = service_record("user", "get_user", |_args| Ok(Value::Null));
        for _ in 0..5 {
            exec.execute(&instance, &record, &[], Duration::from_secs(1))
                .unwrap();
        }
        assert_eq!(exec.recent_history().len(), 2);
    }
}
