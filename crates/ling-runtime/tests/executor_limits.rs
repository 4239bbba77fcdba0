//! 执行器边界种子场景：舱壁饱和、熔断状态机与限流快速失败。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ling_core::config::LingConfig;
use ling_core::definition::UnitDefinition;
use ling_core::ids::UnitId;
use ling_core::invocation::Value;
use ling_core::spi::MethodMetadata;
use ling_core::LingError;
use ling_runtime::LingRuntime;
use ling_runtime::executor::BreakerState;
use ling_runtime::test_stubs::{StubContainerFactory, StubService, fast_config};

fn open_metadata() -> MethodMetadata {
    MethodMetadata {
        permission: Some("ling.contract:open".into()),
        ..MethodMetadata::default()
    }
}

fn build(factory: &Arc<StubContainerFactory>, config: LingConfig) -> LingRuntime {
    LingRuntime::builder(config)
        .with_container_factory(factory.clone())
        .build()
        .expect("build runtime")
}

fn caller() -> Option<UnitId> {
    Some(UnitId::parse("web").unwrap())
}

#[test]
fn bulkhead_saturation_rejects_fifth_concurrent_call() {
    let factory = StubContainerFactory::new();
    factory.register_unit(
        "user",
        vec![
            StubService::new("slow_op", |_args| {
                std::thread::sleep(Duration::from_millis(400));
                Ok(Value::Null)
            })
            .with_metadata(open_metadata()),
        ],
    );
    let mut config = fast_config();
    config.runtime.bulkhead_max_concurrent = 4;
    config.runtime.bulkhead_acquire_timeout = 10;
    config.default_threads_per_ling = 8;
    config.max_threads_per_ling = 8;
    config.global_max_ling_threads = 8;
    let runtime = build(&factory, config);
    let manager = runtime.manager().clone();
    let dir = tempfile::tempdir().unwrap();
    manager
        .install_dev(UnitDefinition::new("user", "1.0.0", "demo.User"), dir.path())
        .unwrap();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        workers.push(std::thread::spawn(move || {
            manager.invoke_service(caller(), "user:slow_op", vec![])
        }));
    }
    // 等待四条长调用全部占住舱壁许可。
    let executor = manager.runtime("user").unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while executor.executor().bulkhead_in_use() < 4 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(executor.executor().bulkhead_in_use(), 4);

    let started = Instant::now();
    let err = manager
        .invoke_service(caller(), "user:slow_op", vec![])
        .unwrap_err();
    assert!(matches!(err, LingError::BulkheadFull { .. }), "第五条并发被拒");
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "拒绝应在等待窗口量级内返回"
    );

    for worker in workers {
        assert!(worker.join().unwrap().is_ok(), "占位调用正常完成");
    }
}

#[test]
fn breaker_opens_after_min_calls_then_recovers_via_probe() {
    let failing = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failing);
    let factory = StubContainerFactory::new();
    factory.register_unit(
        "user",
        vec![
            StubService::new("flaky_op", move |_args| {
                if flag.load(Ordering::SeqCst) {
                    Err(LingError::InvocationFailure {
                        message: "injected failure".into(),
                    })
                } else {
                    Ok(Value::from("pong"))
                }
            })
            .with_metadata(open_metadata()),
        ],
    );
    let mut config = fast_config();
    config.runtime.breaker.min_calls = 10;
    config.runtime.breaker.failure_threshold = 50;
    config.runtime.breaker.wait = 200;
    config.runtime.breaker.half_open_probes = 1;
    let runtime = build(&factory, config);
    let manager = runtime.manager();
    let dir = tempfile::tempdir().unwrap();
    manager
        .install_dev(UnitDefinition::new("user", "1.0.0", "demo.User"), dir.path())
        .unwrap();
    let breaker = manager
        .runtime("user")
        .unwrap()
        .executor()
        .breaker("user:flaky_op");

    // 前 9 次（6 失败 3 成功）不足最小样本，不跳闸。
    for i in 0..9 {
        failing.store(i < 6, Ordering::SeqCst);
        let _ = manager.invoke_service(caller(), "user:flaky_op", vec![]);
        assert_eq!(breaker.state(), BreakerState::Closed, "min-calls 之前不跳闸");
    }
    // 第 10 个样本使失败率达到 60% ≥ 50%。
    failing.store(false, Ordering::SeqCst);
    let _ = manager.invoke_service(caller(), "user:flaky_op", vec![]);
    assert_eq!(breaker.state(), BreakerState::Open);

    let err = manager
        .invoke_service(caller(), "user:flaky_op", vec![])
        .unwrap_err();
    assert!(matches!(err, LingError::CallNotPermitted { .. }), "OPEN 态快速拒绝");

    // 等待期满：探针放行并闭合。
    std::thread::sleep(Duration::from_millis(220));
    let result = manager
        .invoke_service(caller(), "user:flaky_op", vec![])
        .unwrap();
    assert_eq!(result, Some(Value::from("pong")));
    assert_eq!(breaker.state(), BreakerState::Closed, "探针成功后闭合");
}

#[test]
fn unit_rate_limit_property_fast_fails() {
    let factory = StubContainerFactory::new();
    factory.register_unit(
        "user",
        vec![StubService::new("ping", |_args| Ok(Value::from("pong"))).with_metadata(open_metadata())],
    );
    let runtime = build(&factory, fast_config());
    let manager = runtime.manager();
    let dir = tempfile::tempdir().unwrap();
    let definition = UnitDefinition::new("user", "1.0.0", "demo.User")
        .with_property("rate-limit", Value::from(1))
        .with_property("rate-limit-burst", Value::from(2));
    manager.install_dev(definition, dir.path()).unwrap();

    assert!(manager.invoke_service(caller(), "user:ping", vec![]).is_ok());
    assert!(manager.invoke_service(caller(), "user:ping", vec![]).is_ok());
    let err = manager
        .invoke_service(caller(), "user:ping", vec![])
        .unwrap_err();
    assert!(matches!(err, LingError::RateLimited { .. }), "突发额度耗尽即拒");
}

#[test]
fn forced_open_breaker_blocks_until_reset() {
    let factory = StubContainerFactory::new();
    factory.register_unit(
        "user",
        vec![StubService::new("ping", |_args| Ok(Value::from("pong"))).with_metadata(open_metadata())],
    );
    let runtime = build(&factory, fast_config());
    let manager = runtime.manager();
    let dir = tempfile::tempdir().unwrap();
    manager
        .install_dev(UnitDefinition::new("user", "1.0.0", "demo.User"), dir.path())
        .unwrap();

    let breaker = manager.runtime("user").unwrap().executor().breaker("user:ping");
    breaker.force_open();
    assert!(matches!(
        manager.invoke_service(caller(), "user:ping", vec![]).unwrap_err(),
        LingError::CallNotPermitted { .. }
    ));
    breaker.reset();
    assert!(manager.invoke_service(caller(), "user:ping", vec![]).is_ok());
}
