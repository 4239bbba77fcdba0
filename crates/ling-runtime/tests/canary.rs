//! 金丝雀路由种子场景：配置分流比例与标签定向。

use std::sync::Arc;

use ling_core::config::LingConfig;
use ling_core::definition::UnitDefinition;
use ling_core::ids::UnitId;
use ling_core::invocation::Value;
use ling_core::spi::MethodMetadata;
use ling_core::types::LabelSet;
use ling_runtime::LingRuntime;
use ling_runtime::test_stubs::{StubContainerFactory, StubService, fast_config};

fn versioned_service(short_id: &str, reply: &'static str) -> StubService {
    StubService::new(short_id, move |_args| Ok(Value::from(reply))).with_metadata(MethodMetadata {
        permission: Some("ling.contract:open".into()),
        ..MethodMetadata::default()
    })
}

fn build(factory: &Arc<StubContainerFactory>, config: LingConfig) -> LingRuntime {
    LingRuntime::builder(config)
        .with_container_factory(factory.clone())
        .build()
        .expect("build runtime")
}

fn deploy_default_and_canary(runtime: &LingRuntime, factory: &StubContainerFactory) {
    let manager = runtime.manager();
    let dir = tempfile::tempdir().unwrap();
    factory.register_unit("user", vec![versioned_service("get_user", "v1")]);
    manager
        .install_dev(UnitDefinition::new("user", "1.0.0", "demo.User"), dir.path())
        .unwrap();

    factory.register_unit("user", vec![versioned_service("get_user", "v2")]);
    let canary_def =
        UnitDefinition::new("user", "2.0.0", "demo.User").with_property("canary", Value::Bool(true));
    manager
        .deploy_canary(
            canary_def,
            ling_core::definition::UnitSource::Directory(dir.path().to_path_buf()),
            LabelSet::from_pairs([("zone", "canary")]),
        )
        .unwrap();
}

fn call(runtime: &LingRuntime) -> String {
    match runtime
        .manager()
        .invoke_service(
            Some(UnitId::parse("web").unwrap()),
            "user:get_user",
            vec![],
        )
        .unwrap()
    {
        Some(Value::String(version)) => version,
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn canary_percent_routes_configured_fraction() {
    let factory = StubContainerFactory::new();
    let runtime = build(&factory, fast_config());
    deploy_default_and_canary(&runtime, &factory);
    let manager = runtime.manager();

    manager.set_canary("user", 25, "2.0.0").unwrap();
    let total = 10_000;
    let canary_hits = (0..total).filter(|_| call(&runtime) == "v2").count() as f64;
    let ratio = canary_hits / total as f64;
    assert!(
        (0.22..=0.28).contains(&ratio),
        "canary ratio {ratio} outside [0.22, 0.28]"
    );
}

#[test]
fn canary_percent_boundaries() {
    let factory = StubContainerFactory::new();
    let runtime = build(&factory, fast_config());
    deploy_default_and_canary(&runtime, &factory);
    let manager = runtime.manager();

    manager.set_canary("user", 0, "2.0.0").unwrap();
    assert!((0..200).all(|_| call(&runtime) == "v1"), "0% 全量走默认");

    manager.set_canary("user", 100, "2.0.0").unwrap();
    assert!((0..200).all(|_| call(&runtime) == "v2"), "100% 全量走金丝雀");
}

#[test]
fn set_clear_restores_prior_state() {
    let factory = StubContainerFactory::new();
    let runtime = build(&factory, fast_config());
    deploy_default_and_canary(&runtime, &factory);
    let manager = runtime.manager();

    assert!(manager.get_canary("user").is_none());
    manager.set_canary("user", 25, "2.0.0").unwrap();
    assert_eq!(manager.get_canary("user").unwrap().percent, 25);
    manager.clear_canary("user");
    assert!(manager.get_canary("user").is_none(), "clear 还原到设置前");
    assert!(manager.set_canary("user", 101, "2.0.0").is_err());
    assert!((0..100).all(|_| call(&runtime) == "v1"), "清除后全部回默认");
}

#[test]
fn request_labels_override_canary_dice() {
    let factory = StubContainerFactory::new();
    let runtime = build(&factory, fast_config());
    deploy_default_and_canary(&runtime, &factory);
    runtime.manager().set_canary("user", 0, "2.0.0").unwrap();

    // 环境标签指向金丝雀实例：标签匹配优先于掷签。
    ling_runtime::trace::TraceContext::set_labels(LabelSet::from_pairs([("zone", "canary")]));
    let got = call(&runtime);
    ling_runtime::trace::TraceContext::clear();
    assert_eq!(got, "v2", "标签超集匹配优先");
}
