//! Configuration defaults, deserialization and validation

use conveyor::{
    CoreConfig, CounterStrategy, ErrorKind, ExecutorConfig, PanicPolicy, PoolConfig, StageConfig,
};
use std::time::Duration;

#[test]
fn test_empty_document_uses_defaults() {
    let config: CoreConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, CoreConfig::default());
    assert_eq!(config.pool.name, "pool");
    assert!(config.pool.workers >= 1);
    assert_eq!(config.pool.input_capacity, 64);
    assert_eq!(config.pool.panic_policy, PanicPolicy::Continue);
    assert_eq!(config.stage, StageConfig { workers: 1, capacity: 16 });
    assert_eq!(config.executor.max_concurrent_tasks, 100);
    assert_eq!(config.executor.task_timeout, None);
    assert_eq!(config.counter, CounterStrategy::Atomic);
    config.validate().unwrap();
}

#[test]
fn test_partial_document_overrides_fields() {
    let config: CoreConfig = serde_json::from_str(
        r#"{
            "pool": { "name": "ingest", "workers": 3, "panic_policy": "restart" },
            "executor": { "max_concurrent_tasks": 8, "task_timeout_ms": 250 },
            "counter": "mutex"
        }"#,
    )
    .unwrap();

    assert_eq!(config.pool.name, "ingest");
    assert_eq!(config.pool.workers, 3);
    assert_eq!(config.pool.output_capacity, 64);
    assert_eq!(config.pool.panic_policy, PanicPolicy::Restart);
    assert_eq!(config.executor.task_timeout, Some(Duration::from_millis(250)));
    assert!(!config.executor.enable_metrics);
    assert_eq!(config.counter, CounterStrategy::Mutex);
}

#[test]
fn test_timeout_serializes_as_millis() {
    let config = ExecutorConfig {
        max_concurrent_tasks: 2,
        task_timeout: Some(Duration::from_secs(2)),
        enable_metrics: true,
    };
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["task_timeout_ms"], 2000);

    let back: ExecutorConfig = serde_json::from_value(json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_validation_rejects_zero_sizes() {
    let mut config = CoreConfig::default();
    config.pool.workers = 0;
    assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);

    let config = CoreConfig {
        stage: StageConfig { workers: 1, capacity: 0 },
        ..CoreConfig::default()
    };
    assert!(config.validate().is_err());

    let config = CoreConfig {
        executor: ExecutorConfig {
            max_concurrent_tasks: 0,
            ..ExecutorConfig::default()
        },
        ..CoreConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_pool_builders() {
    let config = PoolConfig::with_workers(5)
        .named("render")
        .capacity(2)
        .panic_policy(PanicPolicy::Degrade);
    assert_eq!(config.workers, 5);
    assert_eq!(config.name, "render");
    assert_eq!(config.input_capacity, 2);
    assert_eq!(config.output_capacity, 2);
    assert_eq!(config.panic_policy, PanicPolicy::Degrade);

    let error = PoolConfig::with_workers(0).named("empty").validate().unwrap_err();
    assert!(error.to_string().contains("empty"));
}
