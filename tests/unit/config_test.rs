//! Tests for configuration validation

use std::time::Duration;

use report_scheduler::config::{SchedulerConfig, WorkerPoolConfig};

#[test]
fn test_scheduler_config_defaults_are_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_waiting_jobs, 5000);
    assert_eq!(cfg.reconcile_interval(), Duration::from_millis(500));
    assert_eq!(cfg.old_file_cleanup_interval(), Duration::from_secs(86_400));
}

#[test]
fn test_scheduler_config_invalid_running_jobs() {
    let cfg = SchedulerConfig::new().with_max_running_jobs(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_waiting_jobs() {
    let cfg = SchedulerConfig::new().with_max_waiting_jobs(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_timeouts() {
    assert!(SchedulerConfig::new().with_timeout_secs(0).validate().is_err());
    assert!(SchedulerConfig::new()
        .with_abandoned_timeout_secs(0)
        .validate()
        .is_err());
    assert!(SchedulerConfig::new()
        .with_reconcile_interval_ms(0)
        .validate()
        .is_err());
}

#[test]
fn test_cleanup_interval_only_checked_when_enabled() {
    let cfg = SchedulerConfig::new().with_old_file_cleanup_interval_secs(0);
    assert!(cfg.validate().is_err());
    assert!(cfg.with_old_file_cleanup(false).validate().is_ok());
}

#[test]
fn test_worker_pool_config_from_scheduler() {
    let pool = SchedulerConfig::new().with_max_running_jobs(3).worker_pool_config();
    assert_eq!(pool.worker_count, 3);
    assert_eq!(pool.thread_name_prefix, "report-worker-");
    assert!(pool.validate().is_ok());
}

#[test]
fn test_worker_pool_config_invalid_stack() {
    let pool = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(pool.validate().is_err());
}

#[test]
fn test_json_config_partial() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{ "max_running_jobs": 4, "clustered": true, "timeout_secs": 300 }"#,
    )
    .unwrap();
    assert_eq!(cfg.max_running_jobs, 4);
    assert!(cfg.clustered);
    assert_eq!(cfg.timeout(), Duration::from_secs(300));
    assert_eq!(cfg.abandoned_timeout(), Duration::from_secs(120));
}

#[test]
fn test_json_config_rejects_invalid_values() {
    assert!(SchedulerConfig::from_json_str(r#"{ "max_running_jobs": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_json_roundtrip_keeps_values() {
    let cfg = SchedulerConfig::new()
        .with_max_running_jobs(2)
        .with_clustered(true);
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), cfg);
}
