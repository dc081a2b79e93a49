//! Tests for utility functions

use report_scheduler::util::clock::{elapsed_ms, now_ms};
use report_scheduler::util::{init_tracing, init_tracing_with_default, DEFAULT_LOG_DIRECTIVE};

#[test]
fn test_now_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_elapsed_since_past() {
    let start = now_ms() - 250;
    assert!(elapsed_ms(start) >= 250);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing_with_default("report_scheduler=debug");
    assert!(DEFAULT_LOG_DIRECTIVE.starts_with("report_scheduler"));
}
