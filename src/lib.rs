//! # Report Scheduler
//!
//! A bounded, priority-ordered job scheduler for asynchronous report generation.
//!
//! Clients submit report jobs; the scheduler records them in a shared job queue,
//! runs them on a fixed-size worker pool, and periodically reconciles what
//! actually happened (completion, failure, cancellation, timeout) back into the
//! queue, where clients poll for status.
//!
//! ## Key Features
//!
//! - **Bounded Concurrency**: A fixed number of worker threads, each with its own
//!   single-threaded tokio runtime for the job's async work
//! - **Admission Control**: Submissions are rejected once the shared queue holds
//!   too many waiting jobs
//! - **Priority Ordering**: Queued jobs run in the order of a pluggable comparator
//!   (submission time by default)
//! - **Timeouts and Abandonment**: Jobs running too long, or whose client stopped
//!   polling, are cancelled
//! - **Clustered Mode**: Several nodes share one queue and claim work from it
//!   instead of executing their own submissions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use report_scheduler::builders::SchedulerBuilder;
//! use report_scheduler::config::SchedulerConfig;
//! use report_scheduler::core::JobEntry;
//! use report_scheduler::infra::InMemoryJobQueue;
//!
//! report_scheduler::util::init_tracing();
//!
//! let scheduler = SchedulerBuilder::new()
//!     .with_config(SchedulerConfig::from_env()?)
//!     .with_queue(Arc::new(InMemoryJobQueue::new()))
//!     .with_executor(Arc::new(PdfRenderer::default()))
//!     .build()?;
//!
//! let entry = JobEntry::new(serde_json::json!({ "template": "invoice" }))
//!     .with_access_token("session-42");
//! let id = entry.reference_id.clone();
//! scheduler.submit(entry)?;
//!
//! let status = scheduler.get_status(&id, Some("session-42"))?;
//! println!("{} (about {} ms to wait)", status.state, status.waiting_time_ms);
//! ```
//!
//! See `tests/scheduler_test.rs` for end-to-end scenarios.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: job model, worker pool, and reconciliation.
pub mod core;
/// Configuration models for the scheduler and its worker pool.
pub mod config;
/// Builders to assemble a scheduler from its collaborators.
pub mod builders;
/// Infrastructure adapters: shared queue backends and file cleanup.
pub mod infra;
/// Shared utilities.
pub mod util;
