//! Infrastructure adapters: shared queue backends and report file cleanup.

pub mod cleanup;
pub mod queue;

pub use cleanup::OldFileCleanup;
pub use queue::InMemoryJobQueue;
