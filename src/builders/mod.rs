//! Builders to assemble a scheduler from its collaborators.

pub mod scheduler_builder;

pub use scheduler_builder::SchedulerBuilder;
