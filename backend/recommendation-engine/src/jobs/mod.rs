//! Background jobs
//!
//! - Retrain scheduler: daily full retrain plus activity-driven retrain

pub mod retrain_scheduler;

pub use retrain_scheduler::{RetrainScheduler, SchedulerHandle};
