//! Job orchestration and cooperative cancellation for image-analysis tasks.
//!
//! A submission form is validated into a [`job::JobDescriptor`], persisted
//! as the `job.json` handoff artifact and executed by a background worker
//! that reports back through events. The [`orchestrator::Orchestrator`]
//! ties the pieces together on a single tokio task.

pub mod bus;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod task;
pub mod ui;
pub mod worker;

pub use error::{PhotolinkError, Result, ValidationError};
