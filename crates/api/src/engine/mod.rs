//! Job execution engine.
//!
//! [`JobManager`] owns every job record and spawns one background task per
//! job. Tasks wait for an execution slot, run the automation tool and
//! record the outcome.

pub mod cache;
pub mod manager;
mod runner;

pub use manager::{DeploymentPreview, JobManager, JobPage, JobStatistics};
