//! Domain logic for fleet deployment orchestration.
//!
//! Everything in this crate is free of database access: the job state
//! machine, request validation, the component registry and its dependency
//! resolver, and the subprocess executor that drives the automation tool.

pub mod error;
pub mod execution;
pub mod job;
pub mod registry;
pub mod types;
