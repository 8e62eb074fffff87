//! Rollout API server library.
//!
//! Exposes configuration, the job engine, error handling and routes so the
//! binary entrypoint and integration tests share the same building blocks.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod query;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
