//! Repository layer: one zero-sized struct per table with static async methods.

pub mod job_repo;

pub use job_repo::JobRepo;
