pub mod catalog;
pub mod deployments;
pub mod jobs;
