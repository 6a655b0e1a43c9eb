//! Serverless worker for avatar video generation jobs.
//!
//! Jobs arrive through a [`adapters::job_queue::JobQueue`], are run by
//! [`handlers::serve::serve_jobs`], and drive an external inference process.
//! Model weights and generated videos live on a RunPod network volume reached
//! over its S3 API. Request types and object key rules come from
//! `avatar_job_core`, re-exported as [`runtime`].

pub mod adapters;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod runtime;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
