//! Shared avatar video job primitives.
//!
//! This crate owns the job request/response contract, object key layout, and
//! storage configuration. It intentionally excludes the S3 SDK, the serverless
//! runtime, and process management; those live in `avatar_job_worker`.

pub mod contract;
pub mod storage_config;
pub mod storage_keys;
