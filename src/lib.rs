//! Bucketeer - artifact storage for CI pipelines
//!
//! Bucketeer persists build outputs into object storage:
//! - Bucket providers for Amazon S3 and any `object_store` backend
//! - Provider selection from cluster configuration, with a legacy fallback
//! - Collection of files by glob pattern, or of in-memory payloads
//! - Stack teardown that retains resources which refuse to delete

pub mod collector;
pub mod config;
pub mod error;
pub mod factory;
pub mod stack;
pub mod storage;

pub use error::{Error, Result};
