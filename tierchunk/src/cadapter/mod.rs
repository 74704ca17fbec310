//! Object storage adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the ranged-fetch contract every backend implements
//! - `localfs`: directory-backed backend, used for local runs and tests
//! - `s3`: S3-compatible backend built on aws-sdk-s3
//!
//! Backends only move bytes. They do not retry; they report transient
//! failures as `StorageError::Unavailable` so callers can pick a policy.
pub mod client;
pub mod localfs;
pub mod s3;

pub use client::{StorageBackend, StorageError};
