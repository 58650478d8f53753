//! Common types for Shardline: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod client_cache;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use client_cache::ClientCache;
pub use error::{Error, ReconcileError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Requeue interval after a successful reconcile (5 minutes)
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval after a temporary failure
pub const REQUEUE_ERROR_SECS: u64 = 60;

/// Label key carrying the owning deployment's name
pub const LABEL_DEPLOYMENT: &str = "shardline.dev/deployment";

/// Standard app label key
pub const LABEL_APP: &str = "app";

/// Value of the app label on every Shardline-managed resource
pub const APP_NAME: &str = "shardline";

/// Secret data key holding the PEM-encoded CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";
