//! CPOS Hub engine library
//!
//! Module supply chain (validate, sign, package, install) and lifecycle
//! (activate, deactivate, delete, load) for the hub, plus the request
//! pipeline that runs active modules and the queue that reports changes to
//! the control plane. Used by the `hub` binary and the integration tests.

/// Configuration management module
pub mod config;

/// Canonical module file set
pub mod fileset;

/// Content hashing, signing keys, signing and verification
pub mod crypto;

/// Pre-packaging validation
pub mod validator;

/// Deterministic zip packaging
pub mod packager;

/// Module discovery, activation and installation
pub mod modules;

/// Extension hook pipeline
pub mod pipeline;

/// Database persistence module
pub mod db;

/// Control-plane sync queue
pub mod sync;

/// Shared hub state
pub mod context;

/// Telemetry and Observability
pub mod telemetry;

/// Hub daemon and management API
pub mod daemon;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
