//! Shared utilities, configuration, and error handling for the CRMI engine
//!
//! This crate provides common functionality used across the engine:
//! - Configuration management following 12-factor principles
//! - Error types and handling
//! - Canonical reference parsing
//! - Artifact version rules

pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod state;
pub mod version;

pub use canonical::{Canonical, CanonicalComponents};
pub use crypto::{json_digest, sha256_hex};
pub use error::{Error, PublishFailure, Result, RollbackFailure};
pub use state::StateError;
