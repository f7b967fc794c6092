//! # Care API Client
//!
//! Resilient HTTP client for the care backend: keeps the bearer credential
//! alive, fails over between base URLs and voids the session exactly once
//! when it cannot be recovered.
//!
//! Modules:
//! - `config`: YAML configuration, env expansion and validation
//! - `store`: persisted credential and legacy-key migration
//! - `endpoint`: base URL set and health probing
//! - `auth`: token lifecycle with single-flight refresh, deauth hook
//! - `client`: request dispatch with one recovery cycle

pub mod auth;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod helpers;
pub mod observability;
pub mod parser;
pub mod resilience;
pub mod store;
pub mod utils;

#[cfg(test)]
pub mod tests;

pub use crate::auth::deauth::{DeauthEvent, DeauthHook};
pub use crate::client::{ApiClient, ApiClientBuilder};
pub use crate::config::settings::ClientConfig;
pub use crate::error::ClientError;
pub use crate::parser::envelope::ApiResponse;
