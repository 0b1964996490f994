//! # GitHub Runtime Integration Library
//!
//! Resilient GitHub API access for background services, plus the process
//! supervisor that keeps those services running:
//! - Token authentication with installation-token fallback for tokenless callers
//! - Automatic retry of 401 and 5xx responses with exponential backoff
//! - Soft-miss file content reads and collaborator permission checks
//! - A primary/worker supervisor that replaces crashed worker processes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_github_runtime::{ApiClient, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RuntimeConfig::from_env()?;
//!     let client = ApiClient::new(&config)?;
//!
//!     // Falls back to an installation token if the repository is private.
//!     let settings = client
//!         .contents()
//!         .get_file_contents_without_token("my-org/settings", "settings.json")
//!         .await?;
//!     println!("{}", settings);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;

// Authentication
pub mod auth;

// HTTP client and retry policy
pub mod client;
pub mod resilience;

// API Services
pub mod services;

// Worker supervision
pub mod supervisor;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AppTokenIssuer, CredentialResolver, TokenIssuer};
pub use client::{ApiClient, ApiClientBuilder, ApiRequest, ApiResponse};
pub use config::{AppCredentials, RetryConfig, RuntimeConfig, RuntimeConfigBuilder};
pub use errors::{ErrorKind, RuntimeError, RuntimeResult};
pub use services::{CollaboratorsService, ContentsService, FileLocation};
pub use supervisor::{run_cluster, ProcessRole, Supervisor, SupervisorEvent, SupervisorHandle};
