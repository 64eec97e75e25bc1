//! Core library for aila - a digest of Aula school messages.
//!
//! This crate provides:
//! - Configuration loading and management
//! - XDG-compliant path resolution
//! - Schema and example config generation
//! - Portal login and JSON API client
//! - Seen-item store for deduplication across runs
//! - Language model client and the digest built on top of it
//! - Refresh schedule and background daemon
//! - Common types and error handling

pub mod config;
pub mod cycle;
pub mod daemon;
pub mod digest;
pub mod error;
pub mod llm;
pub mod paths;
pub mod portal;
pub mod report;
pub mod schedule;
pub mod schema;
pub mod store;

pub use config::{
    AppConfig, CredentialsConfig, DigestConfig, LogLevel, LoggingConfig, ModelConfig,
    PathsConfig, PortalConfig, RuntimeConfig, ScheduleConfig,
};
pub use cycle::{fetch_payloads, load_last_digest, run_cycle, run_cycle_with};
pub use digest::{Digest, DigestError, DigestItem, Digester, ItemKind};
pub use error::{CoreError, Result};
pub use llm::{ChatMessage, ChatSession, OllamaClient, TextOracle};
pub use paths::{AppPaths, default_data_dir, default_state_dir};
pub use portal::{
    ActorRole, AuthenticatedSession, Authenticator, Credentials, DataFetcher, LoginOutcome,
    PortalPayloads, PortalRole, PortalSession, ProfileContext,
};
pub use schedule::RefreshSchedule;
pub use schema::{generate_example_config, generate_schema, write_generated_files};
pub use store::SeenStore;

/// Application name used for config directories and environment prefix.
pub const APP_NAME: &str = "aila";

/// Returns the environment variable prefix for this application.
#[must_use]
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
