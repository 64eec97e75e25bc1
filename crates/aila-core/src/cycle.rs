//! One refresh cycle: login, fetch, digest, persist.

use std::fs;
use std::path::Path;

use chrono::Utc;

use crate::config::AppConfig;
use crate::digest::{Digest, Digester};
use crate::error::{CoreError, Result};
use crate::llm::{OllamaClient, TextOracle};
use crate::paths::AppPaths;
use crate::portal::{AuthenticatedSession, Authenticator, DataFetcher, PortalPayloads, PortalSession};
use crate::store::SeenStore;

/// Log in with the configured credentials.
///
/// # Errors
///
/// Returns an error if credentials are missing or the login flow fails.
pub async fn login(config: &AppConfig) -> Result<AuthenticatedSession> {
    let credentials = config.credentials.resolve()?;
    log::info!("logging in as {}", credentials.username());
    let session = PortalSession::from_runtime(&config.runtime)?;
    Authenticator::new(session, credentials, &config.portal)?
        .login()
        .await
}

/// Log in and fetch the raw posts and threads payloads.
///
/// # Errors
///
/// Returns an error if login or any API call fails.
pub async fn fetch_payloads(config: &AppConfig) -> Result<PortalPayloads> {
    let session = login(config).await?;
    DataFetcher::new(session, &config.portal).fetch().await
}

/// Run a full cycle against the configured language model.
///
/// # Errors
///
/// Returns an error if login, fetching or persisting fails. Per-item model
/// failures only shrink the digest.
pub async fn run_cycle(config: &AppConfig, paths: &AppPaths) -> Result<Digest> {
    let oracle = OllamaClient::new(&config.model, &config.runtime)?;
    log::debug!("using model {}", oracle.model());
    run_cycle_with(config, paths, &oracle).await
}

/// Run a full cycle with the given oracle.
///
/// The seen store is saved and the digest written to the data directory
/// before returning.
///
/// # Errors
///
/// Returns an error if login, fetching or persisting fails.
pub async fn run_cycle_with<O: TextOracle + Sync>(
    config: &AppConfig,
    paths: &AppPaths,
    oracle: &O,
) -> Result<Digest> {
    let payloads = fetch_payloads(config).await?;

    let mut store = SeenStore::load(&paths.seen_file);
    let digester = Digester::new(oracle, config.digest, &config.model.system_prompt);
    let digest = digester.digest(&payloads, &mut store, Utc::now()).await;

    if store.is_dirty() {
        store.save()?;
    }
    save_digest(&paths.digest_file(), &digest)?;
    Ok(digest)
}

/// Read the digest written by the last cycle, if any.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_last_digest(paths: &AppPaths) -> Result<Option<Digest>> {
    let path = paths.digest_file();
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| CoreError::Serialization(format!("{}: {e}", path.display())))
}

fn save_digest(path: &Path, digest: &Digest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(digest)
        .map_err(|e| CoreError::Serialization(format!("digest: {e}")))?;
    fs::write(path, json)?;
    log::debug!("wrote digest to {}", path.display());
    Ok(())
}
