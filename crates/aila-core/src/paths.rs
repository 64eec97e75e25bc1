//! Where aila keeps its files.
//!
//! Configuration lives under the XDG config directory; the seen store and the
//! latest digest under the data directory; daemon PID and log files under the
//! state directory.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::{APP_NAME, AppConfig};

/// File name of the configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// File name of the seen-item store inside the data directory.
pub const SEEN_FILE_NAME: &str = "seen.json";

/// File name of the latest digest inside the data directory.
pub const DIGEST_FILE_NAME: &str = "digest.json";

/// Application paths for config, data, and state directories.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file.
    pub config_file: PathBuf,
    /// Directory for persistent application data.
    pub data_dir: PathBuf,
    /// Directory for application state files.
    pub state_dir: PathBuf,
    /// Store of post and message ids that were already digested.
    pub seen_file: PathBuf,
}

impl AppPaths {
    /// Resolve the default locations. `config_override` may name a file or
    /// a directory holding `config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if paths cannot be resolved or expanded.
    pub fn discover(config_override: Option<&Path>) -> Result<Self> {
        let config_file = config_override
            .map(expand_path)
            .transpose()?
            .map_or_else(
                || default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)),
                |path| {
                    Ok(if path.is_dir() {
                        path.join(CONFIG_FILE_NAME)
                    } else {
                        path
                    })
                },
            )?;
        if config_file.file_name().is_none() {
            return Err(anyhow!("config path {} does not name a file", config_file.display()));
        }

        let data_dir = default_data_dir()?;
        Ok(Self {
            config_file,
            seen_file: data_dir.join(SEEN_FILE_NAME),
            data_dir,
            state_dir: default_state_dir()?,
        })
    }

    /// Apply path overrides from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if override paths cannot be expanded.
    pub fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
            self.seen_file = self.data_dir.join(SEEN_FILE_NAME);
        }
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        if let Some(ref seen_override) = cfg.paths.seen_file {
            self.seen_file = expand_str_path(seen_override)?;
        }
        Ok(self)
    }

    /// Location of the most recent digest.
    #[must_use]
    pub fn digest_file(&self) -> PathBuf {
        self.data_dir.join(DIGEST_FILE_NAME)
    }

    /// Create the data and state directories, and the parent of a relocated
    /// seen store.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        let seen_parent = self.seen_file.parent();
        for dir in [Some(self.data_dir.as_path()), Some(self.state_dir.as_path()), seen_parent]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    /// Report what [`AppPaths::ensure_directories`] would create.
    pub fn log_dry_run(&self) {
        log::info!(
            "dry-run: would create {} and {}; seen ids in {}, digest in {}",
            self.data_dir.display(),
            self.state_dir.display(),
            self.seen_file.display(),
            self.digest_file().display()
        );
    }
}

impl std::fmt::Display for AppPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "config: {}", self.config_file.display())?;
        writeln!(f, "data:   {}", self.data_dir.display())?;
        writeln!(f, "state:  {}", self.state_dir.display())?;
        writeln!(f, "seen:   {}", self.seen_file.display())?;
        write!(f, "digest: {}", self.digest_file().display())
    }
}

/// Expand `~` and environment variables in a path.
///
/// # Errors
///
/// Returns an error if shell expansion fails.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    path.to_str()
        .map_or_else(|| Ok(path.to_path_buf()), expand_str_path)
}

/// Expand `~` and environment variables in a configured path string.
///
/// # Errors
///
/// Returns an error if shell expansion fails.
pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).with_context(|| format!("expanding path {text}"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// The three XDG base directories aila keeps files in.
#[derive(Debug, Clone, Copy)]
enum BaseDir {
    Config,
    Data,
    State,
}

impl BaseDir {
    const fn env_var(self) -> &'static str {
        match self {
            Self::Config => "XDG_CONFIG_HOME",
            Self::Data => "XDG_DATA_HOME",
            Self::State => "XDG_STATE_HOME",
        }
    }

    const fn home_fallback(self) -> &'static [&'static str] {
        match self {
            Self::Config => &[".config"],
            Self::Data => &[".local", "share"],
            Self::State => &[".local", "state"],
        }
    }

    fn platform_dir(self) -> Option<PathBuf> {
        match self {
            Self::Config => dirs::config_dir(),
            Self::Data => dirs::data_dir(),
            Self::State => dirs::state_dir(),
        }
    }

    /// Resolve `<base>/aila`, preferring a non-empty XDG variable.
    fn resolve(self, xdg_value: Option<OsString>) -> Result<PathBuf> {
        let base = xdg_value
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.platform_dir())
            .or_else(|| {
                dirs::home_dir().map(|home| {
                    self.home_fallback()
                        .iter()
                        .fold(home, |path, part| path.join(part))
                })
            })
            .ok_or_else(|| anyhow!("unable to determine {} directory", self.label()))?;
        Ok(base.join(APP_NAME))
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Config => "configuration",
            Self::Data => "data",
            Self::State => "state",
        }
    }

    fn discover(self) -> Result<PathBuf> {
        self.resolve(env::var_os(self.env_var()))
    }
}

/// Default configuration directory (`$XDG_CONFIG_HOME/aila` or the platform equivalent).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_dir() -> Result<PathBuf> {
    BaseDir::Config.discover()
}

/// Default data directory, home of the seen store and the latest digest.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    BaseDir::Data.discover()
}

/// Default state directory, home of the daemon PID and log files.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_state_dir() -> Result<PathBuf> {
    BaseDir::State.discover()
}

/// Write the default configuration file to the specified path.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the directory cannot be created.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }

    let config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml_str);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    buffer
}
