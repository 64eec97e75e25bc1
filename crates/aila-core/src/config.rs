//! Configuration for aila.
//!
//! Values are layered: built-in defaults, then `config.toml`, then
//! `AILA__<SECTION>__<KEY>` environment variables. A missing config file is
//! created with the defaults on first load.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::paths::{expand_str_path, write_default_config};
use crate::portal::{ActorRole, Credentials, PortalRole};
use crate::{AppPaths, env_prefix};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(
    title = "aila configuration",
    description = "Portal login, language model and schedule settings for aila"
)]
pub struct AppConfig {
    /// JSON Schema reference for editor support.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub schema: Option<String>,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Runtime behavior configuration.
    pub runtime: RuntimeConfig,

    /// Custom paths for data and state directories.
    pub paths: PathsConfig,

    /// Portal login credentials.
    pub credentials: CredentialsConfig,

    /// Portal endpoints and login behavior.
    pub portal: PortalConfig,

    /// Local language model settings.
    pub model: ModelConfig,

    /// Digest filtering settings.
    pub digest: DigestConfig,

    /// Refresh schedule for the daemon and the TUI.
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    /// Load `paths.config_file`, writing a default file first when it is
    /// missing (unless `dry_run`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed, or written.
    pub fn load(paths: &AppPaths, dry_run: bool) -> Result<Self> {
        let file = &paths.config_file;
        match (file.exists(), dry_run) {
            (true, _) => {}
            (false, true) => log::info!("dry-run: would create {}", file.display()),
            (false, false) => {
                write_default_config(file)?;
                log::info!("created default configuration at {}", file.display());
            }
        }
        Self::load_from_path(file)
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn load_from_path(config_file: &Path) -> Result<Self> {
        let env_prefix = env_prefix();
        let built = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("runtime.timeout", 60_i64)?
            .set_default("runtime.retries", 2_i64)?
            .set_default("portal.login_attempts", 10_i64)?
            .set_default("portal.posts_limit", 2_i64)?
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
            .build()?;

        let mut config: Self = built.try_deserialize()?;
        for file in [&mut config.logging.file, &mut config.credentials.file]
            .into_iter()
            .flatten()
        {
            *file = expand_str_path(file)?.display().to_string();
        }
        Ok(config)
    }

    /// Copy of the configuration that is safe to print: the password is blanked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.credentials.password.is_empty() {
            copy.credentials.password = "********".to_string();
        }
        copy
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Logging configuration")]
pub struct LoggingConfig {
    /// Log level used when no `-v`, `--debug` or `--trace` flag is given.
    #[schemars(default = "default_log_level")]
    pub level: LogLevel,

    /// Append log output to this file instead of stderr. Supports ~ and
    /// environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Log level enumeration for schema validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only emit error-level messages.
    Error,
    /// Emit warnings and errors.
    Warn,
    /// Emit informational messages and above (default).
    #[default]
    Info,
    /// Emit debug diagnostics and above.
    Debug,
    /// Emit all messages including fine-grained traces.
    Trace,
}

impl LogLevel {
    /// The matching `log` filter.
    #[must_use]
    pub const fn level_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.level_filter().as_str();
        f.write_str(&name.to_lowercase())
    }
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// Runtime behavior configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Runtime behavior configuration")]
pub struct RuntimeConfig {
    /// Timeout in seconds for every HTTP request (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub timeout: Option<u64>,

    /// How many times a request is retried after a timeout or connection failure.
    pub retries: u32,
}

impl RuntimeConfig {
    /// Effective request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(60).max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(60),
            retries: 2,
        }
    }
}

/// Path override configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Custom paths for data and state directories")]
pub struct PathsConfig {
    /// Directory for persistent data. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Directory for state files. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// File holding the ids of posts and messages already shown.
    /// Defaults to `seen.json` in the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_file: Option<String>,
}

/// Portal login credentials.
///
/// Either set `username` and `password` here (the password can also come from
/// `AILA__CREDENTIALS__PASSWORD`), or point `file` at a JSON document of the
/// form `{"username": "...", "password": "..."}`.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Portal login credentials")]
pub struct CredentialsConfig {
    /// Portal username.
    pub username: String,

    /// Portal password.
    pub password: String,

    /// JSON file with `username` and `password`. Takes precedence when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("file", &self.file)
            .finish()
    }
}

impl CredentialsConfig {
    /// Resolve the credentials to submit into the login forms.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials file cannot be read or parsed, or
    /// if no username or password is configured.
    pub fn resolve(&self) -> crate::Result<Credentials> {
        let credentials = match self.file {
            Some(ref file) => {
                let raw = std::fs::read_to_string(file).map_err(|e| {
                    CoreError::Config(format!("reading credentials file {file}: {e}"))
                })?;
                serde_json::from_str::<Credentials>(&raw).map_err(|e| {
                    CoreError::Config(format!("parsing credentials file {file}: {e}"))
                })?
            }
            None => Credentials::new(&self.username, &self.password),
        };

        if credentials.username().is_empty() || credentials.password().is_empty() {
            return Err(CoreError::Config(
                "no portal credentials configured - set credentials.username and \
                 credentials.password, or credentials.file"
                    .to_string(),
            ));
        }
        Ok(credentials)
    }
}

/// Portal endpoints and login behavior.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Portal endpoints and login behavior")]
pub struct PortalConfig {
    /// Page the login flow starts from.
    pub login_url: String,

    /// Page whose appearance means the login succeeded.
    pub landing_url: String,

    /// Base URL of the JSON API.
    pub api_url: String,

    /// Identity provider picked on the first login page (`selectedIdp`).
    /// Leave unset to treat the login page as an ordinary form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,

    /// Maximum number of login forms submitted before giving up.
    #[schemars(range(min = 1))]
    pub login_attempts: u32,

    /// Actor selected on the role picker form.
    pub actor: ActorRole,

    /// Portal role used for the profile context.
    pub portal_role: PortalRole,

    /// Page size for `posts.getAllPosts`.
    #[schemars(range(min = 1))]
    pub posts_limit: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://www.aula.dk/auth/login.php?type=unilogin".to_string(),
            landing_url: "https://www.aula.dk/portal/".to_string(),
            api_url: "https://www.aula.dk/api/v17/".to_string(),
            identity_provider: Some("uni_idp".to_string()),
            login_attempts: 10,
            actor: ActorRole::default(),
            portal_role: PortalRole::default(),
            posts_limit: 2,
        }
    }
}

/// Local language model settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Local language model settings")]
pub struct ModelConfig {
    /// Base URL of the Ollama-compatible server.
    pub endpoint: String,

    /// Model name passed to the server.
    pub model: String,

    /// System prompt opening every chat session.
    pub system_prompt: String,
}

/// Default persona for the summarizing model.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant for a parent with children in \
school and kindergarten. The parent receives many messages from the school and the \
kindergarten but only cares about the ones that really matter, such as birthday parties \
for their own kids or meetings with teachers. Long discussions between parents and notes \
about other children's lost belongings are not important. Keep every answer very short.";

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "mistral-openorca".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Digest filtering settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Digest filtering settings")]
pub struct DigestConfig {
    /// Items older than this many days are skipped.
    #[schemars(range(min = 1))]
    pub recency_days: u32,

    /// Items newer than this many hours feed the daily summary.
    #[schemars(range(min = 1))]
    pub daily_window_hours: u32,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            recency_days: 4,
            daily_window_hours: 24,
        }
    }
}

/// Refresh schedule settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Refresh schedule for the daemon and the TUI")]
pub struct ScheduleConfig {
    /// Seconds between checks whether a refresh is due.
    #[schemars(range(min = 1))]
    pub poll_secs: u64,

    /// Hours between two refresh cycles.
    #[schemars(range(min = 1))]
    pub interval_hours: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            interval_hours: 24,
        }
    }
}
