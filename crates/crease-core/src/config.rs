// Configuration loading and parsing (scorer.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("could not seed scorer config: {message}")]
    SeedError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub channels: ChannelConfig,
    pub submission: SubmissionConfig,
    pub pacing: PacingConfig,
    pub session: SessionSection,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// scorer.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire scorer.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ScorerFile {
    server: ServerConfig,
    #[serde(default)]
    channels: ChannelConfig,
    #[serde(default)]
    submission: SubmissionConfig,
    #[serde(default)]
    pacing: PacingConfig,
    #[serde(default)]
    session: SessionSection,
}

/// Endpoints of the scoring backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the request/response data service. Paths such as
    /// `matchstate/{id}` are joined onto it.
    pub api_base_url: String,
    /// WebSocket endpoint carrying the STOMP channels.
    pub ws_url: String,
}

/// Real-time channel tuning shared by the submit and live connections.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub heartbeat_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 10,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 3,
        }
    }
}

impl ChannelConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Submission gate timings.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    /// How long a submission waits for the submit channel to become ready.
    pub ready_timeout_ms: u64,
    /// Readiness polling interval during that wait.
    pub ready_poll_ms: u64,
    /// How long the gate stays held waiting for the broadcast echo of a
    /// published ball before it is released with an `AckTimeout` notice.
    pub ack_timeout_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 5000,
            ready_poll_ms: 100,
            ack_timeout_secs: 15,
        }
    }
}

impl SubmissionConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

/// Fixed UI pacing delays that the workflow schedules as timed transitions.
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    pub wicket_settle_secs: u64,
    pub innings_break_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            wicket_settle_secs: 10,
            innings_break_secs: 12,
        }
    }
}

impl PacingConfig {
    pub fn wicket_settle(&self) -> Duration {
        Duration::from_secs(self.wicket_settle_secs)
    }

    pub fn innings_break(&self) -> Duration {
        Duration::from_secs(self.innings_break_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSection {
    /// Match to score when none is given on the command line.
    #[serde(default)]
    pub match_id: Option<String>,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Identifier sent in the `user-id` header of every publish.
    #[serde(default = "default_scorer_id")]
    pub scorer_id: String,
    /// Bearer token for the data service, if it requires one.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            scorer_id: default_scorer_id(),
            api_token: None,
        }
    }
}

fn default_scorer_id() -> String {
    "anonymous-scorer".to_string()
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/scorer.toml` and
/// (optionally) `config/credentials.toml`, both relative to `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- scorer.toml (required) ---
    let scorer_path = config_dir.join("scorer.toml");
    let scorer_text = read_file(&scorer_path)?;
    let scorer_file: ScorerFile =
        toml::from_str(&scorer_text).map_err(|e| ConfigError::ParseError {
            path: scorer_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: scorer_file.server,
        channels: scorer_file.channels,
        submission: scorer_file.submission,
        pacing: scorer_file.pacing,
        session: scorer_file.session,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Directory under the install root holding the shipped config templates.
const TEMPLATE_DIR: &str = "defaults";
/// Directory the console reads its config from.
const CONFIG_DIR: &str = "config";
const SCORER_FILE: &str = "scorer.toml";

/// Files seeded into `config/` on first run. `credentials.toml` is left to
/// the scorer; `defaults/credentials.toml.example` documents it.
const SEEDED_FILES: &[&str] = &[SCORER_FILE];

fn seed_error(message: String) -> ConfigError {
    ConfigError::SeedError { message }
}

/// First-run setup: copy each missing seeded file from `defaults/` into
/// `config/`, leaving the scorer's own edits alone. Returns the files
/// written.
pub fn seed_scorer_config(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let template_dir = base_dir.join(TEMPLATE_DIR);
    let config_dir = base_dir.join(CONFIG_DIR);

    if !template_dir.is_dir() {
        if config_dir.join(SCORER_FILE).is_file() {
            return Ok(Vec::new());
        }
        return Err(seed_error(format!(
            "no {CONFIG_DIR}/{SCORER_FILE} and no {TEMPLATE_DIR}/ to seed it from in {}; \
             start crease from its install directory",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| seed_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut seeded = Vec::new();
    for name in SEEDED_FILES {
        let template = template_dir.join(name);
        if !template.is_file() {
            continue;
        }
        let target = config_dir.join(name);
        let mut dest = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(dest) => dest,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(seed_error(format!("cannot create {}: {e}", target.display()))),
        };
        let body = std::fs::read(&template)
            .map_err(|e| seed_error(format!("cannot read template {}: {e}", template.display())))?;
        std::io::Write::write_all(&mut dest, &body)
            .map_err(|e| seed_error(format!("cannot write {}: {e}", target.display())))?;
        seeded.push(target);
    }

    Ok(seeded)
}

/// Load config relative to the current working directory, seeding
/// `config/scorer.toml` from the shipped template on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    seed_scorer_config(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let api = config.server.api_base_url.trim();
    if api.is_empty() {
        return Err(invalid("server.api_base_url", "must not be empty"));
    }
    if !(api.starts_with("http://") || api.starts_with("https://")) {
        return Err(invalid(
            "server.api_base_url",
            format!("must be an http(s) URL, got {api}"),
        ));
    }

    let ws = config.server.ws_url.trim();
    if ws.is_empty() {
        return Err(invalid("server.ws_url", "must not be empty"));
    }
    if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
        return Err(invalid(
            "server.ws_url",
            format!("must be a ws(s) URL, got {ws}"),
        ));
    }

    if config.channels.heartbeat_secs == 0 {
        return Err(invalid("channels.heartbeat_secs", "must be greater than 0"));
    }
    if config.channels.max_reconnect_attempts == 0 {
        return Err(invalid(
            "channels.max_reconnect_attempts",
            "must be greater than 0",
        ));
    }

    let sub = &config.submission;
    if sub.ready_poll_ms == 0 {
        return Err(invalid("submission.ready_poll_ms", "must be greater than 0"));
    }
    if sub.ready_poll_ms >= sub.ready_timeout_ms {
        return Err(invalid(
            "submission.ready_poll_ms",
            format!(
                "must be less than ready_timeout_ms ({}), got {}",
                sub.ready_timeout_ms, sub.ready_poll_ms
            ),
        ));
    }
    if sub.ack_timeout_secs == 0 {
        return Err(invalid("submission.ack_timeout_secs", "must be greater than 0"));
    }

    if config.credentials.scorer_id.trim().is_empty() {
        return Err(invalid("credentials.scorer_id", "must not be empty"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
