//! Application-level configuration loading: scoring, join codes, persistence limits and
//! the connection gate secret.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::scoring::{DEFAULT_MAX_POINTS, ScoringPolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_LIVE_CONFIG_PATH";
/// Environment variable that overrides the configured bearer token secret.
const JWT_SECRET_ENV: &str = "QUIZ_LIVE_JWT_SECRET";

const DEFAULT_JOIN_CODE_LENGTH: usize = 6;
const MIN_JOIN_CODE_LENGTH: usize = 4;
const MAX_JOIN_CODE_LENGTH: usize = 12;
const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_PERSISTENCE_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    scoring: ScoringPolicy,
    join_code_length: usize,
    persistence_timeout: Duration,
    persistence_max_attempts: u32,
    jwt_secret: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    ///
    /// The bearer secret from [`JWT_SECRET_ENV`] wins over the file value.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded configuration file");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        match env::var(JWT_SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => config.with_jwt_secret(secret),
            _ => config,
        }
    }

    /// Replace the bearer token secret.
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Replace the persistence timeout and retry budget.
    pub fn with_persistence(mut self, timeout: Duration, max_attempts: u32) -> Self {
        self.persistence_timeout = timeout;
        self.persistence_max_attempts = max_attempts.max(1);
        self
    }

    pub fn scoring(&self) -> &ScoringPolicy {
        &self.scoring
    }

    pub fn join_code_length(&self) -> usize {
        self.join_code_length
    }

    /// Upper bound for a single store call.
    pub fn persistence_timeout(&self) -> Duration {
        self.persistence_timeout
    }

    /// How many times a command is attempted when persistence times out or conflicts.
    pub fn persistence_max_attempts(&self) -> u32 {
        self.persistence_max_attempts
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            join_code_length: DEFAULT_JOIN_CODE_LENGTH,
            persistence_timeout: Duration::from_millis(DEFAULT_PERSISTENCE_TIMEOUT_MS),
            persistence_max_attempts: DEFAULT_PERSISTENCE_MAX_ATTEMPTS,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
/// Every key is optional.
struct RawConfig {
    max_points: Option<u64>,
    join_code_length: Option<usize>,
    persistence_timeout_ms: Option<u64>,
    persistence_max_attempts: Option<u32>,
    jwt_secret: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            scoring: ScoringPolicy::new(value.max_points.unwrap_or(DEFAULT_MAX_POINTS)),
            join_code_length: value
                .join_code_length
                .unwrap_or(DEFAULT_JOIN_CODE_LENGTH)
                .clamp(MIN_JOIN_CODE_LENGTH, MAX_JOIN_CODE_LENGTH),
            persistence_timeout: Duration::from_millis(
                value
                    .persistence_timeout_ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_PERSISTENCE_TIMEOUT_MS),
            ),
            persistence_max_attempts: value
                .persistence_max_attempts
                .unwrap_or(DEFAULT_PERSISTENCE_MAX_ATTEMPTS)
                .max(1),
            jwt_secret: value.jwt_secret.filter(|secret| !secret.is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
