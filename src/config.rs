//! Relay configuration parsing, validation, and environment overrides.
//!
//! Every field has a compiled-in default, so the relay runs without a config
//! file. A TOML file may override any subset of fields; the `PORT`
//! environment variable then overrides the listening port.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable selecting the HTTP listening port.
pub const PORT_ENV: &str = "PORT";

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct HttpConfig {
    /// Address the listener binds to.
    pub host: String,
    /// TCP port; `0` lets the OS pick one.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
        }
    }
}

/// Command line of the supervised child process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ChildConfig {
    /// Executable to launch (resolved through `PATH`).
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory; inherits the relay's when unset.
    pub working_dir: Option<PathBuf>,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            command: "npx".into(),
            args: vec!["@playwright/mcp@latest".into()],
            working_dir: None,
        }
    }
}

/// Deadlines applied by the supervisor.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TimeoutConfig {
    /// Per-request deadline for a correlated response.
    pub request_seconds: u64,
    /// Delay after spawn after which the child counts as ready even if silent.
    pub warmup_millis: u64,
    /// Time between the polite termination signal and a hard kill.
    pub shutdown_grace_millis: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: 30,
            warmup_millis: 2000,
            shutdown_grace_millis: 3000,
        }
    }
}

/// What happens after the child exits on its own.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RestartConfig {
    /// Respawn the child after an unexpected exit.
    pub enabled: bool,
    /// Pause before each respawn attempt.
    pub delay_millis: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_millis: 1000,
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RelayConfig {
    /// HTTP listener settings.
    pub http: HttpConfig,
    /// Child process command line.
    pub child: ChildConfig,
    /// Supervisor deadlines.
    pub timeouts: TimeoutConfig,
    /// Restart policy.
    pub restart: RestartConfig,
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the `PORT` environment variable, if set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `PORT` is set but is not a valid port.
    pub fn apply_env(&mut self) -> Result<()> {
        match env::var(PORT_ENV) {
            Ok(raw) => {
                self.http.port = parse_port(&raw)?;
                Ok(())
            }
            Err(env::VarError::NotPresent) => Ok(()),
            Err(env::VarError::NotUnicode(_)) => {
                Err(AppError::Config(format!("{PORT_ENV} is not valid unicode")))
            }
        }
    }

    /// Per-request response deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// Readiness fallback delay after spawn.
    #[must_use]
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.timeouts.warmup_millis)
    }

    /// Grace period between the termination signal and a hard kill.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_grace_millis)
    }

    /// Delay before an automatic respawn, or `None` when restarts are disabled.
    #[must_use]
    pub fn restart_delay(&self) -> Option<Duration> {
        self.restart
            .enabled
            .then(|| Duration::from_millis(self.restart.delay_millis))
    }

    /// Validate field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.child.command.trim().is_empty() {
            return Err(AppError::Config("child.command must not be empty".into()));
        }

        if self.timeouts.request_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.request_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .map_err(|err| AppError::Config(format!("invalid {PORT_ENV} value {raw:?}: {err}")))
}
