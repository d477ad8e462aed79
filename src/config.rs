//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provision::ProvisionerSettings;

/// Engine version used when none is configured.
pub const FALLBACK_ENGINE_VERSION: &str = "0.11.4";

const HOME_ENV: &str = "HOME";
const DEFAULT_TOKEN_RELATIVE_PATH: &str = ".ns/token.json";

/// Driver configuration derived from environment variables, configuration
/// files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "EPHEMERA")]
pub struct DriverConfig {
    /// Engine version baked into the container image tag and the instance
    /// purpose. Falls back to [`FALLBACK_ENGINE_VERSION`] when unset.
    pub engine_version: Option<String>,
    /// Image repository for the engine container.
    #[ortho_config(default = "registry.dagger.io/engine".to_owned())]
    pub engine_image_repo: String,
    /// Base URL of the compute control plane.
    #[ortho_config(default = "https://eu.compute.namespaceapis.com".to_owned())]
    pub api_endpoint: String,
    /// Path to the JSON token file. Defaults to `$HOME/.ns/token.json`.
    pub token_path: Option<String>,
    /// Per-request HTTP timeout for control-plane calls, in seconds.
    #[ortho_config(default = 30)]
    pub http_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl DriverConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to ephemera.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ephemera")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Parse`] when the HTTP timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.engine_image_repo,
            &FieldMetadata::new(
                "engine image repository",
                "EPHEMERA_ENGINE_IMAGE_REPO",
                "engine_image_repo",
            ),
        )?;
        Self::require_field(
            &self.api_endpoint,
            &FieldMetadata::new(
                "control-plane endpoint",
                "EPHEMERA_API_ENDPOINT",
                "api_endpoint",
            ),
        )?;
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Parse(String::from(
                "http_timeout_secs must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Engine version to provision, applying the fallback when unset or blank.
    #[must_use]
    pub fn resolved_engine_version(&self) -> String {
        self.engine_version
            .as_deref()
            .map(str::trim)
            .filter(|version| !version.is_empty())
            .unwrap_or(FALLBACK_ENGINE_VERSION)
            .to_owned()
    }

    /// Resolves the token file location.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither `token_path` nor
    /// `$HOME` is available.
    pub fn resolved_token_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(path) = self
            .token_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
        {
            return Ok(Utf8PathBuf::from(path));
        }

        let home = std::env::var(HOME_ENV).map_err(|_| {
            ConfigError::MissingField(String::from(
                "missing token path: set EPHEMERA_TOKEN_PATH or HOME",
            ))
        })?;
        Ok(Utf8PathBuf::from(home).join(DEFAULT_TOKEN_RELATIVE_PATH))
    }

    /// HTTP timeout applied to each control-plane request.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Builds provisioner settings from this configuration.
    #[must_use]
    pub fn provisioner_settings(&self) -> ProvisionerSettings {
        ProvisionerSettings {
            engine_version: self.resolved_engine_version(),
            engine_image_repo: self.engine_image_repo.trim().to_owned(),
        }
    }
}

/// Errors raised while loading configuration or parsing driver URLs.
///
/// Every variant is raised before any remote call is made.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a driver URL cannot be parsed.
    #[error("invalid driver URL '{url}': {message}")]
    InvalidUrl {
        /// URL as supplied by the caller.
        url: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the `shape` option is not `{cpu}x{mem}`.
    #[error("invalid shape '{shape}': {message}")]
    InvalidShape {
        /// Shape string as supplied by the caller.
        shape: String,
        /// Description of the failure.
        message: String,
    },
    /// Raised when the `ttl` option is not a valid duration.
    #[error("invalid duration '{value}': {message}")]
    InvalidDuration {
        /// Duration string as supplied by the caller.
        value: String,
        /// Description of the failure.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
