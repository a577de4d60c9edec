//! Configuration surface consumed by the e-prescription processing core.
//!
//! The core reads a small, enumerated set of keys ([`CoreConfig`]) from a
//! TOML file and/or process environment; everything else the service
//! configures stays outside the core. Wall-clock access goes through the
//! injected [`Clock`] trait so tests can pin or advance time.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// An environment value could not be interpreted for its key.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Enumerated values
// ---------------------------------------------------------------------------

/// How a validation verdict is applied to an incoming resource bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Skip generic validation entirely.
    Disable,
    /// Run validation, log findings, never reject.
    DetailOnly,
    /// Run validation, reject only on internal faults, not on findings.
    IgnoreErrors,
    /// Reject when the highest finding severity reaches `error`.
    #[default]
    RequireSuccess,
}

impl ValidationMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "disable" => Ok(Self::Disable),
            "detail_only" => Ok(Self::DetailOnly),
            "ignore_errors" => Ok(Self::IgnoreErrors),
            "require_success" => Ok(Self::RequireSuccess),
            other => Err(ConfigError::InvalidValue {
                key: keys::VALIDATION_MODE,
                reason: format!("unknown mode: {other}"),
            }),
        }
    }
}

/// Whether extensions unknown at their position are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportUnknownExtensions {
    /// Unknown extensions are accepted silently.
    #[default]
    Off,
    /// Every unknown extension is reported.
    Enabled,
    /// Only extensions under open slicings are reported.
    OnlyOpenSlicing,
}

impl ReportUnknownExtensions {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "off" => Ok(Self::Off),
            "enabled" => Ok(Self::Enabled),
            "only_open_slicing" => Ok(Self::OnlyOpenSlicing),
            other => Err(ConfigError::InvalidValue {
                key: keys::REPORT_UNKNOWN_EXTENSIONS,
                reason: format!("unknown setting: {other}"),
            }),
        }
    }
}

/// Environment key names, exactly as deployed.
pub mod keys {
    /// Expected `aud` claim value of access tokens.
    pub const JWT_AUD_URI: &str = "JWT_AUD_URI";
    /// Tolerance in seconds when checking the `iat` claim.
    pub const JWT_IAT_TOLERANCE_SECONDS: &str = "JWT_IAT_TOLERANCE_SECONDS";
    /// Generic validation mode per profile bundle.
    pub const VALIDATION_MODE: &str = "VALIDATION_MODE";
    /// Permit Composition.author references without a literal target.
    pub const ALLOWED_NON_LITERAL_AUTHOR_REFERENCE: &str = "ALLOWED_NON_LITERAL_AUTHOR_REFERENCE";
    /// Unknown-extension reporting mode.
    pub const REPORT_UNKNOWN_EXTENSIONS: &str = "REPORT_UNKNOWN_EXTENSIONS";
    /// Directory with trust anchors for offline CMS verification.
    pub const CADES_BES_TRUSTED_CERT_DIR: &str = "CADES_BES_TRUSTED_CERT_DIR";
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// The enumerated configuration keys consumed by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Registered service URI that incoming tokens must name in `aud`.
    #[serde(default)]
    pub jwt_aud_uri: String,

    /// Seconds of clock skew tolerated on the `iat` claim.
    #[serde(default = "default_iat_tolerance")]
    pub jwt_iat_tolerance_seconds: u64,

    /// Generic validation mode.
    #[serde(default)]
    pub validation_mode: ValidationMode,

    /// Permit non-literal Composition.author references in document bundles.
    #[serde(default)]
    pub allowed_non_literal_author_reference: bool,

    /// Unknown-extension reporting mode.
    #[serde(default)]
    pub report_unknown_extensions: ReportUnknownExtensions,

    /// Trust anchors for offline CMS verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cades_bes_trusted_cert_dir: Option<PathBuf>,
}

fn default_iat_tolerance() -> u64 {
    2
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            jwt_aud_uri: String::new(),
            jwt_iat_tolerance_seconds: default_iat_tolerance(),
            validation_mode: ValidationMode::default(),
            allowed_non_literal_author_reference: false,
            report_unknown_extensions: ReportUnknownExtensions::default(),
            cades_bes_trusted_cert_dir: None,
        }
    }
}

impl CoreConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                    path: p.display().to_string(),
                })?;
                toml::from_str(&text).map_err(|e| ConfigError::ParseError {
                    reason: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_environment(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    ///
    /// Split out from [`load`](Self::load) so tests can inject values
    /// without touching the process environment.
    pub fn apply_environment<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(keys::JWT_AUD_URI) {
            self.jwt_aud_uri = v;
        }
        if let Some(v) = lookup(keys::JWT_IAT_TOLERANCE_SECONDS) {
            self.jwt_iat_tolerance_seconds =
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    key: keys::JWT_IAT_TOLERANCE_SECONDS,
                    reason: format!("not an unsigned integer: {v}"),
                })?;
        }
        if let Some(v) = lookup(keys::VALIDATION_MODE) {
            self.validation_mode = ValidationMode::parse(&v)?;
        }
        if let Some(v) = lookup(keys::ALLOWED_NON_LITERAL_AUTHOR_REFERENCE) {
            self.allowed_non_literal_author_reference = match v.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: keys::ALLOWED_NON_LITERAL_AUTHOR_REFERENCE,
                        reason: format!("not a boolean: {other}"),
                    })
                }
            };
        }
        if let Some(v) = lookup(keys::REPORT_UNKNOWN_EXTENSIONS) {
            self.report_unknown_extensions = ReportUnknownExtensions::parse(&v)?;
        }
        if let Some(v) = lookup(keys::CADES_BES_TRUSTED_CERT_DIR) {
            self.cades_bes_trusted_cert_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Injected wall-clock so the temporal checks are testable.
pub trait Clock: Send + Sync {
    /// Current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A pinned clock for tests; time moves only via [`FixedClock::advance`].
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    /// Create a clock pinned to the given Unix timestamp (seconds).
    pub fn at_unix(secs: i64) -> Self {
        Self(Mutex::new(
            Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now),
        ))
    }

    /// Create a clock pinned to the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(Mutex::new(instant))
    }

    /// Move the clock forward by whole seconds.
    pub fn advance(&self, secs: i64) {
        let mut guard = self.0.lock().expect("clock lock poisoned");
        *guard += chrono::Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.0.lock().expect("clock lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
