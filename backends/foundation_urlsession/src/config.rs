//! Session configuration.
//!
//! WHY: Every task created by a session shares one set of policy knobs
//! (timeouts, default headers, redirect limit, caching, decompression).
//!
//! WHAT: `SessionConfiguration` with sensible defaults, builder methods and
//! TOML loading so scenario suites can keep their settings in a file.
//!
//! HOW: Plain serde struct; durations are (de)serialized as fractional seconds
//! through `serde_with`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};

/// Default per-request inactivity timeout (60 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default total resource timeout (7 days).
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of redirects followed before a task fails.
pub const DEFAULT_MAXIMUM_REDIRECTS: u8 = 16;

#[derive(Debug, From)]
pub enum ConfigError {
    #[from(ignore)]
    IOError(std::io::Error),

    #[from(ignore)]
    DeserializationFailed(toml::de::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::DeserializationFailed(value)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration shared by all tasks of a `Session`.
///
/// WHY: Centralizes session policy in one place so a scenario can build it once
/// and hand it to the session at construction.
///
/// WHAT: Request/resource timeouts, additional headers, redirect limit,
/// automatic decompression, response caching and the user agent.
///
/// HOW: Created via `Default`, the builder methods, or loaded from TOML.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfiguration {
    /// Inactivity timeout applied when a request does not set its own.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub timeout_interval_for_request: Duration,

    /// Upper bound on the total duration of a task.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub timeout_interval_for_resource: Duration,

    /// Headers added to every request unless the request sets them itself.
    pub http_additional_headers: BTreeMap<String, String>,

    /// Maximum redirects followed before failing with `TooManyRedirects`.
    pub http_maximum_redirects: u8,

    /// Advertise and decode gzip/deflate content encodings.
    pub automatic_decompression: bool,

    /// Propose cacheable responses to the delegate and keep accepted ones.
    pub url_cache_enabled: bool,

    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            timeout_interval_for_request: DEFAULT_REQUEST_TIMEOUT,
            timeout_interval_for_resource: DEFAULT_RESOURCE_TIMEOUT,
            http_additional_headers: BTreeMap::new(),
            http_maximum_redirects: DEFAULT_MAXIMUM_REDIRECTS,
            automatic_decompression: true,
            url_cache_enabled: true,
            user_agent: format!("foundation_urlsession/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SessionConfiguration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn from_path<V: Into<PathBuf>>(target: V) -> ConfigResult<Self> {
        let target_path = target.into();
        let content = std::fs::read_to_string(target_path)?;
        Self::from_toml_str(&content)
    }

    #[must_use]
    pub fn timeout_for_request(mut self, timeout: Duration) -> Self {
        self.timeout_interval_for_request = timeout;
        self
    }

    #[must_use]
    pub fn timeout_for_resource(mut self, timeout: Duration) -> Self {
        self.timeout_interval_for_resource = timeout;
        self
    }

    #[must_use]
    pub fn additional_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_additional_headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn maximum_redirects(mut self, redirects: u8) -> Self {
        self.http_maximum_redirects = redirects;
        self
    }

    #[must_use]
    pub fn automatic_decompression(mut self, enabled: bool) -> Self {
        self.automatic_decompression = enabled;
        self
    }

    #[must_use]
    pub fn url_cache(mut self, enabled: bool) -> Self {
        self.url_cache_enabled = enabled;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }
}
