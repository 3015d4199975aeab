//! Harness configuration.
//!
//! Loaded from YAML with `VIGIA_*` environment overrides. [`HarnessConfig::install`]
//! publishes the wait policy that [`Poller::default`](crate::Poller) reads.

use crate::result::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Default implicit wait for locators and expectations
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default polling interval
pub const DEFAULT_INTERVAL_MS: u64 = 50;

/// Default window for short-circuit existence probes
pub const DEFAULT_PROBE_MS: u64 = 1000;

/// Default time a page may take to show its ready signal
pub const DEFAULT_NAVIGATION_MS: u64 = 30_000;

/// Timing policy shared by every poll in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitPolicy {
    /// Implicit wait in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub interval_ms: u64,
    /// Existence probe window in milliseconds
    pub probe_ms: u64,
    /// Navigation ready-signal timeout in milliseconds
    pub navigation_ms: u64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
            probe_ms: DEFAULT_PROBE_MS,
            navigation_ms: DEFAULT_NAVIGATION_MS,
        }
    }
}

impl WaitPolicy {
    /// Implicit wait
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Polling interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Existence probe window
    #[must_use]
    pub const fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    /// Navigation timeout
    #[must_use]
    pub const fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    /// Reject policies the poller cannot honor.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.interval_ms == 0 {
            return Err(HarnessError::config("wait.interval_ms must be positive"));
        }
        for (name, value) in [
            ("timeout_ms", self.timeout_ms),
            ("probe_ms", self.probe_ms),
            ("navigation_ms", self.navigation_ms),
        ] {
            if self.interval_ms > value {
                return Err(HarnessError::config(format!(
                    "wait.interval_ms ({}) exceeds wait.{name} ({value})",
                    self.interval_ms
                )));
            }
        }
        Ok(())
    }

    /// The installed process-wide policy, or the defaults.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_POLICY.get().copied().unwrap_or_default()
    }
}

static GLOBAL_POLICY: OnceLock<WaitPolicy> = OnceLock::new();

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run without a visible window
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to the Chromium binary
    pub chromium_path: Option<String>,
    /// Chromium sandbox
    pub sandbox: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1400,
            viewport_height: 1400,
            chromium_path: None,
            sandbox: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human output
    Pretty,
    /// Single-line human output
    #[default]
    Compact,
    /// JSON lines
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(HarnessError::config(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when neither `VIGIA_LOG` nor `RUST_LOG` is set
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "vigia=info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Full harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application under test
    pub base_url: String,
    /// Timing policy
    pub wait: WaitPolicy,
    /// Browser launch settings
    pub browser: BrowserSettings,
    /// Logging settings
    pub logging: LogConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            wait: WaitPolicy::default(),
            browser: BrowserSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Parse YAML text.
    pub fn from_yaml(text: &str) -> HarnessResult<Self> {
        let config: Self = serde_yaml_ng::from_str(text)?;
        Ok(config)
    }

    /// Read a YAML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> HarnessResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VIGIA_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> HarnessResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VIGIA_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("VIGIA_TIMEOUT_MS") {
            self.wait.timeout_ms = parse_u64("VIGIA_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("VIGIA_INTERVAL_MS") {
            self.wait.interval_ms = parse_u64("VIGIA_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("VIGIA_PROBE_MS") {
            self.wait.probe_ms = parse_u64("VIGIA_PROBE_MS", &v)?;
        }
        if let Some(v) = lookup("VIGIA_NAVIGATION_MS") {
            self.wait.navigation_ms = parse_u64("VIGIA_NAVIGATION_MS", &v)?;
        }
        if let Some(v) = lookup("VIGIA_HEADLESS") {
            self.browser.headless = parse_bool("VIGIA_HEADLESS", &v)?;
        }
        if let Some(v) = lookup("VIGIA_CHROMIUM_PATH") {
            self.browser.chromium_path = Some(v);
        }
        if let Some(v) = lookup("VIGIA_LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        Ok(())
    }

    /// Check the configuration for values the harness cannot use.
    pub fn validate(&self) -> HarnessResult<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| HarnessError::config(format!("base_url {:?}: {e}", self.base_url)))?;
        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(HarnessError::config("browser viewport must be non-empty"));
        }
        self.wait.validate()
    }

    /// Publish the wait policy process-wide.
    ///
    /// Returns `false` if a policy was already installed; the first one wins.
    pub fn install(&self) -> bool {
        let installed = GLOBAL_POLICY.set(self.wait).is_ok();
        if installed {
            tracing::debug!(policy = ?self.wait, "installed wait policy");
        }
        installed
    }

    /// Join `base_url` and an absolute path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> HarnessResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn parse_u64(key: &str, value: &str) -> HarnessResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| HarnessError::config(format!("{key} must be an integer, got {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> HarnessResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(HarnessError::config(format!(
            "{key} must be a boolean, got {value:?}"
        ))),
    }
}
