use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reportgen_utils::error::ConfigError;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_MODULE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_CACHE_DIR: &str = ".reportgen/cache";
pub const DEFAULT_MODULE_TTL_DAYS: u64 = 14;
pub const DEFAULT_TASK_TTL_HOURS: u64 = 168;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 300;

/// Configuration for reportgen.
///
/// `Config` provides hierarchical configuration with discovery and precedence:
/// CLI arguments > environment > config file > built-in defaults.
///
/// # Discovery
///
/// Use [`Config::discover()`] for CLI-like behavior that:
/// - Honors an explicit `--config` path
/// - Respects the `REPORTGEN_HOME` environment variable
/// - Searches for `.reportgen/config.toml` upward from the current directory
/// - Applies built-in defaults for unspecified values
///
/// Use [`Config::builder()`] for deterministic construction independent of the
/// user's environment.
///
/// # Configuration File Format
///
/// ```toml
/// [defaults]
/// language = "en"
/// module_timeout = 120
///
/// [llm]
/// provider = "anthropic"
/// fallback_provider = "openrouter"
///
/// [cache]
/// backend = "file"
/// dir = ".reportgen/cache"
///
/// [streaming]
/// heartbeat_interval = 15
/// timeout = 300
/// mode = "standard"
///
/// [reports.custom]
/// title = "Custom"
/// modules = [{ id = "intro", label = "Introduction" }]
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Default values for generation settings.
    pub defaults: Defaults,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// Content cache and task record storage.
    pub cache: CacheConfig,
    /// Streaming delivery channel settings.
    pub streaming: StreamingConfig,
    /// Report type additions and overrides keyed by report type.
    pub reports: BTreeMap<String, ReportTypeEntry>,
    /// Source attribution for each setting (for status display).
    pub source_attribution: HashMap<String, ConfigSource>,
}

/// Default generation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    pub language: Option<String>,
    /// Per-call generation timeout in seconds
    pub module_timeout: Option<u64>,
    pub max_tokens: Option<u32>,
    pub verbose: Option<bool>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            language: Some(DEFAULT_LANGUAGE.to_string()),
            module_timeout: Some(DEFAULT_MODULE_TIMEOUT_SECS),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            verbose: Some(false),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub fallback_provider: Option<String>,
    pub anthropic: Option<AnthropicConfig>,
    pub openrouter: Option<OpenRouterConfig>,
}

/// OpenRouter HTTP provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpenRouterConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Maximum provider calls per process
    pub budget: Option<u32>,
}

/// Anthropic HTTP provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnthropicConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Storage settings for module content and task records
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// `file` or `memory`
    pub backend: Option<String>,
    pub dir: Option<String>,
    pub module_ttl_days: Option<u64>,
    pub task_ttl_hours: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: Some("file".to_string()),
            dir: Some(DEFAULT_CACHE_DIR.to_string()),
            module_ttl_days: Some(DEFAULT_MODULE_TTL_DAYS),
            task_ttl_hours: Some(DEFAULT_TASK_TTL_HOURS),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Seconds between `ping` events
    pub heartbeat_interval: Option<u64>,
    /// Hard ceiling in seconds before the channel is closed with an error
    pub timeout: Option<u64>,
    /// `standard` or `lite`
    pub mode: Option<String>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_SECS),
            timeout: Some(DEFAULT_STREAM_TIMEOUT_SECS),
            mode: Some("standard".to_string()),
        }
    }
}

/// A `[reports.<type>]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportTypeEntry {
    pub title: Option<String>,
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleEntry {
    pub id: String,
    pub label: Option<String>,
    pub estimated_seconds: Option<u32>,
}

/// Source of a configuration value.
///
/// Precedence: CLI arguments > environment > config file > programmatic > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile(PathBuf),
    Programmatic,
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Env => write!(f, "env"),
            Self::ConfigFile(path) => write!(f, "config ({})", path.display()),
            Self::Programmatic => write!(f, "programmatic"),
            Self::Defaults => write!(f, "default"),
        }
    }
}

/// Backing store for cached content and task records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    File,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "cache.backend".to_string(),
                value: format!("unknown backend '{other}' (expected file or memory)"),
            }),
        }
    }
}

/// How the streaming channel persists module results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Cache writes are deferred to background tasks
    #[default]
    Standard,
    /// Every cache write is awaited before the module's event is emitted
    Lite,
}

impl StreamMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Lite => "lite",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "lite" => Ok(Self::Lite),
            other => Err(ConfigError::InvalidValue {
                key: "streaming.mode".to_string(),
                value: format!("unknown mode '{other}' (expected standard or lite)"),
            }),
        }
    }
}

impl Config {
    #[must_use]
    pub fn language(&self) -> &str {
        self.defaults.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    #[must_use]
    pub fn module_timeout(&self) -> Duration {
        Duration::from_secs(
            self.defaults
                .module_timeout
                .unwrap_or(DEFAULT_MODULE_TIMEOUT_SECS),
        )
    }

    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.defaults.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    #[must_use]
    pub fn verbose(&self) -> bool {
        self.defaults.verbose.unwrap_or(false)
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        self.llm.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn cache_backend(&self) -> Result<CacheBackendKind, ConfigError> {
        self.cache.backend.as_deref().unwrap_or("file").parse()
    }

    /// Cache directory as a UTF-8 path
    #[must_use]
    pub fn cache_dir(&self) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from(self.cache.dir.as_deref().unwrap_or(DEFAULT_CACHE_DIR))
    }

    /// TTL applied to cached module content
    #[must_use]
    pub fn module_ttl(&self) -> Duration {
        let days = self.cache.module_ttl_days.unwrap_or(DEFAULT_MODULE_TTL_DAYS);
        Duration::from_secs(days.saturating_mul(24 * 60 * 60))
    }

    /// TTL applied to task records
    #[must_use]
    pub fn task_ttl(&self) -> Duration {
        let hours = self.cache.task_ttl_hours.unwrap_or(DEFAULT_TASK_TTL_HOURS);
        Duration::from_secs(hours.saturating_mul(60 * 60))
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(
            self.streaming
                .heartbeat_interval
                .unwrap_or(DEFAULT_HEARTBEAT_SECS),
        )
    }

    #[must_use]
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.streaming.timeout.unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS))
    }

    pub fn stream_mode(&self) -> Result<StreamMode, ConfigError> {
        self.streaming.mode.as_deref().unwrap_or("standard").parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_mode_parsing() {
        assert_eq!("lite".parse::<StreamMode>().unwrap(), StreamMode::Lite);
        assert_eq!(
            "standard".parse::<StreamMode>().unwrap(),
            StreamMode::Standard
        );
        assert!(matches!(
            "turbo".parse::<StreamMode>(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_cache_backend_parsing() {
        assert_eq!(
            "memory".parse::<CacheBackendKind>().unwrap(),
            CacheBackendKind::Memory
        );
        assert!("redis".parse::<CacheBackendKind>().is_err());
    }

    #[test]
    fn test_report_entry_from_toml() {
        let entry: ReportTypeEntry = toml::from_str(
            r#"
            title = "Custom"
            estimated_minutes = 3
            modules = [{ id = "intro", label = "Introduction", estimated_seconds = 20 }, { id = "outro" }]
            "#,
        )
        .unwrap();
        assert_eq!(entry.modules.len(), 2);
        assert_eq!(entry.modules[1].id, "outro");
        assert!(entry.modules[1].label.is_none());
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ConfigSource::Defaults.to_string(), "default");
        assert!(
            ConfigSource::ConfigFile(PathBuf::from("/x/config.toml"))
                .to_string()
                .contains("/x/config.toml")
        );
    }
}
