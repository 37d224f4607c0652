use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reportgen_utils::error::ConfigError;

use super::{
    CacheConfig, Config, ConfigSource, Defaults, LlmConfig, ReportTypeEntry, StreamMode,
    StreamingConfig,
};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when you need to configure reportgen without relying on
    /// environment variables or config files.
    ///
    /// # Example
    ///
    /// ```rust
    /// use reportgen_config::{Config, StreamMode};
    /// use std::time::Duration;
    ///
    /// let config = Config::builder()
    ///     .language("de")
    ///     .module_timeout(Duration::from_secs(30))
    ///     .cache_backend("memory")
    ///     .stream_mode(StreamMode::Lite)
    ///     .build()
    ///     .expect("valid config");
    /// assert_eq!(config.language(), "de");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration of reportgen.
///
/// All values set via the builder are attributed to `ConfigSource::Programmatic`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    language: Option<String>,
    module_timeout: Option<Duration>,
    max_tokens: Option<u32>,
    verbose: Option<bool>,
    llm_provider: Option<String>,
    fallback_provider: Option<String>,
    cache_backend: Option<String>,
    cache_dir: Option<String>,
    module_ttl_days: Option<u64>,
    task_ttl_hours: Option<u64>,
    heartbeat_interval: Option<u64>,
    stream_timeout: Option<u64>,
    stream_mode: Option<StreamMode>,
    reports: BTreeMap<String, ReportTypeEntry>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the per-call generation timeout. Sub-second values round down.
    #[must_use]
    pub fn module_timeout(mut self, timeout: Duration) -> Self {
        self.module_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    #[must_use]
    pub fn llm_provider(mut self, provider: impl Into<String>) -> Self {
        self.llm_provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn fallback_provider(mut self, provider: impl Into<String>) -> Self {
        self.fallback_provider = Some(provider.into());
        self
    }

    /// `file` or `memory`
    #[must_use]
    pub fn cache_backend(mut self, backend: impl Into<String>) -> Self {
        self.cache_backend = Some(backend.into());
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn module_ttl_days(mut self, days: u64) -> Self {
        self.module_ttl_days = Some(days);
        self
    }

    #[must_use]
    pub fn task_ttl_hours(mut self, hours: u64) -> Self {
        self.task_ttl_hours = Some(hours);
        self
    }

    /// Heartbeat interval in seconds
    #[must_use]
    pub fn heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval = Some(secs);
        self
    }

    /// Streaming hard ceiling in seconds
    #[must_use]
    pub fn stream_timeout(mut self, secs: u64) -> Self {
        self.stream_timeout = Some(secs);
        self
    }

    #[must_use]
    pub fn stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = Some(mode);
        self
    }

    /// Add or override a report type
    #[must_use]
    pub fn report(mut self, report_type: impl Into<String>, entry: ReportTypeEntry) -> Self {
        self.reports.insert(report_type.into(), entry);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut attribution = HashMap::new();
        let mut mark = |key: &str, set: bool| {
            let source = if set {
                ConfigSource::Programmatic
            } else {
                ConfigSource::Defaults
            };
            attribution.insert(key.to_string(), source);
        };

        mark("language", self.language.is_some());
        mark("module_timeout", self.module_timeout.is_some());
        mark("max_tokens", self.max_tokens.is_some());
        mark("verbose", self.verbose.is_some());
        mark("llm_provider", self.llm_provider.is_some());
        mark("cache_backend", self.cache_backend.is_some());
        mark("cache_dir", self.cache_dir.is_some());
        mark("module_ttl_days", self.module_ttl_days.is_some());
        mark("task_ttl_hours", self.task_ttl_hours.is_some());
        mark("heartbeat_interval", self.heartbeat_interval.is_some());
        mark("stream_timeout", self.stream_timeout.is_some());
        mark("stream_mode", self.stream_mode.is_some());
        for name in self.reports.keys() {
            attribution.insert(format!("reports.{name}"), ConfigSource::Programmatic);
        }

        let base = Defaults::default();
        let defaults = Defaults {
            language: self.language.or(base.language),
            module_timeout: self
                .module_timeout
                .map(|d| d.as_secs())
                .or(base.module_timeout),
            max_tokens: self.max_tokens.or(base.max_tokens),
            verbose: self.verbose.or(base.verbose),
        };

        let llm = LlmConfig {
            provider: Some(
                self.llm_provider
                    .unwrap_or_else(|| super::DEFAULT_PROVIDER.to_string()),
            ),
            fallback_provider: self.fallback_provider,
            anthropic: None,
            openrouter: None,
        };

        let base = CacheConfig::default();
        let cache = CacheConfig {
            backend: self.cache_backend.or(base.backend),
            dir: self.cache_dir.or(base.dir),
            module_ttl_days: self.module_ttl_days.or(base.module_ttl_days),
            task_ttl_hours: self.task_ttl_hours.or(base.task_ttl_hours),
        };

        let base = StreamingConfig::default();
        let streaming = StreamingConfig {
            heartbeat_interval: self.heartbeat_interval.or(base.heartbeat_interval),
            timeout: self.stream_timeout.or(base.timeout),
            mode: self
                .stream_mode
                .map(|m| m.as_str().to_string())
                .or(base.mode),
        };

        let config = Config {
            defaults,
            llm,
            cache,
            streaming,
            reports: self.reports,
            source_attribution: attribution,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_attributes_programmatic_values() {
        let config = Config::builder()
            .language("es")
            .task_ttl_hours(1)
            .build()
            .unwrap();

        assert_eq!(config.language(), "es");
        assert_eq!(config.task_ttl(), Duration::from_secs(3600));
        assert_eq!(
            config.source_attribution.get("language"),
            Some(&ConfigSource::Programmatic)
        );
        assert_eq!(
            config.source_attribution.get("max_tokens"),
            Some(&ConfigSource::Defaults)
        );
    }

    #[test]
    fn test_builder_defaults_match_documented_values() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.provider(), "anthropic");
        assert_eq!(config.module_ttl(), Duration::from_secs(14 * 24 * 3600));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.stream_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_tokens(), 2048);
    }
}
