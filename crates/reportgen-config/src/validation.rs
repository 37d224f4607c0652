use std::collections::HashSet;

use reportgen_utils::error::ConfigError;

use super::Config;

const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openrouter"];

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(language) = &self.defaults.language
            && language.trim().is_empty()
        {
            return Err(invalid("defaults.language", "must not be empty"));
        }

        if let Some(timeout) = self.defaults.module_timeout {
            if timeout == 0 {
                return Err(invalid("defaults.module_timeout", "must be greater than 0"));
            }
            if timeout > 3600 {
                return Err(invalid(
                    "defaults.module_timeout",
                    "exceeds maximum limit of 3600 seconds (1 hour)",
                ));
            }
        }

        if self.defaults.max_tokens == Some(0) {
            return Err(invalid("defaults.max_tokens", "must be greater than 0"));
        }

        for (key, provider) in [
            ("llm.provider", &self.llm.provider),
            ("llm.fallback_provider", &self.llm.fallback_provider),
        ] {
            if let Some(provider) = provider
                && !KNOWN_PROVIDERS.contains(&provider.as_str())
            {
                return Err(invalid(
                    key,
                    format!(
                        "unknown provider '{provider}' (expected one of: {})",
                        KNOWN_PROVIDERS.join(", ")
                    ),
                ));
            }
        }

        self.cache_backend()?;
        if self.cache.module_ttl_days == Some(0) {
            return Err(invalid("cache.module_ttl_days", "must be greater than 0"));
        }
        if self.cache.task_ttl_hours == Some(0) {
            return Err(invalid("cache.task_ttl_hours", "must be greater than 0"));
        }

        let heartbeat = self.streaming.heartbeat_interval;
        let timeout = self.streaming.timeout;
        if heartbeat == Some(0) {
            return Err(invalid(
                "streaming.heartbeat_interval",
                "must be greater than 0",
            ));
        }
        if timeout == Some(0) {
            return Err(invalid("streaming.timeout", "must be greater than 0"));
        }
        if self.heartbeat_interval() >= self.stream_timeout() {
            return Err(invalid(
                "streaming.heartbeat_interval",
                "must be shorter than streaming.timeout",
            ));
        }
        self.stream_mode()?;

        let mut errors = Vec::new();
        for (report_type, entry) in &self.reports {
            if entry.modules.is_empty() {
                errors.push(format!("reports.{report_type}: no modules defined"));
                continue;
            }
            let mut seen = HashSet::new();
            for module in &entry.modules {
                if module.id.trim().is_empty() {
                    errors.push(format!("reports.{report_type}: empty module id"));
                } else if !seen.insert(module.id.as_str()) {
                    errors.push(format!(
                        "reports.{report_type}: duplicate module id '{}'",
                        module.id
                    ));
                }
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed {
                error_count: errors.len(),
                errors,
            });
        }

        Ok(())
    }
}
