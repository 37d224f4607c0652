use std::collections::BTreeMap;

use super::{Config, ConfigSource};

impl Config {
    fn source_label(&self, key: &str) -> String {
        self.source_attribution
            .get(key)
            .unwrap_or(&ConfigSource::Defaults)
            .to_string()
    }

    /// Get effective configuration as key-value pairs with source attribution
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut config = BTreeMap::new();
        let mut add = |key: &str, value: String| {
            config.insert(key.to_string(), (value, self.source_label(key)));
        };

        add("language", self.language().to_string());
        add("module_timeout", self.module_timeout().as_secs().to_string());
        add("max_tokens", self.max_tokens().to_string());
        add("verbose", self.verbose().to_string());
        add("llm_provider", self.provider().to_string());
        if let Some(fallback) = &self.llm.fallback_provider {
            add("llm_fallback_provider", fallback.clone());
        }
        add(
            "cache_backend",
            self.cache.backend.clone().unwrap_or_else(|| "file".to_string()),
        );
        add("cache_dir", self.cache_dir().to_string());
        add(
            "module_ttl_days",
            (self.module_ttl().as_secs() / 86_400).to_string(),
        );
        add(
            "task_ttl_hours",
            (self.task_ttl().as_secs() / 3_600).to_string(),
        );
        add(
            "heartbeat_interval",
            self.heartbeat_interval().as_secs().to_string(),
        );
        add("stream_timeout", self.stream_timeout().as_secs().to_string());
        add(
            "stream_mode",
            self.streaming
                .mode
                .clone()
                .unwrap_or_else(|| "standard".to_string()),
        );

        config
    }
}

#[cfg(test)]
mod tests {
    use crate::Config;

    #[test]
    fn test_effective_config_reports_sources() {
        let config = Config::builder().language("pt").build().unwrap();
        let effective = config.effective_config();

        assert_eq!(
            effective.get("language"),
            Some(&("pt".to_string(), "programmatic".to_string()))
        );
        assert_eq!(
            effective.get("stream_mode"),
            Some(&("standard".to_string(), "default".to_string()))
        );
        assert!(!effective.contains_key("llm_fallback_provider"));
    }
}
