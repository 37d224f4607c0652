use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};

use super::{
    CacheConfig, Config, ConfigSource, Defaults, LlmConfig, ReportTypeEntry, StreamingConfig,
};

/// Environment variable naming the reportgen home directory
pub const HOME_ENV: &str = "REPORTGEN_HOME";

/// Environment variable overriding `[llm] provider`
pub const PROVIDER_ENV: &str = "REPORTGEN_LLM_PROVIDER";

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub language: Option<String>,
    pub module_timeout: Option<u64>,
    pub max_tokens: Option<u32>,
    pub verbose: Option<bool>,
    pub llm_provider: Option<String>,
    pub cache_backend: Option<String>,
    pub cache_dir: Option<String>,
    pub stream_mode: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    defaults: Option<Defaults>,
    llm: Option<LlmConfig>,
    cache: Option<CacheConfig>,
    streaming: Option<StreamingConfig>,
    reports: Option<BTreeMap<String, ReportTypeEntry>>,
}

/// Replace `target` with `value` when present, recording where it came from.
fn apply<T>(
    target: &mut Option<T>,
    value: Option<T>,
    key: &str,
    source: &ConfigSource,
    attribution: &mut HashMap<String, ConfigSource>,
) {
    if value.is_some() {
        *target = value;
        attribution.insert(key.to_string(), source.clone());
    }
}

impl Config {
    /// Discover and load configuration with precedence: CLI > env > file > defaults
    ///
    /// The file is the explicit `--config` path, else `$REPORTGEN_HOME/config.toml`
    /// when that file exists, else the nearest `.reportgen/config.toml` above the
    /// current directory.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = env::current_dir().context("Failed to get current directory")?;
        let home = env::var_os(HOME_ENV).map(PathBuf::from);
        let path = Self::resolve_config_path(&start_dir, home.as_deref(), cli_args)?;
        Self::load(path.as_deref(), cli_args)
    }

    /// Discover configuration starting from a specific directory, ignoring
    /// `REPORTGEN_HOME`.
    ///
    /// This is the path-driven variant used by tests to avoid process-global state.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let path = Self::resolve_config_path(start_dir, None, cli_args)?;
        Self::load(path.as_deref(), cli_args)
    }

    fn resolve_config_path(
        start_dir: &Path,
        home: Option<&Path>,
        cli_args: &CliArgs,
    ) -> Result<Option<PathBuf>> {
        if let Some(explicit) = &cli_args.config_path {
            if !explicit.exists() {
                return Err(reportgen_utils::error::ConfigError::NotFound {
                    path: explicit.display().to_string(),
                }
                .into());
            }
            return Ok(Some(explicit.clone()));
        }
        if let Some(home) = home {
            let candidate = home.join("config.toml");
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }
        Self::discover_config_file_from(start_dir)
    }

    /// Apply defaults, the config file at `path` (if any), then env and CLI overrides.
    fn load(path: Option<&Path>, cli_args: &CliArgs) -> Result<Self> {
        let mut attribution = HashMap::new();
        let mut defaults = Defaults::default();
        let mut llm = LlmConfig::default();
        let mut cache = CacheConfig::default();
        let mut streaming = StreamingConfig::default();
        let mut reports = BTreeMap::new();

        for key in [
            "language",
            "module_timeout",
            "max_tokens",
            "verbose",
            "llm_provider",
            "cache_backend",
            "cache_dir",
            "module_ttl_days",
            "task_ttl_hours",
            "heartbeat_interval",
            "stream_timeout",
            "stream_mode",
        ] {
            attribution.insert(key.to_string(), ConfigSource::Defaults);
        }

        if let Some(path) = path {
            let file = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            let src = ConfigSource::ConfigFile(path.to_path_buf());
            let attr = &mut attribution;

            if let Some(d) = file.defaults {
                apply(&mut defaults.language, d.language, "language", &src, attr);
                apply(&mut defaults.module_timeout, d.module_timeout, "module_timeout", &src, attr);
                apply(&mut defaults.max_tokens, d.max_tokens, "max_tokens", &src, attr);
                apply(&mut defaults.verbose, d.verbose, "verbose", &src, attr);
            }

            if let Some(l) = file.llm {
                apply(&mut llm.provider, l.provider, "llm_provider", &src, attr);
                apply(
                    &mut llm.fallback_provider,
                    l.fallback_provider,
                    "llm_fallback_provider",
                    &src,
                    attr,
                );
                apply(&mut llm.anthropic, l.anthropic, "llm_anthropic", &src, attr);
                apply(&mut llm.openrouter, l.openrouter, "llm_openrouter", &src, attr);
            }

            if let Some(c) = file.cache {
                apply(&mut cache.backend, c.backend, "cache_backend", &src, attr);
                apply(&mut cache.dir, c.dir, "cache_dir", &src, attr);
                apply(&mut cache.module_ttl_days, c.module_ttl_days, "module_ttl_days", &src, attr);
                apply(&mut cache.task_ttl_hours, c.task_ttl_hours, "task_ttl_hours", &src, attr);
            }

            if let Some(s) = file.streaming {
                apply(
                    &mut streaming.heartbeat_interval,
                    s.heartbeat_interval,
                    "heartbeat_interval",
                    &src,
                    attr,
                );
                apply(&mut streaming.timeout, s.timeout, "stream_timeout", &src, attr);
                apply(&mut streaming.mode, s.mode, "stream_mode", &src, attr);
            }

            if let Some(file_reports) = file.reports {
                for name in file_reports.keys() {
                    attr.insert(format!("reports.{name}"), src.clone());
                }
                reports = file_reports;
            }
        }

        // Environment overrides the file
        if let Ok(provider) = env::var(PROVIDER_ENV)
            && !provider.is_empty()
        {
            llm.provider = Some(provider);
            attribution.insert("llm_provider".to_string(), ConfigSource::Env);
        }

        // CLI overrides everything
        let cli = ConfigSource::Cli;
        let attr = &mut attribution;
        apply(&mut defaults.language, cli_args.language.clone(), "language", &cli, attr);
        apply(&mut defaults.module_timeout, cli_args.module_timeout, "module_timeout", &cli, attr);
        apply(&mut defaults.max_tokens, cli_args.max_tokens, "max_tokens", &cli, attr);
        apply(&mut defaults.verbose, cli_args.verbose, "verbose", &cli, attr);
        apply(&mut llm.provider, cli_args.llm_provider.clone(), "llm_provider", &cli, attr);
        apply(&mut cache.backend, cli_args.cache_backend.clone(), "cache_backend", &cli, attr);
        apply(&mut cache.dir, cli_args.cache_dir.clone(), "cache_dir", &cli, attr);
        apply(&mut streaming.mode, cli_args.stream_mode.clone(), "stream_mode", &cli, attr);

        if llm.provider.is_none() {
            llm.provider = Some(super::DEFAULT_PROVIDER.to_string());
            attribution.insert("llm_provider".to_string(), ConfigSource::Defaults);
        }

        let config = Self {
            defaults,
            llm,
            cache,
            streaming,
            reports,
            source_attribution: attribution,
        };

        config.validate()?;

        Ok(config)
    }

    /// Discover config file by searching upward from a given directory
    ///
    /// Walks up the directory tree looking for `.reportgen/config.toml`, stopping
    /// at repository root markers (.git, .hg, .svn) or filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(".reportgen").join("config.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load configuration from TOML file
    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: TomlConfig = toml::from_str(&content).map_err(|e| {
            reportgen_utils::error::ConfigError::InvalidFile(format!("{}: {e}", path.display()))
        })?;
        Ok(config)
    }
}
