//! CLI argument definitions and parsing structures

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// reportgen - asynchronous multi-module report generation
#[derive(Parser, Debug)]
#[command(name = "reportgen")]
#[command(about = "Generate multi-module reports with fingerprint caching, polling and live streaming")]
#[command(long_about = r#"
reportgen builds reports out of independently generated modules. Identical
requests share one task, modules run concurrently and fail independently,
failed modules can be retried alone, and finished modules are cached.

EXAMPLES:
  # Create a report and wait for generation to finish
  reportgen create --user u1 --type personal-profile --input chart.json --wait

  # Poll status and content
  reportgen status --user u1 --type personal-profile --input chart.json
  reportgen content --user u1 --type personal-profile --input chart.json

  # Retry only the failed modules
  reportgen retry --user u1 --type personal-profile --input chart.json --wait

  # Stream events as JSON lines, persisting each module before it is emitted
  cat chart.json | reportgen stream --user u1 --type personal-profile --mode lite

  # List report types
  reportgen types

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > env > config file > defaults
  The config file is --config, else $REPORTGEN_HOME/config.toml, else the nearest
  .reportgen/config.toml above the working directory
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Default report language
    #[arg(long, global = true)]
    pub language: Option<String>,

    /// Timeout in seconds for each generation call
    #[arg(long, global = true)]
    pub module_timeout: Option<u64>,

    /// Maximum tokens per generated module
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    /// LLM provider: anthropic or openrouter
    #[arg(long, global = true)]
    pub llm_provider: Option<String>,

    /// Cache backend: file or memory
    #[arg(long, global = true)]
    pub cache_backend: Option<String>,

    /// Directory for the file cache backend
    #[arg(long, global = true)]
    pub cache_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Identifies a report: the task key is derived from these values
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// User the report belongs to
    #[arg(long)]
    pub user: String,

    /// Report type (see `reportgen types`)
    #[arg(long = "type", value_name = "TYPE")]
    pub report_type: String,

    /// JSON input file, or `-` for stdin
    #[arg(long, default_value = "-")]
    pub input: String,

    /// Report language for this request (defaults to the configured language)
    #[arg(long = "lang")]
    pub lang: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a report task, or return the existing one for identical input
    Create {
        #[command(flatten)]
        request: RequestArgs,

        /// Wait for background generation to finish and print the final status
        #[arg(long)]
        wait: bool,
    },

    /// Show task status
    Status {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show completed module content
    Content {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Regenerate only the failed modules of a failed task
    Retry {
        #[command(flatten)]
        request: RequestArgs,

        /// Wait for the retry to finish and print the final status
        #[arg(long)]
        wait: bool,
    },

    /// Delete the task record
    Delete {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Stream generation events as JSON lines
    Stream {
        #[command(flatten)]
        request: RequestArgs,

        /// standard or lite (lite persists each module before emitting it)
        #[arg(long)]
        mode: Option<String>,
    },

    /// List report types and their modules
    Types,

    /// Show effective configuration with value sources
    Config,
}

impl Commands {
    /// Operation name for error reporting
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Status { .. } => "status",
            Self::Content { .. } => "content",
            Self::Retry { .. } => "retry",
            Self::Delete { .. } => "delete",
            Self::Stream { .. } => "stream",
            Self::Types => "types",
            Self::Config => "config",
        }
    }
}
