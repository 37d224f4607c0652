use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Library-level error type with rich context and user-friendly reporting.
///
/// `ReportError` is the top-level error returned by reportgen operations that can
/// reject a request outright (task creation, key resolution, configuration).
/// Per-module generation failures are never surfaced through this type; they are
/// recorded on the task and delivered as data.
///
/// # Error Categories
///
/// | Category | Description |
/// |----------|-------------|
/// | `InvalidReportType` / `InvalidInput` | Rejected before any task exists |
/// | `Serialization` | Fingerprinting or record encoding failed |
/// | `Store` | Backing key/value store failed |
/// | `Llm` | Provider construction or invocation failed |
/// | `Config` | Configuration file or CLI argument errors |
///
/// # Exit Code Mapping
///
/// Use [`to_exit_code()`](Self::to_exit_code) to map errors to CLI exit codes.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Unknown report type '{report_type}'")]
    InvalidReportType { report_type: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get actionable suggestions for resolving the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Generation,
    Storage,
    ResourceLimits,
    Serialization,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Input => write!(f, "Input"),
            Self::Generation => write!(f, "Generation"),
            Self::Storage => write!(f, "Storage"),
            Self::ResourceLimits => write!(f, "Resource Limits"),
            Self::Serialization => write!(f, "Serialization"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration validation failed: {error_count} errors")]
    ValidationFailed {
        errors: Vec<String>,
        error_count: usize,
    },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(msg) => format!("Configuration file is invalid: {msg}"),
            Self::MissingRequired(key) => format!("Required setting '{key}' is missing"),
            Self::InvalidValue { key, value } => {
                format!("Setting '{key}' has an invalid value: {value}")
            }
            Self::NotFound { path } => format!("No configuration file at {path}"),
            Self::ValidationFailed { errors, .. } => {
                format!("Configuration validation failed:\n  - {}", errors.join("\n  - "))
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Configuration is read from --config, $REPORTGEN_HOME/config.toml or the nearest .reportgen/config.toml."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => vec![
                "Check the path passed to --config".to_string(),
                "Omit --config to fall back to discovery and built-in defaults".to_string(),
            ],
            _ => vec![
                "Review the TOML syntax and value types in your config file".to_string(),
                "Run with --verbose to see where each setting came from".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Errors raised by key/value store backends
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UserFriendlyError for StoreError {
    fn user_message(&self) -> String {
        match self {
            Self::Unavailable(msg) => format!("The content store is unavailable: {msg}"),
            Self::Serialization(msg) => format!("A stored record could not be read: {msg}"),
            Self::Io(err) => format!("The content store hit an IO error: {err}"),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Cached module content and task records live in the configured store.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            "Check that [cache] dir exists and is writable".to_string(),
            "Set [cache] backend = \"memory\" to run without persistence".to_string(),
        ]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Errors that can occur during LLM backend operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed response)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl LlmError {
    /// Whether a later caller-initiated retry has a reasonable chance to succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ProviderQuota(_)
                | Self::ProviderUnavailable(_)
                | Self::Timeout { .. }
        )
    }
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("LLM transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("LLM provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("LLM provider quota exceeded: {msg}"),
            Self::ProviderUnavailable(msg) => format!("LLM provider unavailable: {msg}"),
            Self::Timeout { duration } => {
                format!("LLM invocation timed out after {:?}", duration)
            }
            Self::BudgetExceeded { limit, attempted } => {
                format!(
                    "LLM budget exceeded: attempted {} calls, limit is {}",
                    attempted, limit
                )
            }
            Self::Misconfiguration(msg) => format!("LLM configuration error: {msg}"),
            Self::Unsupported(msg) => format!("LLM feature not supported: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) => {
                Some("Transport errors occur when the LLM provider cannot be reached.".to_string())
            }
            Self::ProviderAuth(_) => Some(
                "Authentication errors indicate missing or invalid API keys.".to_string(),
            ),
            Self::ProviderQuota(_) => Some(
                "Quota errors occur when rate limits or usage limits are exceeded.".to_string(),
            ),
            Self::ProviderUnavailable(_) => {
                Some("Provider outages are temporary service disruptions.".to_string())
            }
            Self::Timeout { .. } => Some(
                "Timeouts occur when a module takes longer than [defaults] module_timeout."
                    .to_string(),
            ),
            Self::BudgetExceeded { .. } => {
                Some("Budget limits prevent excessive LLM API calls and costs.".to_string())
            }
            Self::Misconfiguration(_) | Self::Unsupported(_) => Some(
                "Provider settings are read from the [llm] section of the config file."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::ProviderAuth(_) => vec![
                "Check that the API key environment variable is set".to_string(),
                "Verify the API key is valid and not expired".to_string(),
            ],
            Self::ProviderQuota(_) | Self::ProviderUnavailable(_) | Self::Transport(_) => vec![
                "Wait a few minutes and retry the failed modules".to_string(),
                "Configure a fallback_provider in [llm]".to_string(),
            ],
            Self::Timeout { .. } => vec![
                "Increase [defaults] module_timeout".to_string(),
                "Retry the failed modules".to_string(),
            ],
            Self::BudgetExceeded { .. } => vec![
                "Raise [llm.openrouter] budget or REPORTGEN_OPENROUTER_BUDGET".to_string(),
            ],
            Self::Misconfiguration(_) | Self::Unsupported(_) => vec![
                "Check the [llm] provider configuration".to_string(),
                "Supported providers: anthropic, openrouter".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ProviderAuth(_) | Self::Misconfiguration(_) | Self::Unsupported(_) => {
                ErrorCategory::Configuration
            }
            Self::ProviderQuota(_) | Self::BudgetExceeded { .. } => ErrorCategory::ResourceLimits,
            Self::Transport(_) | Self::ProviderUnavailable(_) | Self::Timeout { .. } => {
                ErrorCategory::Generation
            }
        }
    }
}

impl UserFriendlyError for ReportError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidReportType { report_type } => {
                format!("'{report_type}' is not a known report type")
            }
            Self::InvalidInput(msg) => format!("The report input was rejected: {msg}"),
            Self::Serialization(msg) => format!("The report input could not be fingerprinted: {msg}"),
            Self::Store(err) => err.user_message(),
            Self::Llm(err) => err.user_message(),
            Self::Config(err) => err.user_message(),
            Self::TaskNotFound { task_id } => format!("No report task {task_id}"),
            Self::Io(err) => format!("IO error: {err}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidReportType { .. } => {
                Some("Report types are defined by the built-in registry and [reports.*] config.".to_string())
            }
            Self::InvalidInput(_) | Self::Serialization(_) => {
                Some("No task was created for this request.".to_string())
            }
            Self::Store(err) => err.context(),
            Self::Llm(err) => err.context(),
            Self::Config(err) => err.context(),
            Self::TaskNotFound { .. } | Self::Io(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidReportType { .. } => {
                vec!["Run 'reportgen types' to list the available report types".to_string()]
            }
            Self::InvalidInput(_) | Self::Serialization(_) => {
                vec!["Pass a JSON object as the report input".to_string()]
            }
            Self::Store(err) => err.suggestions(),
            Self::Llm(err) => err.suggestions(),
            Self::Config(err) => err.suggestions(),
            Self::TaskNotFound { .. } => {
                vec!["Create the report first with 'reportgen create'".to_string()]
            }
            Self::Io(_) => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidReportType { .. } | Self::InvalidInput(_) | Self::TaskNotFound { .. } => {
                ErrorCategory::Input
            }
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Store(err) => err.category(),
            Self::Llm(err) => err.category(),
            Self::Config(err) => err.category(),
            Self::Io(_) => ErrorCategory::Storage,
        }
    }
}

impl ReportError {
    /// Render the error for terminal output with context and suggestions
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut out = format!("Error [{}]: {}", self.category(), self.user_message());
        if let Some(context) = self.context() {
            out.push_str("\n\n");
            out.push_str(&context);
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n\nSuggestions:");
            for suggestion in suggestions {
                out.push_str("\n  - ");
                out.push_str(&suggestion);
            }
        }
        out
    }

    /// Map this error to a process exit code
    #[must_use]
    pub fn to_exit_code(&self) -> crate::exit_codes::ExitCode {
        crate::exit_codes::ExitCode::from(self)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_report_type_message_names_the_type() {
        let err = ReportError::InvalidReportType {
            report_type: "horoscope".to_string(),
        };
        assert!(err.to_string().contains("horoscope"));
        assert_eq!(err.category(), ErrorCategory::Input);
    }

    #[test]
    fn test_display_for_user_includes_suggestions() {
        let err = ReportError::InvalidReportType {
            report_type: "nope".to_string(),
        };
        let rendered = err.display_for_user();
        assert!(rendered.starts_with("Error [Input]"));
        assert!(rendered.contains("reportgen types"));
    }

    #[test]
    fn test_store_error_wraps_into_report_error() {
        let err: ReportError = StoreError::Unavailable("redis down".to_string()).into();
        assert!(matches!(err, ReportError::Store(_)));
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_llm_error_transience() {
        assert!(LlmError::ProviderUnavailable("503".to_string()).is_transient());
        assert!(
            LlmError::Timeout {
                duration: Duration::from_secs(5)
            }
            .is_transient()
        );
        assert!(!LlmError::ProviderAuth("401".to_string()).is_transient());
        assert!(!LlmError::Misconfiguration("x".to_string()).is_transient());
    }

    #[test]
    fn test_serde_json_error_becomes_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let report_err: ReportError = err.into();
        assert!(matches!(report_err, ReportError::Serialization(_)));
    }
}
