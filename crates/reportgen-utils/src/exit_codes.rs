//! Exit code constants and error mapping for reportgen.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `INVALID_INPUT` | Unknown report type or malformed input |
//! | 4 | `NOT_FOUND` | No task exists for the requested key |
//! | 5 | `STORE_FAILURE` | Backing store failed |
//! | 70 | `PROVIDER_FAILURE` | Text-generation provider failed |

use crate::error::ReportError;

/// Exit codes matching the documented exit code table.
///
/// The numeric values are part of the public API and will not change in 1.x releases.
///
/// ```rust
/// use reportgen_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::from_i32(3), ExitCode::INVALID_INPUT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure not covered by other codes
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments or configuration
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Input rejected before any task was created
    pub const INVALID_INPUT: ExitCode = ExitCode(3);

    /// No task exists for the requested key
    pub const NOT_FOUND: ExitCode = ExitCode(4);

    /// Backing store failed
    pub const STORE_FAILURE: ExitCode = ExitCode(5);

    /// Text-generation provider failed
    pub const PROVIDER_FAILURE: ExitCode = ExitCode(70);

    /// Create an exit code from a raw integer value
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    /// Get the numeric exit code value
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<&ReportError> for ExitCode {
    fn from(err: &ReportError) -> Self {
        match err {
            ReportError::InvalidReportType { .. }
            | ReportError::InvalidInput(_)
            | ReportError::Serialization(_) => ExitCode::INVALID_INPUT,
            ReportError::TaskNotFound { .. } => ExitCode::NOT_FOUND,
            ReportError::Store(_) => ExitCode::STORE_FAILURE,
            ReportError::Llm(_) => ExitCode::PROVIDER_FAILURE,
            ReportError::Config(_) => ExitCode::CLI_ARGS,
            ReportError::Io(_) => ExitCode::INTERNAL,
        }
    }
}
