//! Context summarization
//!
//! Turns raw request input into the canonical summary that is fingerprinted and
//! handed to every module prompt. Domain logic that reduces raw data lives behind
//! [`ContextSummarizer`]; the engine only relies on the output being a JSON value
//! that is deterministic for equivalent input.

use async_trait::async_trait;
use reportgen_utils::error::ReportError;
use serde_json::Value;

#[async_trait]
pub trait ContextSummarizer: Send + Sync {
    /// Produce the canonical summary for a report type.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidInput` when the input cannot be summarized.
    async fn summarize(&self, report_type: &str, input: &Value) -> Result<Value, ReportError>;
}

/// Uses the input object itself as the summary
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSummarizer;

#[async_trait]
impl ContextSummarizer for PassthroughSummarizer {
    async fn summarize(&self, report_type: &str, input: &Value) -> Result<Value, ReportError> {
        match input {
            Value::Object(map) if !map.is_empty() => Ok(input.clone()),
            Value::Object(_) => Err(ReportError::InvalidInput(format!(
                "input for '{report_type}' must not be empty"
            ))),
            other => Err(ReportError::InvalidInput(format!(
                "input for '{report_type}' must be a JSON object, got {}",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
