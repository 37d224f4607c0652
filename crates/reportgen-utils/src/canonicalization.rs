use anyhow::{Context, Result};
use blake3::Hasher;
use serde::Serialize;

use crate::error::ReportError;

/// Emit a value as JCS-canonical JSON (RFC 8785).
///
/// This is the standard way to emit JSON for CLI output, stream events and any
/// other JSON contract. JCS ensures deterministic output regardless of field
/// ordering in the source struct or map.
///
/// # Example
///
/// ```rust
/// use reportgen_utils::canonicalization::emit_jcs;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct MyOutput {
///     value: i32,
///     name: String,
/// }
///
/// let output = MyOutput { value: 42, name: "test".into() };
/// let json = emit_jcs(&output).expect("serialization should succeed");
/// assert_eq!(json, r#"{"name":"test","value":42}"#);
/// ```
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "Failed to serialize value to JSON")?;
    let json_bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "Failed to canonicalize JSON using JCS")?;
    String::from_utf8(json_bytes).with_context(|| "JCS output contained invalid UTF-8")
}

pub const FINGERPRINT_VERSION: &str = "summary-v1";
pub const CANONICALIZATION_BACKEND: &str = "jcs-rfc8785";

/// Length of the hex prefix used for task identifiers
const TASK_ID_HEX_LEN: usize = 32;

/// Deterministic digest of canonicalized context summaries.
///
/// Summaries are serialized to JSON, canonicalized with JCS (object keys sorted,
/// numbers normalized) and hashed with BLAKE3, so two structurally equal summaries
/// hash identically regardless of the key order they were built with.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Get the fingerprint scheme version string
    #[must_use]
    pub const fn version(&self) -> &'static str {
        FINGERPRINT_VERSION
    }

    /// Get the canonicalization backend identifier
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        CANONICALIZATION_BACKEND
    }

    /// Hash a summary into a 64-character lowercase hex fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if the value cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn hash<T: Serialize + ?Sized>(&self, summary: &T) -> Result<String, ReportError> {
        let bytes = canonical_bytes(summary)?;
        let mut hasher = Hasher::new();
        hasher.update(&bytes);
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Derive the task identifier for a (user, report type, fingerprint, language) key.
    ///
    /// The identifier is itself content-addressed so that any process sharing the
    /// store resolves the same key to the same task record.
    pub fn task_id(
        &self,
        user_id: &str,
        report_type: &str,
        fingerprint: &str,
        language: &str,
    ) -> Result<String, ReportError> {
        let key = serde_json::json!({
            "fingerprint": fingerprint,
            "language": language,
            "reportType": report_type,
            "user": user_id,
        });
        let digest = self.hash(&key)?;
        Ok(format!("task_{}", &digest[..TASK_ID_HEX_LEN]))
    }
}

fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ReportError> {
    let json_value = serde_json::to_value(value)
        .map_err(|e| ReportError::Serialization(format!("summary is not serializable: {e}")))?;
    serde_json_canonicalizer::to_vec(&json_value)
        .map_err(|e| ReportError::Serialization(format!("JCS canonicalization failed: {e}")))
}
