pub mod atomic_write;
pub mod cache;
pub mod canonicalization;
pub mod error;
pub mod exit_codes;
pub mod logging;

pub use cache::{CacheStats, ContentCache, FileStore, KvStore, MemoryStore};
pub use canonicalization::Fingerprinter;
pub use error::{ConfigError, LlmError, ReportError, StoreError, UserFriendlyError};
