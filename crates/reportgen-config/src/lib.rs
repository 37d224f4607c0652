//! Configuration management for reportgen
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. Configuration files are TOML with
//! `[defaults]`, `[llm]`, `[cache]`, `[streaming]` and `[reports.<type>]` sections.

mod builder;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use discovery::{CliArgs, HOME_ENV, PROVIDER_ENV};
pub use model::*;
