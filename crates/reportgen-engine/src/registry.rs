//! Report type registry
//!
//! Static mapping from report type to its ordered module list, per-module
//! metadata and estimated duration. Built-in types can be extended or overridden
//! from `[reports.<type>]` configuration tables.

use reportgen_config::{ModuleEntry, ReportTypeEntry};
use reportgen_utils::error::ReportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_MODULE_SECONDS: u32 = 30;

/// Display metadata for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMeta {
    pub id: String,
    pub label: String,
    pub estimated_seconds: u32,
}

impl ModuleMeta {
    #[must_use]
    pub fn new(id: &str, label: &str, estimated_seconds: u32) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            estimated_seconds,
        }
    }
}

impl From<&ModuleEntry> for ModuleMeta {
    fn from(entry: &ModuleEntry) -> Self {
        Self {
            id: entry.id.clone(),
            label: entry.label.clone().unwrap_or_else(|| entry.id.clone()),
            estimated_seconds: entry.estimated_seconds.unwrap_or(DEFAULT_MODULE_SECONDS),
        }
    }
}

/// Read-only definition of a report type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTypeConfig {
    pub report_type: String,
    pub title: String,
    /// Ordered module list
    pub modules: Vec<ModuleMeta>,
    pub estimated_minutes: u32,
}

impl ReportTypeConfig {
    #[must_use]
    pub fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id.clone()).collect()
    }

    #[must_use]
    pub fn module(&self, module_id: &str) -> Option<&ModuleMeta> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    fn from_entry(report_type: &str, entry: &ReportTypeEntry) -> Self {
        let modules: Vec<ModuleMeta> = entry.modules.iter().map(ModuleMeta::from).collect();
        let estimated_minutes = entry.estimated_minutes.unwrap_or_else(|| {
            let total: u32 = modules.iter().map(|m| m.estimated_seconds).sum();
            // Modules run concurrently; the slowest dominates
            let slowest = modules.iter().map(|m| m.estimated_seconds).max().unwrap_or(0);
            (slowest.max(total / 4)).div_ceil(60).max(1)
        });
        Self {
            report_type: report_type.to_string(),
            title: entry.title.clone().unwrap_or_else(|| report_type.to_string()),
            modules,
            estimated_minutes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportRegistry {
    types: BTreeMap<String, ReportTypeConfig>,
}

impl Default for ReportRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ReportRegistry {
    /// Registry with no report types
    #[must_use]
    pub fn empty() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Registry with the built-in report types
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.insert(ReportTypeConfig {
            report_type: "personal-profile".to_string(),
            title: "Personal Profile".to_string(),
            modules: vec![
                ModuleMeta::new("overview", "Overview", 40),
                ModuleMeta::new("personality", "Personality", 60),
                ModuleMeta::new("career", "Career & Vocation", 60),
                ModuleMeta::new("relationships", "Relationships", 60),
                ModuleMeta::new("growth", "Growth & Challenges", 50),
            ],
            estimated_minutes: 3,
        });
        registry.insert(ReportTypeConfig {
            report_type: "compatibility".to_string(),
            title: "Compatibility".to_string(),
            modules: vec![
                ModuleMeta::new("summary", "Summary", 40),
                ModuleMeta::new("communication", "Communication", 50),
                ModuleMeta::new("emotional-bond", "Emotional Bond", 50),
                ModuleMeta::new("challenges", "Challenges", 50),
            ],
            estimated_minutes: 2,
        });
        registry.insert(ReportTypeConfig {
            report_type: "annual-forecast".to_string(),
            title: "Annual Forecast".to_string(),
            modules: vec![
                ModuleMeta::new("overview", "Year Overview", 45),
                ModuleMeta::new("q1", "First Quarter", 60),
                ModuleMeta::new("q2", "Second Quarter", 60),
                ModuleMeta::new("q3", "Third Quarter", 60),
                ModuleMeta::new("q4", "Fourth Quarter", 60),
                ModuleMeta::new("advice", "Guidance", 45),
            ],
            estimated_minutes: 4,
        });
        registry
    }

    /// Add or replace report types from `[reports.<type>]` tables
    #[must_use]
    pub fn with_overrides(mut self, entries: &BTreeMap<String, ReportTypeEntry>) -> Self {
        for (report_type, entry) in entries {
            self.insert(ReportTypeConfig::from_entry(report_type, entry));
        }
        self
    }

    pub fn insert(&mut self, config: ReportTypeConfig) {
        self.types.insert(config.report_type.clone(), config);
    }

    /// Look up a report type.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidReportType` for unknown types.
    pub fn get(&self, report_type: &str) -> Result<&ReportTypeConfig, ReportError> {
        self.types
            .get(report_type)
            .ok_or_else(|| ReportError::InvalidReportType {
                report_type: report_type.to_string(),
            })
    }

    /// All report types, sorted by name
    pub fn list(&self) -> impl Iterator<Item = &ReportTypeConfig> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types_are_well_formed() {
        let registry = ReportRegistry::builtin();
        let names: Vec<_> = registry.list().map(|c| c.report_type.as_str()).collect();
        assert_eq!(names, ["annual-forecast", "compatibility", "personal-profile"]);

        for config in registry.list() {
            let mut ids = config.module_ids();
            assert!(!ids.is_empty());
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), config.modules.len(), "{}", config.report_type);
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = ReportRegistry::builtin().get("horoscope").unwrap_err();
        assert!(matches!(err, ReportError::InvalidReportType { report_type } if report_type == "horoscope"));
    }

    #[test]
    fn test_overrides_add_and_replace() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "compatibility".to_string(),
            ReportTypeEntry {
                title: Some("Short Compatibility".to_string()),
                estimated_minutes: Some(1),
                modules: vec![ModuleEntry {
                    id: "summary".to_string(),
                    label: None,
                    estimated_seconds: None,
                }],
            },
        );
        entries.insert(
            "custom".to_string(),
            ReportTypeEntry {
                title: None,
                estimated_minutes: None,
                modules: vec![ModuleEntry {
                    id: "intro".to_string(),
                    label: Some("Introduction".to_string()),
                    estimated_seconds: Some(90),
                }],
            },
        );

        let registry = ReportRegistry::builtin().with_overrides(&entries);

        let compat = registry.get("compatibility").unwrap();
        assert_eq!(compat.title, "Short Compatibility");
        assert_eq!(compat.module_ids(), ["summary"]);
        assert_eq!(compat.modules[0].label, "summary");

        let custom = registry.get("custom").unwrap();
        assert_eq!(custom.title, "custom");
        assert_eq!(custom.estimated_minutes, 2);
        assert_eq!(custom.module("intro").unwrap().label, "Introduction");
    }
}
