//! Database name mapping for selective and renamed restores.

use crate::engine::config::DatabaseMappingEntry;
use crate::utils::{EngineError, Result};
use std::collections::HashMap;

/// Longest database name accepted as a restore target.
pub const MAX_DATABASE_NAME_LEN: usize = 128;

/// What happens to one database found in a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Restore { target: String },
    Skip,
}

/// Resolved mapping keyed by original name.
///
/// Without a mapping list every database is restored under its own name.
/// With one, databases absent from the list are skipped.
#[derive(Debug, Clone, Default)]
pub struct DatabaseMapping {
    entries: Option<HashMap<String, DatabaseMappingEntry>>,
    order: Vec<String>,
}

impl DatabaseMapping {
    /// Restore everything unchanged.
    pub fn restore_all() -> Self {
        Self::default()
    }

    pub fn new(entries: Option<&[DatabaseMappingEntry]>) -> Result<Self> {
        let Some(entries) = entries else {
            return Ok(Self::restore_all());
        };

        let mut map = HashMap::with_capacity(entries.len());
        let mut order = Vec::with_capacity(entries.len());
        for entry in entries {
            if map.insert(entry.original_name.clone(), entry.clone()).is_some() {
                return Err(EngineError::config(format!(
                    "Duplicate mapping entry for database '{}'",
                    entry.original_name
                )));
            }
            order.push(entry.original_name.clone());
        }
        Ok(Self {
            entries: Some(map),
            order,
        })
    }

    pub fn is_restore_all(&self) -> bool {
        self.entries.is_none()
    }

    pub fn resolve(&self, original: &str) -> Disposition {
        let Some(entries) = &self.entries else {
            return Disposition::Restore {
                target: original.to_string(),
            };
        };
        match entries.get(original) {
            Some(entry) if entry.selected => Disposition::Restore {
                target: if entry.target_name.trim().is_empty() {
                    original.to_string()
                } else {
                    entry.target_name.trim().to_string()
                },
            },
            _ => Disposition::Skip,
        }
    }

    pub fn target_for(&self, original: &str) -> Option<String> {
        match self.resolve(original) {
            Disposition::Restore { target } => Some(target),
            Disposition::Skip => None,
        }
    }

    /// Selected `(original, target)` pairs in mapping order.
    pub fn selected(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|original| self.target_for(original).map(|t| (original.clone(), t)))
            .collect()
    }

    /// Whether any selected entry renames its database.
    pub fn renames(&self) -> bool {
        self.selected().iter().any(|(original, target)| original != target)
    }
}

/// Allow-list check applied before a name reaches any constructed statement.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_DATABASE_NAME_LEN {
        return Err(EngineError::config(format!(
            "Invalid database name '{}': must be 1-{} characters",
            name, MAX_DATABASE_NAME_LEN
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$')))
    {
        return Err(EngineError::config(format!(
            "Invalid database name '{}': character '{}' is not allowed",
            name, bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(original: &str, target: &str, selected: bool) -> DatabaseMappingEntry {
        DatabaseMappingEntry {
            original_name: original.to_string(),
            target_name: target.to_string(),
            selected,
        }
    }

    #[test]
    fn test_no_mapping_restores_everything() {
        let mapping = DatabaseMapping::new(None).unwrap();
        assert!(mapping.is_restore_all());
        assert_eq!(mapping.target_for("anything"), Some("anything".to_string()));
        assert!(!mapping.renames());
    }

    #[test]
    fn test_mapping_selects_renames_and_skips() {
        let entries = vec![entry("a", "a2", true), entry("b", "b", false), entry("c", "", true)];
        let mapping = DatabaseMapping::new(Some(&entries)).unwrap();

        assert_eq!(mapping.resolve("a"), Disposition::Restore { target: "a2".into() });
        assert_eq!(mapping.resolve("b"), Disposition::Skip);
        assert_eq!(mapping.resolve("c"), Disposition::Restore { target: "c".into() });
        assert_eq!(mapping.resolve("unlisted"), Disposition::Skip);
        assert_eq!(
            mapping.selected(),
            vec![("a".to_string(), "a2".to_string()), ("c".to_string(), "c".to_string())]
        );
        assert!(mapping.renames());
    }

    #[test]
    fn test_duplicate_original_rejected() {
        let entries = vec![entry("a", "x", true), entry("a", "y", true)];
        assert!(matches!(DatabaseMapping::new(Some(&entries)), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_validate_database_name() {
        assert!(validate_database_name("shop_2024-copy$1").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name("a`; DROP DATABASE x; --").is_err());
        assert!(validate_database_name("x'y").is_err());
        assert!(validate_database_name(&"a".repeat(129)).is_err());
    }
}
