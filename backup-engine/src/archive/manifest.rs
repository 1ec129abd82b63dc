//! `manifest.json` schema of the multi-database archive.
//!
//! Version 1 is the only schema; field names and casing are part of the
//! on-disk contract.

use crate::utils::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const MANIFEST_VERSION: u32 = 1;

/// Format of one per-database dump inside the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Plain SQL text
    Sql,
    /// `pg_dump -F c`
    Custom,
    /// `mongodump --archive`
    Archive,
    /// SQL Server `.bak`
    Bak,
}

impl DumpFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DumpFormat::Sql => "sql",
            DumpFormat::Custom => "dump",
            DumpFormat::Archive => "archive",
            DumpFormat::Bak => "bak",
        }
    }

    /// Binary formats restore one database per invocation and cannot be rewritten.
    pub fn is_text(&self) -> bool {
        matches!(self, DumpFormat::Sql)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    pub filename: String,
    pub size: u64,
    pub format: DumpFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    pub databases: Vec<DatabaseEntry>,
    pub total_size: u64,
}

impl ArchiveManifest {
    pub fn new(
        source_type: impl Into<String>,
        engine_version: Option<String>,
        databases: Vec<DatabaseEntry>,
    ) -> Self {
        let total_size = databases.iter().map(|d| d.size).sum();
        Self {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            source_type: source_type.into(),
            engine_version,
            databases,
            total_size,
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: ArchiveManifest = serde_json::from_slice(data)
            .map_err(|e| EngineError::format(format!("Invalid archive manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.iter().map(|d| d.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(EngineError::format(format!(
                "Unsupported archive manifest version {}",
                self.version
            )));
        }

        let mut filenames = HashSet::new();
        for entry in &self.databases {
            if entry.filename == super::MANIFEST_NAME || !filenames.insert(entry.filename.as_str()) {
                return Err(EngineError::format(format!(
                    "Duplicate or reserved filename '{}' in archive manifest",
                    entry.filename
                )));
            }
        }

        let sum: u64 = self.databases.iter().map(|d| d.size).sum();
        if sum != self.total_size {
            return Err(EngineError::format(format!(
                "Archive manifest totalSize {} does not match entries ({})",
                self.total_size, sum
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64) -> DatabaseEntry {
        DatabaseEntry {
            name: name.to_string(),
            filename: format!("{}.sql", name),
            size,
            format: DumpFormat::Sql,
        }
    }

    #[test]
    fn test_wire_format() {
        let manifest = ArchiveManifest::new("mysql", Some("8.0.35".into()), vec![entry("shop", 10)]);
        let value: serde_json::Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["sourceType"], "mysql");
        assert_eq!(value["engineVersion"], "8.0.35");
        assert_eq!(value["totalSize"], 10);
        assert_eq!(value["databases"][0]["filename"], "shop.sql");
        assert_eq!(value["databases"][0]["format"], "sql");
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn test_reads_external_manifest() {
        let json = br#"{
            "version": 1,
            "createdAt": "2024-05-01T10:00:00.000Z",
            "sourceType": "postgres",
            "databases": [
                {"name": "a", "filename": "a.dump", "size": 3, "format": "custom"},
                {"name": "b", "filename": "b.dump", "size": 4, "format": "custom"}
            ],
            "totalSize": 7
        }"#;
        let manifest = ArchiveManifest::from_json(json).unwrap();
        assert_eq!(manifest.database_names(), vec!["a", "b"]);
        assert!(manifest.engine_version.is_none());
        assert!(!manifest.databases[0].format.is_text());
    }

    #[test]
    fn test_validate_rejects_bad_manifests() {
        let mut manifest = ArchiveManifest::new("mysql", None, vec![entry("a", 1), entry("a", 2)]);
        assert!(matches!(manifest.validate(), Err(EngineError::Format(_))));

        manifest.databases.pop();
        assert!(manifest.validate().is_err(), "totalSize mismatch");

        manifest.total_size = 1;
        manifest.version = 2;
        assert!(manifest.validate().is_err());
    }
}
