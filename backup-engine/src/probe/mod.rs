//! Connection test, version discovery and database listing.

use crate::engine::config::EngineKind;
use crate::engine::JobContext;
use crate::utils::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)*").expect("version pattern"));

/// Outcome of a connection test; failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ConnectionTestResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            version: None,
        }
    }
}

/// Leading numeric version token, vendor suffixes stripped.
///
/// Redis `INFO server` output is searched for `redis_version:` first.
pub fn normalize_version(raw: &str) -> Option<String> {
    let text = raw
        .lines()
        .find_map(|l| l.trim().strip_prefix("redis_version:"))
        .unwrap_or(raw);
    VERSION_TOKEN.find(text).map(|m| m.as_str().to_string())
}

pub async fn detect_version(ctx: &JobContext) -> Result<String> {
    let lines = ctx.query(ctx.dialect.version_query()).await?;
    let raw = lines.join("\n");
    normalize_version(&raw)
        .ok_or_else(|| EngineError::format(format!("Unrecognised version output: {}", raw.trim())))
}

pub async fn test_connection(ctx: &JobContext) -> ConnectionTestResult {
    if ctx.config.kind == EngineKind::Sqlite {
        match ctx.config.require_path() {
            Ok(path) if !path.exists() => {
                return ConnectionTestResult::failed(format!(
                    "Database file not found: {}",
                    path.display()
                ))
            }
            Err(e) => return ConnectionTestResult::failed(e.to_string()),
            Ok(_) => {}
        }
    }

    if let Err(e) = ctx.query(ctx.dialect.liveness_query()).await {
        let detail = e.stderr().filter(|s| !s.is_empty()).unwrap_or_default();
        let message = if detail.is_empty() {
            e.to_string()
        } else {
            format!("{} ({})", e, detail)
        };
        return ConnectionTestResult::failed(message);
    }

    match detect_version(ctx).await {
        Ok(version) => ConnectionTestResult {
            success: true,
            message: format!("Connected to {} {}", ctx.config.kind, version),
            version: Some(version),
        },
        Err(e) => ConnectionTestResult {
            success: true,
            message: format!("Connected to {} (version unknown: {})", ctx.config.kind, e),
            version: None,
        },
    }
}

/// User databases, system databases excluded.
pub async fn list_databases(ctx: &JobContext) -> Result<Vec<String>> {
    let kind = ctx.config.kind;
    match kind {
        EngineKind::Sqlite => {
            let path = ctx.config.require_path()?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "main".to_string());
            return Ok(vec![name]);
        }
        EngineKind::Redis => {
            let lines = ctx.query(ctx.dialect.list_databases_query()).await?;
            return Ok(parse_redis_keyspace(&lines));
        }
        _ => {}
    }

    let system = kind.system_databases();
    let lines = ctx.query(ctx.dialect.list_databases_query()).await?;
    Ok(lines
        .into_iter()
        .map(|l| l.split('|').next().unwrap_or_default().trim().to_string())
        .filter(|name| !name.is_empty() && !system.contains(&name.as_str()))
        .collect())
}

/// `db0:keys=12,expires=0,avg_ttl=0` lines to `db0`.
fn parse_redis_keyspace(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.split_once(':'))
        .map(|(db, _)| db.trim())
        .filter(|db| db.starts_with("db") && db[2..].chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
        .collect()
}
