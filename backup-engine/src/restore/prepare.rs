//! Target preparation: create restore targets that do not exist yet.

use super::mapping::validate_database_name;
use crate::dialect::mssql::{quote_ident, quote_string};
use crate::engine::config::EngineKind;
use crate::engine::JobContext;
use crate::utils::Result;
use tracing::debug;

/// Ensure every database in `names` exists, creating missing ones with the
/// privileged credentials when configured.
///
/// Every name is checked against the allow-list before any statement is
/// built, so a crafted name fails the whole call up front.
pub async fn ensure_databases(ctx: &JobContext, names: &[String]) -> Result<()> {
    for name in names {
        validate_database_name(name)?;
    }

    let kind = ctx.config.kind;
    if kind.is_file_based() || kind == EngineKind::MongoDb {
        debug!(engine = %kind, "No target preparation needed");
        if kind == EngineKind::MongoDb && !names.is_empty() {
            ctx.reporter
                .info("MongoDB creates databases on first write; nothing to prepare");
        }
        return Ok(());
    }

    let admin = ctx.config.privileged();
    for name in names {
        ctx.check_cancelled()?;
        match kind {
            EngineKind::MySql | EngineKind::MariaDb => {
                ctx.query_as(&admin, &format!("CREATE DATABASE IF NOT EXISTS `{}`", name))
                    .await?;
            }
            EngineKind::Postgres => {
                let existing = ctx
                    .query_as(
                        &admin,
                        &format!("SELECT 1 FROM pg_database WHERE datname = '{}'", name),
                    )
                    .await?;
                if !existing.is_empty() {
                    debug!(database = %name, "Database already exists");
                    continue;
                }
                ctx.query_as(&admin, &format!("CREATE DATABASE \"{}\"", name))
                    .await?;
            }
            EngineKind::Mssql => {
                ctx.query_as(
                    &admin,
                    &format!(
                        "IF DB_ID({}) IS NULL CREATE DATABASE {}",
                        quote_string(name),
                        quote_ident(name)
                    ),
                )
                .await?;
            }
            EngineKind::MongoDb | EngineKind::Sqlite | EngineKind::Redis => {}
        }
        ctx.reporter.info(format!("Target database {} is ready", name));
    }
    Ok(())
}
