//! SQL Server backup and restore through a shared backup directory.
//!
//! The server reads and writes `.bak` files under `backup_path`; this
//! process sees the same directory at `local_backup_path`. Staged files are
//! removed on every exit path.

use super::JobContext;
use crate::dialect::mssql::{
    filelist_statement, local_backup_file, server_backup_file, server_backup_name,
    server_restore_file, MssqlDialect,
};
use crate::dialect::Dialect;
use crate::process::{Input, Output};
use crate::utils::{EngineError, Result};
use std::path::Path;
use tracing::warn;

/// Run `BACKUP DATABASE` and copy the resulting `.bak` to `out`.
pub async fn dump_database(ctx: &JobContext, database: &str, out: &Path) -> Result<()> {
    let file_name = server_backup_name(database);
    let remote = server_backup_file(&ctx.config, &file_name)?;
    let local = local_backup_file(&ctx.config, &file_name)?;
    let args = MssqlDialect.backup_args(&ctx.config, database, &remote)?;
    let command = ctx.command(ctx.dialect.dump_tool(), args)?;

    let result = async {
        ctx.supervisor.run(command, Input::Null, Output::Null).await?;
        if !tokio::fs::try_exists(&local).await? {
            return Err(EngineError::config(format!(
                "Server wrote the backup but {} is not visible locally; check `local_backup_path`",
                local.display()
            )));
        }
        let bytes = tokio::fs::copy(&local, out).await?;
        ctx.reporter
            .info(format!("Copied {} ({} bytes) from the backup directory", file_name, bytes));
        Ok(())
    }
    .await;

    remove_staged(&local).await;
    result
}

/// Restore a `.bak` into `target`, relocating data files under `data_path`
/// when configured.
pub async fn restore_backup(ctx: &JobContext, source: &Path, target: &str) -> Result<()> {
    let staging = server_restore_file(target);
    let local = local_backup_file(&ctx.config, &staging)?;
    let remote = server_backup_file(&ctx.config, &staging)?;

    let result = async {
        tokio::fs::copy(source, &local).await?;
        ctx.reporter
            .info(format!("Staged backup as {} for the server", remote));

        let moves = match ctx.config.data_path.as_deref().filter(|p| !p.is_empty()) {
            Some(data_path) => {
                let rows = ctx.query(&filelist_statement(&remote)).await?;
                relocations(&rows, data_path, target)
            }
            None => Vec::new(),
        };

        let args = MssqlDialect.restore_backup_args(&ctx.config, target, &remote, &moves)?;
        let command = ctx.command(ctx.dialect.restore_tool(), args)?;
        ctx.supervisor.run(command, Input::Null, Output::Null).await?;
        Ok(())
    }
    .await;

    remove_staged(&local).await;
    result
}

/// Map `RESTORE FILELISTONLY` rows (`LogicalName|PhysicalName|Type|...`) to
/// new physical paths named after `target`.
fn relocations(rows: &[String], data_path: &str, target: &str) -> Vec<(String, String)> {
    let sep = if data_path.contains('\\') { '\\' } else { '/' };
    let dir = data_path.trim_end_matches(['/', '\\']);
    let mut data_files = 0;
    let mut log_files = 0;

    rows.iter()
        .filter_map(|row| {
            let mut cols = row.split('|').map(str::trim);
            let logical = cols.next().filter(|c| !c.is_empty())?;
            let _physical = cols.next()?;
            let kind = cols.next()?;
            let file = match kind {
                "L" => {
                    log_files += 1;
                    if log_files == 1 {
                        format!("{}_log.ldf", target)
                    } else {
                        format!("{}_log{}.ldf", target, log_files)
                    }
                }
                "D" => {
                    data_files += 1;
                    if data_files == 1 {
                        format!("{}.mdf", target)
                    } else {
                        format!("{}_{}.ndf", target, data_files)
                    }
                }
                _ => return None,
            };
            Some((logical.to_string(), format!("{}{}{}", dir, sep, file)))
        })
        .collect()
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove staged backup {}: {}", path.display(), e),
    }
}
