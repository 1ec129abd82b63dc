//! Restores for file-based engines (SQLite, Redis).
//!
//! The live data file is always copied aside under a timestamped name before
//! anything touches it; the copy is kept after a successful restore.

use super::JobContext;
use crate::process::{Input, Output};
use crate::report::ProgressCallback;
use crate::restore::detect::ArtifactKind;
use crate::utils::fs::{copy_aside, replace_file};
use crate::utils::{EngineError, Result};
use std::path::{Path, PathBuf};

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
}

async fn safety_copy(ctx: &JobContext, live: &Path) -> Result<Option<PathBuf>> {
    let path = live.to_path_buf();
    let copy = blocking(move || copy_aside(&path)).await?;
    match &copy {
        Some(copy) => ctx
            .reporter
            .info(format!("Saved current data file as {}", copy.display())),
        None => ctx
            .reporter
            .info(format!("{} does not exist yet; nothing to save", live.display())),
    }
    Ok(copy)
}

async fn put_back(ctx: &JobContext, copy: &Path, live: &Path) {
    let (src, dest) = (copy.to_path_buf(), live.to_path_buf());
    match blocking(move || replace_file(&src, &dest)).await {
        Ok(_) => ctx
            .reporter
            .warning(format!("Restore failed; original data file put back from {}", copy.display())),
        Err(e) => ctx.reporter.error(format!(
            "Restore failed and the original could not be put back ({}); it is preserved at {}",
            e,
            copy.display()
        )),
    }
}

/// Restore a SQLite database from a `.dump` script or a database file.
pub async fn restore_sqlite(
    ctx: &JobContext,
    source: &Path,
    kind: ArtifactKind,
    progress: ProgressCallback,
) -> Result<()> {
    let live = ctx.config.require_path()?.clone();
    let copy = safety_copy(ctx, &live).await?;

    let result = match kind {
        ArtifactKind::SqliteDatabase => {
            let (src, dest) = (source.to_path_buf(), live.clone());
            blocking(move || replace_file(&src, &dest)).await.map(|_| ())
        }
        ArtifactKind::PlainSql => import_script(ctx, source, &live, progress).await,
        other => Err(EngineError::format(format!(
            "{:?} artifact cannot be restored into SQLite",
            other
        ))),
    };

    if result.is_err() {
        match &copy {
            Some(copy) => put_back(ctx, copy, &live).await,
            None => {
                let _ = tokio::fs::remove_file(&live).await;
            }
        }
    }
    result
}

async fn import_script(ctx: &JobContext, source: &Path, live: &Path, progress: ProgressCallback) -> Result<()> {
    // The script recreates every table, so start from an empty file.
    if tokio::fs::try_exists(live).await? {
        tokio::fs::remove_file(live).await?;
    }
    let args = ctx.dialect.restore_args(&ctx.config, None)?;
    let command = ctx.command(ctx.dialect.restore_tool(), args)?;
    ctx.supervisor
        .run(
            command,
            Input::File {
                path: source.to_path_buf(),
                progress: Some(progress),
            },
            Output::Null,
        )
        .await?;
    Ok(())
}

/// Replace the Redis RDB file. The server must be restarted to load it.
pub async fn restore_redis(ctx: &JobContext, source: &Path, kind: ArtifactKind) -> Result<()> {
    if kind != ArtifactKind::RedisRdb {
        return Err(EngineError::format(format!(
            "{:?} artifact cannot be restored into Redis; expected an RDB file",
            kind
        )));
    }
    let live = ctx.config.path.clone().ok_or_else(|| {
        EngineError::config("Redis restore requires `path` to the server's RDB file")
    })?;

    let copy = safety_copy(ctx, &live).await?;
    let (src, dest) = (source.to_path_buf(), live.clone());
    if let Err(e) = blocking(move || replace_file(&src, &dest)).await {
        if let Some(copy) = &copy {
            put_back(ctx, copy, &live).await;
        }
        return Err(e);
    }
    ctx.reporter.warning(format!(
        "Replaced {}; restart Redis with persistence disabled for the load to take effect",
        live.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectRegistry;
    use crate::engine::config::{EngineConfig, EngineKind};
    use crate::engine::EngineSettings;
    use crate::report::{progress::callback, JobHooks, JobReporter};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn context(kind: EngineKind, path: PathBuf, sqlite_tool: &str) -> JobContext {
        let mut config = EngineConfig::new(kind);
        config.path = Some(path);
        let mut settings = EngineSettings::default();
        settings.tools.insert("sqlite3".into(), sqlite_tool.into());
        let registry = DialectRegistry::with_defaults();
        JobContext::new(
            Arc::new(config),
            registry.resolve(kind, None).unwrap(),
            Arc::new(settings),
            JobReporter::new(&JobHooks::new()),
            CancellationToken::new(),
        )
    }

    fn backups(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "bak"))
            .collect()
    }

    #[tokio::test]
    async fn test_sqlite_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("app.db");
        std::fs::write(&live, b"SQLite format 3\0original").unwrap();
        let script = dir.path().join("dump.sql");
        std::fs::write(&script, b"CREATE TABLE broken(;\n").unwrap();

        let ctx = context(EngineKind::Sqlite, live.clone(), "sh -c 'cat >/dev/null; exit 1' --");
        let result = restore_sqlite(&ctx, &script, ArtifactKind::PlainSql, callback(|_| {})).await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&live).unwrap(), b"SQLite format 3\0original");
        assert_eq!(backups(dir.path()).len(), 1, "safety copy is kept");
    }

    #[tokio::test]
    async fn test_sqlite_file_replace_keeps_copy() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("app.db");
        std::fs::write(&live, b"SQLite format 3\0old").unwrap();
        let source = dir.path().join("new.db");
        std::fs::write(&source, b"SQLite format 3\0new").unwrap();

        let ctx = context(EngineKind::Sqlite, live.clone(), "sqlite3");
        restore_sqlite(&ctx, &source, ArtifactKind::SqliteDatabase, callback(|_| {}))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&live).unwrap(), b"SQLite format 3\0new");
        let copies = backups(dir.path());
        assert_eq!(copies.len(), 1);
        assert_eq!(std::fs::read(&copies[0]).unwrap(), b"SQLite format 3\0old");
    }

    #[tokio::test]
    async fn test_redis_rejects_non_rdb() {
        let dir = TempDir::new().unwrap();
        let ctx = context(EngineKind::Redis, dir.path().join("dump.rdb"), "sqlite3");
        let err = restore_redis(&ctx, &dir.path().join("x.sql"), ArtifactKind::PlainSql)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Format(_)));
    }

    #[tokio::test]
    async fn test_redis_replaces_rdb() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("dump.rdb");
        std::fs::write(&live, b"REDIS0011old").unwrap();
        let source = dir.path().join("backup.rdb");
        std::fs::write(&source, b"REDIS0011new").unwrap();

        let ctx = context(EngineKind::Redis, live.clone(), "sqlite3");
        restore_redis(&ctx, &source, ArtifactKind::RedisRdb).await.unwrap();
        assert_eq!(std::fs::read(&live).unwrap(), b"REDIS0011new");
        assert_eq!(backups(dir.path()).len(), 1);
    }
}
