//! Restore pipeline.
//!
//! The artifact shape is detected first. Archives are unpacked into a
//! private temp directory and restored database by database in manifest
//! order; single files go straight to the engine's restore path. Plain SQL
//! is streamed line by line through [`rewrite::SqlRewriter`] into the client
//! tool, so selection and renames never load the dump into memory.

pub mod analyze;
pub mod detect;
pub mod mapping;
pub mod prepare;
pub mod rewrite;

use crate::archive::{self, DumpFormat};
use crate::dialect::mongodb::MongoDialect;
use crate::dialect::postgres::PostgresDialect;
use crate::dump::dump_format;
use crate::engine::config::{DatabaseMappingEntry, EngineConfig, EngineKind};
use crate::engine::{files, mssql, Engine, JobContext};
use crate::process::{ExitPolicy, Input, Output, ToolCommand};
use crate::report::{format_bytes, BackupResult, JobHooks, JobReporter, ProgressCallback, ProgressReader};
use crate::utils::fs::create_job_temp_dir;
use crate::utils::{EngineError, Result};
use chrono::Utc;
use detect::ArtifactKind;
use mapping::{validate_database_name, DatabaseMapping, Disposition};
use rewrite::{rewrite_stream, RewriteStats, SqlFamily, SqlRewriter};
use serde_json::json;
use std::path::Path;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

const PIPE_CAPACITY: usize = 64 * 1024;

struct RestoreOutcome {
    size: u64,
    kind: ArtifactKind,
    restored: Vec<(String, String)>,
    partial: bool,
    version: Option<String>,
    dialect: &'static str,
}

/// Restore `source` into the configured server.
///
/// Never returns an error: failures are reported through the result.
pub async fn run(engine: &Engine, config: &EngineConfig, source: &Path, hooks: JobHooks) -> BackupResult {
    let started_at = Utc::now();
    let reporter = JobReporter::new(&hooks);
    let span = info_span!("restore", job_id = %reporter.job_id(), engine = %config.kind);

    let outcome = execute(engine, config, source, &reporter, hooks.cancel.clone())
        .instrument(span)
        .await;

    match outcome {
        Ok(done) => {
            if done.partial {
                reporter.warning("Restore completed with ignored errors");
            } else {
                reporter.success(format!("Restore of {} completed", source.display()));
            }
            let databases: Vec<_> = done
                .restored
                .iter()
                .map(|(original, target)| json!({ "originalName": original, "targetName": target }))
                .collect();
            let metadata = json!({
                "artifact": done.kind.label(),
                "databases": databases,
                "partial": done.partial,
                "engineVersion": done.version,
                "dialect": done.dialect,
            });
            BackupResult::succeeded(
                &reporter,
                started_at,
                Some(source.display().to_string()),
                Some(done.size),
                Some(metadata),
            )
        }
        Err(e) => {
            reporter.error(format!("Restore failed: {}", e));
            BackupResult::failed(&reporter, started_at, e.to_string())
        }
    }
}

async fn execute(
    engine: &Engine,
    config: &EngineConfig,
    source: &Path,
    reporter: &JobReporter,
    cancel: CancellationToken,
) -> Result<RestoreOutcome> {
    config.validate()?;
    let mapping = DatabaseMapping::new(config.mapping.as_deref())?;
    for (_, target) in mapping.selected() {
        validate_database_name(&target)?;
    }

    let size = match tokio::fs::metadata(source).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::config(format!(
                "Restore source not found: {}",
                source.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };
    if size == 0 {
        return Err(EngineError::Integrity(format!(
            "Restore source {} is empty",
            source.display()
        )));
    }

    let kind = detect::detect(source).await?;
    reporter.info(format!("Detected {} ({})", kind.label(), format_bytes(size)));

    let ctx = engine.context(config, reporter, cancel).await?;
    let mut job = RestoreJob {
        ctx: &ctx,
        mapping,
        restored: Vec::new(),
        partial: false,
    };
    match kind {
        ArtifactKind::MultiDbArchive => job.restore_archive(source).await?,
        _ => job.restore_single(source, kind).await?,
    }
    reporter.progress(100);

    Ok(RestoreOutcome {
        size,
        kind,
        restored: job.restored,
        partial: job.partial,
        version: ctx.version.clone(),
        dialect: ctx.dialect.name(),
    })
}

/// Archives dumped from MySQL restore into MariaDB and back.
fn engine_family(id: &str) -> &str {
    match id {
        "mysql" | "mariadb" => "mysql",
        other => other,
    }
}

fn check_source_type(source_type: &str, kind: EngineKind) -> Result<()> {
    if engine_family(source_type) == engine_family(kind.id()) {
        return Ok(());
    }
    Err(EngineError::format(format!(
        "Archive was created from {} and cannot be restored into {}",
        source_type, kind
    )))
}

struct RestoreJob<'a> {
    ctx: &'a JobContext,
    mapping: DatabaseMapping,
    /// `(original, target)` pairs that received data
    restored: Vec<(String, String)>,
    partial: bool,
}

impl RestoreJob<'_> {
    async fn restore_archive(&mut self, source: &Path) -> Result<()> {
        let ctx = self.ctx;
        let temp = create_job_temp_dir(&ctx.settings.temp_dir, "restore")?;
        let manifest = archive::unpack(source, temp.path()).await?;
        check_source_type(&manifest.source_type, ctx.config.kind)?;

        let names = manifest.database_names();
        ctx.reporter.info(format!(
            "Archive holds {} databases: {}",
            names.len(),
            names.join(", ")
        ));
        for (original, _) in self.mapping.selected() {
            if !names.contains(&original) {
                ctx.reporter
                    .warning(format!("Mapped database {} is not in the archive", original));
            }
        }

        let mut plan = Vec::new();
        for entry in &manifest.databases {
            match self.mapping.resolve(&entry.name) {
                Disposition::Restore { target } => {
                    validate_database_name(&target)?;
                    plan.push((entry, target));
                }
                Disposition::Skip => ctx.reporter.info(format!("Skipping database {}", entry.name)),
            }
        }
        if plan.is_empty() {
            return Err(EngineError::config("No database in the archive is selected for restore"));
        }

        for (i, (entry, target)) in plan.iter().enumerate() {
            ctx.check_cancelled()?;
            if entry.name == *target {
                ctx.reporter.info(format!("Restoring database {}", entry.name));
            } else {
                ctx.reporter
                    .info(format!("Restoring database {} as {}", entry.name, target));
            }
            prepare::ensure_databases(ctx, std::slice::from_ref(target)).await?;

            let path = temp.path().join(&entry.filename);
            let progress = ctx.reporter.step_progress(i, plan.len());
            self.restore_entry(&path, entry.format, &entry.name, target, progress)
                .await?;
            self.restored.push((entry.name.clone(), target.clone()));
        }

        if let Err(e) = temp.close() {
            warn!("Failed to remove restore temp dir: {}", e);
        }
        Ok(())
    }

    /// Restore one unpacked archive entry into `target`.
    async fn restore_entry(
        &mut self,
        path: &Path,
        format: DumpFormat,
        original: &str,
        target: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        let ctx = self.ctx;
        let kind = ctx.config.kind;
        let compatible = if format.is_text() {
            SqlFamily::for_engine(kind).is_some()
        } else {
            dump_format(kind) == Some(format)
        };
        if !compatible {
            return Err(EngineError::format(format!(
                "Archive entry {} has format {:?}, which {} cannot restore",
                original, format, kind
            )));
        }

        match format {
            DumpFormat::Sql => {
                let entry = DatabaseMappingEntry {
                    original_name: original.to_string(),
                    target_name: target.to_string(),
                    selected: true,
                };
                let mapping = DatabaseMapping::new(Some(std::slice::from_ref(&entry)))?;
                let prepared = [target.to_string()];
                let stats = self
                    .restore_script(path, mapping, Some(target), &prepared, progress)
                    .await?;
                log_stats(ctx, &stats);
            }
            DumpFormat::Custom => self.pg_restore(path, target, progress).await?,
            DumpFormat::Archive => {
                self.mongorestore(path, Some((original, target)), progress).await?
            }
            DumpFormat::Bak => mssql::restore_backup(ctx, path, target).await?,
        }
        Ok(())
    }

    async fn restore_single(&mut self, source: &Path, kind: ArtifactKind) -> Result<()> {
        let ctx = self.ctx;
        let engine = ctx.config.kind;
        let progress = ctx.reporter.step_progress(0, 1);

        match (engine, kind) {
            (EngineKind::Sqlite, _) => files::restore_sqlite(ctx, source, kind, progress).await,
            (EngineKind::Redis, _) => files::restore_redis(ctx, source, kind).await,
            (EngineKind::MySql | EngineKind::MariaDb | EngineKind::Postgres, k) if k.is_plain_text() => {
                self.restore_plain(source, progress).await
            }
            (EngineKind::Postgres, ArtifactKind::PostgresCustom) => {
                let target = self.single_target(kind)?;
                prepare::ensure_databases(ctx, std::slice::from_ref(&target)).await?;
                self.pg_restore(source, &target, progress).await?;
                let original = self.original_for(&target);
                self.restored.push((original, target));
                Ok(())
            }
            (EngineKind::MongoDb, ArtifactKind::MongoArchive) => self.restore_mongo(source).await,
            (EngineKind::Mssql, ArtifactKind::MssqlBackup) => {
                let target = self.single_target(kind)?;
                prepare::ensure_databases(ctx, std::slice::from_ref(&target)).await?;
                mssql::restore_backup(ctx, source, &target).await?;
                let original = self.original_for(&target);
                self.restored.push((original, target));
                Ok(())
            }
            (engine, kind) => Err(EngineError::format(format!(
                "A {} cannot be restored into {}",
                kind.label(),
                engine
            ))),
        }
    }

    /// Plain SQL dump holding any number of databases.
    async fn restore_plain(&mut self, source: &Path, progress: ProgressCallback) -> Result<()> {
        let ctx = self.ctx;
        let targets: Vec<String> = if self.mapping.is_restore_all() {
            ctx.config.databases.clone()
        } else {
            let selected: Vec<String> = self.mapping.selected().into_iter().map(|(_, t)| t).collect();
            if selected.is_empty() {
                return Err(EngineError::config("No database is selected for restore"));
            }
            selected
        };
        prepare::ensure_databases(ctx, &targets).await?;

        // Dumps without switch statements land in the only target.
        let default_db = match targets.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };
        let stats = self
            .restore_script(source, self.mapping.clone(), default_db, &targets, progress)
            .await?;
        log_stats(ctx, &stats);

        for name in &stats.databases {
            if let Some(target) = self.mapping.target_for(name) {
                self.restored.push((name.clone(), target));
            }
        }
        Ok(())
    }

    /// Stream a SQL script through the rewriter into the client tool.
    ///
    /// `prepared` targets already exist. psql stops on the script's own
    /// `CREATE DATABASE` for them, so those lines are dropped.
    async fn restore_script(
        &self,
        source: &Path,
        mapping: DatabaseMapping,
        default_db: Option<&str>,
        prepared: &[String],
        progress: ProgressCallback,
    ) -> Result<RewriteStats> {
        let ctx = self.ctx;
        let family = SqlFamily::for_engine(ctx.config.kind).ok_or_else(|| {
            EngineError::format(format!("{} does not restore SQL scripts", ctx.config.kind))
        })?;
        let args = match family {
            SqlFamily::Postgres => PostgresDialect::base()
                .script_args(&ctx.config, default_db.unwrap_or("postgres"))?,
            SqlFamily::MySql => ctx.dialect.restore_args(&ctx.config, default_db)?,
        };
        let mut rewriter = SqlRewriter::new(family, mapping);
        if family == SqlFamily::Postgres {
            rewriter = rewriter.with_prepared(prepared.iter().cloned());
        }
        let command = ctx.command(ctx.dialect.client_tool(), args)?;
        feed_rewritten(ctx, command, source, rewriter, progress).await
    }

    async fn pg_restore(&mut self, source: &Path, target: &str, progress: ProgressCallback) -> Result<()> {
        let ctx = self.ctx;
        let args = ctx.dialect.restore_args(&ctx.config, Some(target))?;
        let command = ctx
            .command(ctx.dialect.restore_tool(), args)?
            .exit_policy(ExitPolicy::AllowIgnoredErrors);
        let output = ctx
            .supervisor
            .run(
                command,
                Input::File {
                    path: source.to_path_buf(),
                    progress: Some(progress),
                },
                Output::Null,
            )
            .await?;
        self.partial |= output.partial;
        Ok(())
    }

    async fn restore_mongo(&mut self, source: &Path) -> Result<()> {
        if self.mapping.is_restore_all() {
            let progress = self.ctx.reporter.step_progress(0, 1);
            return self.mongorestore(source, None, progress).await;
        }

        let selected = self.mapping.selected();
        if selected.is_empty() {
            return Err(EngineError::config("No database is selected for restore"));
        }
        for (i, (original, target)) in selected.iter().enumerate() {
            self.ctx.check_cancelled()?;
            let progress = self.ctx.reporter.step_progress(i, selected.len());
            self.mongorestore(source, Some((original.as_str(), target.as_str())), progress)
                .await?;
            self.restored.push((original.clone(), target.clone()));
        }
        Ok(())
    }

    /// One `mongorestore` pass, limited to one database when `namespace` is set.
    async fn mongorestore(
        &self,
        source: &Path,
        namespace: Option<(&str, &str)>,
        progress: ProgressCallback,
    ) -> Result<()> {
        let ctx = self.ctx;
        let mut args = ctx.dialect.restore_args(&ctx.config, None)?;
        if let Some((original, target)) = namespace {
            args.extend(MongoDialect::namespace_args(original, target));
        }
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

    /// Target of a single-database binary restore.
    fn single_target(&self, kind: ArtifactKind) -> Result<String> {
        if !self.mapping.is_restore_all() {
            let selected = self.mapping.selected();
            return match selected.as_slice() {
                [(_, target)] => Ok(target.clone()),
                [] => Err(EngineError::config("No database is selected for restore")),
                many => Err(EngineError::format(format!(
                    "A {} holds one database and cannot be mapped to {} targets; \
                     use a multi-database archive for selective restores",
                    kind.label(),
                    many.len()
                ))),
            };
        }
        match self.ctx.config.databases.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(EngineError::config(format!(
                "A {} restores into exactly one database; set `databases` or a mapping",
                kind.label()
            ))),
            many => Err(EngineError::format(format!(
                "A {} holds one database and cannot be restored into {} databases",
                kind.label(),
                many.len()
            ))),
        }
    }

    fn original_for(&self, target: &str) -> String {
        self.mapping
            .selected()
            .into_iter()
            .find(|(_, t)| t == target)
            .map(|(original, _)| original)
            .unwrap_or_else(|| target.to_string())
    }
}

fn log_stats(ctx: &JobContext, stats: &RewriteStats) {
    debug!(
        lines_in = stats.lines_in,
        lines_out = stats.lines_out,
        skipped = stats.lines_skipped,
        renamed = stats.renamed,
        "Rewrite finished"
    );
    if stats.lines_skipped > 0 || stats.renamed > 0 {
        ctx.reporter.info(format!(
            "Streamed {} lines ({} skipped, {} database references renamed)",
            stats.lines_out, stats.lines_skipped, stats.renamed
        ));
    }
}

fn is_broken_pipe(e: &EngineError) -> bool {
    matches!(e, EngineError::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe)
}

/// Run `command` with `source` piped through `rewriter` on its stdin.
///
/// A rewrite failure kills the tool before it sees end of input, so a
/// truncated script is never committed as if it were complete.
async fn feed_rewritten(
    ctx: &JobContext,
    command: ToolCommand,
    source: &Path,
    mut rewriter: SqlRewriter,
    progress: ProgressCallback,
) -> Result<RewriteStats> {
    let total = tokio::fs::metadata(source).await?.len();
    let file = tokio::fs::File::open(source).await?;
    let reader = BufReader::with_capacity(PIPE_CAPACITY, ProgressReader::new(file, total, progress));

    let (mut writer, pipe) = tokio::io::duplex(PIPE_CAPACITY);
    let tool_cancel = ctx.cancel_token().child_token();
    let supervisor = ctx.supervisor.with_cancel(tool_cancel.clone());

    let rewrite = async {
        let result = rewrite_stream(&mut rewriter, reader, &mut writer).await;
        if let Err(e) = &result {
            // A broken pipe means the tool already exited; its status says why.
            if !is_broken_pipe(e) {
                tool_cancel.cancel();
            }
        }
        drop(writer);
        result
    };
    let tool = supervisor.run(command, Input::Reader(Box::new(pipe)), Output::Null);

    let (rewritten, ran) = tokio::join!(rewrite, tool);
    match (rewritten, ran) {
        (_, Err(EngineError::Cancelled)) if ctx.cancel_token().is_cancelled() => Err(EngineError::Cancelled),
        (Err(e), Err(EngineError::Cancelled)) => Err(e),
        (_, Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Ok(_)) => Ok(rewriter.into_stats()),
    }
}
