//! Artifact shape detection by magic prefix.

use crate::archive;
use crate::utils::Result;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Shape of a restore source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Multi-database archive with `manifest.json`
    MultiDbArchive,
    /// `pg_dump -F c`
    PostgresCustom,
    /// `mongodump --archive`
    MongoArchive,
    RedisRdb,
    SqliteDatabase,
    /// SQL Server backup set (MTF)
    MssqlBackup,
    /// Anything else is treated as plain SQL text
    PlainSql,
}

impl ArtifactKind {
    pub fn is_plain_text(&self) -> bool {
        matches!(self, ArtifactKind::PlainSql)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::MultiDbArchive => "multi-database archive",
            ArtifactKind::PostgresCustom => "PostgreSQL custom-format dump",
            ArtifactKind::MongoArchive => "MongoDB archive",
            ArtifactKind::RedisRdb => "Redis RDB file",
            ArtifactKind::SqliteDatabase => "SQLite database file",
            ArtifactKind::MssqlBackup => "SQL Server backup",
            ArtifactKind::PlainSql => "plain SQL dump",
        }
    }
}

const PGDMP: &[u8] = b"PGDMP";
const MONGO_ARCHIVE: &[u8] = &[0x6d, 0xe2, 0x99, 0x81];
const REDIS: &[u8] = b"REDIS";
const SQLITE: &[u8] = b"SQLite format 3\0";
const MTF_TAPE: &[u8] = b"TAPE";

/// Classify a single-file header. Archive detection needs the whole file
/// and is handled by [`detect`].
pub fn classify_prefix(prefix: &[u8]) -> ArtifactKind {
    if prefix.starts_with(PGDMP) {
        ArtifactKind::PostgresCustom
    } else if prefix.starts_with(MONGO_ARCHIVE) {
        ArtifactKind::MongoArchive
    } else if prefix.starts_with(REDIS) {
        ArtifactKind::RedisRdb
    } else if prefix.starts_with(SQLITE) {
        ArtifactKind::SqliteDatabase
    } else if prefix.starts_with(MTF_TAPE) {
        ArtifactKind::MssqlBackup
    } else {
        ArtifactKind::PlainSql
    }
}

pub async fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

pub async fn detect(path: &Path) -> Result<ArtifactKind> {
    if archive::is_multi_db_tar(path).await? {
        return Ok(ArtifactKind::MultiDbArchive);
    }
    Ok(classify_prefix(&read_prefix(path, 16).await?))
}
