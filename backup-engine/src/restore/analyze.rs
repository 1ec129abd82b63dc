//! Best-effort discovery of the databases inside an existing artifact.

use super::detect::{detect, ArtifactKind};
use super::rewrite::{find_reference, SqlFamily, StatementKind};
use crate::archive;
use crate::utils::Result;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Database names found in `path`, first-seen order, no duplicates.
///
/// Archives answer from their manifest; plain SQL is scanned for switch and
/// create statements. Opaque binary dumps yield an empty list.
pub async fn analyze_dump(path: &Path) -> Result<Vec<String>> {
    match detect(path).await? {
        ArtifactKind::MultiDbArchive => Ok(archive::read_manifest(path).await?.database_names()),
        ArtifactKind::PlainSql => scan_sql(path).await,
        _ => Ok(Vec::new()),
    }
}

async fn scan_sql(path: &Path) -> Result<Vec<String>> {
    let mut reader = BufReader::new(tokio::fs::File::open(path).await?);
    let mut line = Vec::new();
    let mut names: Vec<String> = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let reference = find_reference(SqlFamily::MySql, &line)
            .or_else(|| find_reference(SqlFamily::Postgres, &line));
        if let Some(reference) = reference {
            if reference.kind != StatementKind::Alter && !names.contains(&reference.name) {
                names.push(reference.name);
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{pack, DumpFormat, PackSource};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_plain_mysql_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("all.sql");
        std::fs::write(
            &path,
            "-- Current Database: `shop`\n\
             CREATE DATABASE /*!32312 IF NOT EXISTS*/ `shop` /*!40100 DEFAULT CHARACTER SET utf8mb4 */;\n\
             USE `shop`;\n\
             INSERT INTO t VALUES ('USE `fake`');\n\
             -- Current Database: `billing`\n\
             USE `billing`;\n",
        )
        .unwrap();

        assert_eq!(analyze_dump(&path).await.unwrap(), vec!["shop", "billing"]);
    }

    #[tokio::test]
    async fn test_plain_postgres_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("all.sql");
        std::fs::write(
            &path,
            "CREATE DATABASE analytics WITH TEMPLATE = template0;\n\
             ALTER DATABASE analytics OWNER TO app;\n\
             \\connect analytics\n\
             CREATE DATABASE \"Reports\";\n",
        )
        .unwrap();

        assert_eq!(analyze_dump(&path).await.unwrap(), vec!["analytics", "Reports"]);
    }

    #[tokio::test]
    async fn test_archive_and_binary() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.archive");
        std::fs::write(&a, [0x6d, 0xe2, 0x99, 0x81, 0, 0]).unwrap();
        assert!(analyze_dump(&a).await.unwrap().is_empty());

        let tar = dir.path().join("all.tar");
        let sources = ["users", "orders"]
            .iter()
            .map(|name| PackSource {
                name: name.to_string(),
                path: a.clone(),
                format: DumpFormat::Archive,
            })
            .collect();
        pack(sources, &tar, "mongodb", None).await.unwrap();
        assert_eq!(analyze_dump(&tar).await.unwrap(), vec!["users", "orders"]);
    }
}
