//! Line-oriented rewriting of plain SQL dumps for selective restores.
//!
//! The rewriter recognises three statement shapes: switching the active
//! database, creating a database and (outside skip mode) altering one. A
//! reference to an unselected database suppresses that line and every line
//! after it until the next switch or create naming a selected database.
//! References to renamed databases are rewritten in place.
//!
//! This is pattern matching on lines, not SQL parsing. Lines are handled as
//! bytes so binary-ish dump content passes through untouched.

use super::mapping::{DatabaseMapping, Disposition};
use crate::engine::config::EngineKind;
use crate::utils::{EngineError, Result};
use regex::bytes::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Plain-SQL dialect family a dump was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFamily {
    MySql,
    Postgres,
}

impl SqlFamily {
    pub fn for_engine(engine: EngineKind) -> Option<Self> {
        match engine {
            EngineKind::MySql | EngineKind::MariaDb => Some(SqlFamily::MySql),
            EngineKind::Postgres => Some(SqlFamily::Postgres),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Switch,
    Create,
    Alter,
}

/// A database reference found on one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseReference {
    pub kind: StatementKind,
    pub name: String,
    /// Byte span of the identifier (including any quotes) to replace
    span: Range<usize>,
    quoting: Quoting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quoting {
    Backtick,
    DoubleQuote,
    /// `dbname='...'` inside a psql connection string
    ConnString,
}

const MYSQL_IDENT: &str = r"`((?:[^`]|``)+)`";

static MYSQL_CURRENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^-- Current Database: {}", MYSQL_IDENT)).expect("mysql comment pattern")
});
static MYSQL_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*USE\s+{}", MYSQL_IDENT)).expect("mysql use pattern")
});
static MYSQL_CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*CREATE\s+(?:DATABASE|SCHEMA)\s+(?:/\*!\d+\s+IF\s+NOT\s+EXISTS\s*\*/\s*|IF\s+NOT\s+EXISTS\s+)?{}",
        MYSQL_IDENT
    ))
    .expect("mysql create pattern")
});
static MYSQL_ALTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*(?:/\*!\d+\s*)?ALTER\s+(?:DATABASE|SCHEMA)\s+{}",
        MYSQL_IDENT
    ))
    .expect("mysql alter pattern")
});

const PG_IDENT: &str = r#"("(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*)"#;

static PG_CONNECT_CONNSTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\\(?:connect|c)\s+(?:-reuse-previous=\S+\s+)?"dbname='((?:[^'\\]|\\.)+)'""#)
        .expect("psql connstr pattern")
});
static PG_CONNECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\\(?:connect|c)\s+(?:-reuse-previous=\S+\s+)?{}", PG_IDENT))
        .expect("psql connect pattern")
});
static PG_CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*CREATE\s+DATABASE\s+{}", PG_IDENT)).expect("pg create pattern")
});
static PG_ALTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*ALTER\s+DATABASE\s+{}", PG_IDENT)).expect("pg alter pattern")
});

fn capture(re: &Regex, line: &[u8]) -> Option<(String, Range<usize>)> {
    let caps = re.captures(line)?;
    let m = caps.get(1)?;
    Some((String::from_utf8_lossy(m.as_bytes()).into_owned(), m.range()))
}

/// Find the database referenced by a switch, create or alter statement.
pub fn find_reference(family: SqlFamily, line: &[u8]) -> Option<DatabaseReference> {
    match family {
        SqlFamily::MySql => {
            let checks = [
                (&*MYSQL_CURRENT, StatementKind::Switch),
                (&*MYSQL_USE, StatementKind::Switch),
                (&*MYSQL_CREATE, StatementKind::Create),
                (&*MYSQL_ALTER, StatementKind::Alter),
            ];
            checks.into_iter().find_map(|(re, kind)| {
                let (raw, inner) = capture(re, line)?;
                Some(DatabaseReference {
                    kind,
                    name: raw.replace("``", "`"),
                    span: inner.start - 1..inner.end + 1,
                    quoting: Quoting::Backtick,
                })
            })
        }
        SqlFamily::Postgres => {
            if let Some((raw, span)) = capture(&PG_CONNECT_CONNSTR, line) {
                return Some(DatabaseReference {
                    kind: StatementKind::Switch,
                    name: unescape_connstr(&raw),
                    span,
                    quoting: Quoting::ConnString,
                });
            }
            let checks = [
                (&*PG_CONNECT, StatementKind::Switch),
                (&*PG_CREATE, StatementKind::Create),
                (&*PG_ALTER, StatementKind::Alter),
            ];
            checks.into_iter().find_map(|(re, kind)| {
                let (raw, span) = capture(re, line)?;
                let quoted = raw
                    .strip_prefix('"')
                    .and_then(|r| r.strip_suffix('"'))
                    .map(|q| q.replace("\"\"", "\""));
                let name = match quoted {
                    Some(name) => name,
                    // psql takes \connect arguments literally; SQL folds case.
                    None if kind == StatementKind::Switch => raw,
                    None => raw.to_lowercase(),
                };
                Some(DatabaseReference {
                    kind,
                    name,
                    span,
                    quoting: Quoting::DoubleQuote,
                })
            })
        }
    }
}

fn unescape_connstr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn quote(target: &str, quoting: Quoting) -> String {
    match quoting {
        Quoting::Backtick => format!("`{}`", target.replace('`', "``")),
        Quoting::DoubleQuote => format!("\"{}\"", target.replace('"', "\"\"")),
        Quoting::ConnString => target.replace('\\', "\\\\").replace('\'', "\\'"),
    }
}

/// Counters for one rewrite pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub lines_in: u64,
    pub lines_out: u64,
    pub lines_skipped: u64,
    pub renamed: u64,
    /// Databases referenced, first-seen order
    pub databases: Vec<String>,
}

/// Streaming state machine threaded through every line of a dump.
#[derive(Debug)]
pub struct SqlRewriter {
    family: SqlFamily,
    mapping: DatabaseMapping,
    current_db: Option<String>,
    skipping: bool,
    /// Targets that already exist; their CREATE DATABASE lines are dropped
    prepared: HashSet<String>,
    stats: RewriteStats,
}

impl SqlRewriter {
    pub fn new(family: SqlFamily, mapping: DatabaseMapping) -> Self {
        Self {
            family,
            mapping,
            current_db: None,
            skipping: false,
            prepared: HashSet::new(),
            stats: RewriteStats::default(),
        }
    }

    /// Drop `CREATE DATABASE` for these targets, for clients that fail on
    /// creating a database that exists.
    pub fn with_prepared<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.prepared.extend(targets);
        self
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    pub fn is_skipping(&self) -> bool {
        self.skipping
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    /// Process one line (including its terminator). `None` drops the line.
    pub fn rewrite_line<'a>(&mut self, line: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        self.stats.lines_in += 1;
        let out = self.decide(line);
        match &out {
            Some(_) => self.stats.lines_out += 1,
            None => self.stats.lines_skipped += 1,
        }
        out
    }

    fn decide<'a>(&mut self, line: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        let Some(reference) = find_reference(self.family, line) else {
            return (!self.skipping).then_some(Cow::Borrowed(line));
        };

        if reference.kind == StatementKind::Alter && self.skipping {
            return None;
        }
        if !self.stats.databases.contains(&reference.name) {
            self.stats.databases.push(reference.name.clone());
        }

        match self.mapping.resolve(&reference.name) {
            Disposition::Skip => {
                if reference.kind != StatementKind::Alter {
                    self.skipping = true;
                    self.current_db = Some(reference.name);
                }
                None
            }
            Disposition::Restore { target } => {
                if reference.kind != StatementKind::Alter {
                    self.skipping = false;
                    self.current_db = Some(reference.name.clone());
                }
                if reference.kind == StatementKind::Create && self.prepared.contains(&target) {
                    return None;
                }
                if target == reference.name {
                    return Some(Cow::Borrowed(line));
                }
                self.stats.renamed += 1;
                let mut rewritten = Vec::with_capacity(line.len() + target.len());
                rewritten.extend_from_slice(&line[..reference.span.start]);
                rewritten.extend_from_slice(quote(&target, reference.quoting).as_bytes());
                rewritten.extend_from_slice(&line[reference.span.end..]);
                Some(Cow::Owned(rewritten))
            }
        }
    }

    pub fn into_stats(self) -> RewriteStats {
        self.stats
    }
}

/// Pump `reader` through `rewriter` into `writer`, line by line.
///
/// The writer is shut down at the end so a downstream process sees EOF.
pub async fn rewrite_stream<R, W>(rewriter: &mut SqlRewriter, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(64 * 1024);
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if let Some(out) = rewriter.rewrite_line(&line) {
            writer.write_all(&out).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::BrokenPipe => {
                    EngineError::Io(std::io::Error::new(e.kind(), "restore tool stopped reading"))
                }
                _ => EngineError::Io(e),
            })?;
        }
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::DatabaseMappingEntry;

    const MYSQL_DUMP: &str = "\
-- MySQL dump 10.13
/*!40101 SET NAMES utf8mb4 */;

--
-- Current Database: `a`
--

CREATE DATABASE /*!32312 IF NOT EXISTS*/ `a` /*!40100 DEFAULT CHARACTER SET utf8mb4 */;

USE `a`;
CREATE TABLE `items` (`id` int);
INSERT INTO `items` VALUES (1),(2);

--
-- Current Database: `b`
--

CREATE DATABASE /*!32312 IF NOT EXISTS*/ `b` /*!40100 DEFAULT CHARACTER SET utf8mb4 */;

USE `b`;
CREATE TABLE `secrets_of_b` (`id` int);
INSERT INTO `secrets_of_b` VALUES (42);
/*!50003 ALTER DATABASE `b` CHARACTER SET latin1 */;
";

    fn mapping(entries: &[(&str, &str, bool)]) -> DatabaseMapping {
        let entries: Vec<DatabaseMappingEntry> = entries
            .iter()
            .map(|(o, t, s)| DatabaseMappingEntry {
                original_name: o.to_string(),
                target_name: t.to_string(),
                selected: *s,
            })
            .collect();
        DatabaseMapping::new(Some(&entries)).unwrap()
    }

    async fn run(family: SqlFamily, mapping: DatabaseMapping, input: &str) -> (String, RewriteStats) {
        let mut rewriter = SqlRewriter::new(family, mapping);
        let mut out = Vec::new();
        rewrite_stream(&mut rewriter, input.as_bytes(), &mut out).await.unwrap();
        (String::from_utf8(out).unwrap(), rewriter.into_stats())
    }

    #[tokio::test]
    async fn test_rename_and_skip() {
        let (out, stats) = run(
            SqlFamily::MySql,
            mapping(&[("a", "a2", true), ("b", "b", false)]),
            MYSQL_DUMP,
        )
        .await;

        assert!(out.contains("CREATE DATABASE /*!32312 IF NOT EXISTS*/ `a2` /*!40100"));
        assert!(out.contains("USE `a2`;"));
        assert!(out.contains("-- Current Database: `a2`"));
        assert!(out.contains("INSERT INTO `items` VALUES (1),(2);"));
        assert!(out.starts_with("-- MySQL dump 10.13\n"));

        assert!(!out.contains("`b`"));
        assert!(!out.contains("secrets_of_b"));
        assert!(!out.contains("42"));
        assert!(!out.contains("`a`"));

        assert_eq!(stats.databases, vec!["a", "b"]);
        assert_eq!(stats.renamed, 3);
        assert_eq!(stats.lines_in, stats.lines_out + stats.lines_skipped);
    }

    #[tokio::test]
    async fn test_restore_all_passes_through() {
        let (out, stats) = run(SqlFamily::MySql, DatabaseMapping::restore_all(), MYSQL_DUMP).await;
        assert_eq!(out, MYSQL_DUMP);
        assert_eq!(stats.lines_skipped, 0);
    }

    #[tokio::test]
    async fn test_unmapped_database_is_skipped_until_selected_switch() {
        let dump = "USE `x`;\nINSERT INTO t VALUES (1);\nUSE `a`;\nINSERT INTO t VALUES (2);\n";
        let (out, _) = run(SqlFamily::MySql, mapping(&[("a", "a", true)]), dump).await;
        assert_eq!(out, "USE `a`;\nINSERT INTO t VALUES (2);\n");
    }

    #[test]
    fn test_alter_only_evaluated_outside_skip_mode() {
        let mut rewriter = SqlRewriter::new(SqlFamily::MySql, mapping(&[("a", "a2", true)]));
        assert!(rewriter.rewrite_line(b"USE `a`;\n").is_some());

        let out = rewriter.rewrite_line(b"ALTER DATABASE `a` CHARACTER SET utf8;\n").unwrap();
        assert_eq!(&*out, b"ALTER DATABASE `a2` CHARACTER SET utf8;\n");

        // An ALTER naming an unselected database drops only that line.
        assert!(rewriter.rewrite_line(b"ALTER DATABASE `zzz` CHARACTER SET utf8;\n").is_none());
        assert!(!rewriter.is_skipping());
        assert_eq!(rewriter.current_database(), Some("a"));

        assert!(rewriter.rewrite_line(b"USE `zzz`;\n").is_none());
        assert!(rewriter.is_skipping());
        assert!(rewriter.rewrite_line(b"ALTER DATABASE `a` CHARACTER SET utf8;\n").is_none());
    }

    #[test]
    fn test_backtick_escaping() {
        let mut rewriter = SqlRewriter::new(SqlFamily::MySql, mapping(&[("we`ird", "plain", true)]));
        let out = rewriter.rewrite_line(b"USE `we``ird`;\n").unwrap();
        assert_eq!(&*out, b"USE `plain`;\n");
    }

    #[test]
    fn test_non_utf8_lines_pass_through() {
        let mut rewriter = SqlRewriter::new(SqlFamily::MySql, DatabaseMapping::restore_all());
        let line = b"INSERT INTO blobs VALUES ('\xff\xfe\x00');\n";
        assert_eq!(&*rewriter.rewrite_line(line).unwrap(), &line[..]);
    }

    #[tokio::test]
    async fn test_postgres_connect_forms() {
        let dump = "\
CREATE ROLE app;
CREATE DATABASE shop WITH TEMPLATE = template0 OWNER = app;
ALTER DATABASE shop SET search_path TO public;
\\connect -reuse-previous=on \"dbname='shop'\"
CREATE TABLE orders (id int);
CREATE DATABASE logs WITH TEMPLATE = template0;
\\connect logs
CREATE TABLE hits (id int);
";
        let (out, stats) = run(
            SqlFamily::Postgres,
            mapping(&[("shop", "shop_restored", true), ("logs", "logs", false)]),
            dump,
        )
        .await;

        assert!(out.starts_with("CREATE ROLE app;\n"));
        assert!(out.contains("CREATE DATABASE \"shop_restored\" WITH TEMPLATE"));
        assert!(out.contains("ALTER DATABASE \"shop_restored\" SET search_path"));
        assert!(out.contains("\\connect -reuse-previous=on \"dbname='shop_restored'\""));
        assert!(out.contains("CREATE TABLE orders"));
        assert!(!out.contains("logs"));
        assert!(!out.contains("hits"));
        assert_eq!(stats.databases, vec!["shop", "logs"]);
    }

    #[tokio::test]
    async fn test_prepared_targets_drop_create_only() {
        let dump = "\
CREATE DATABASE shop WITH TEMPLATE = template0;
ALTER DATABASE shop SET search_path TO public;
\\connect shop
CREATE TABLE orders (id int);
";
        let mut rewriter = SqlRewriter::new(
            SqlFamily::Postgres,
            mapping(&[("shop", "shop_restored", true)]),
        )
        .with_prepared(vec!["shop_restored".to_string()]);
        let mut out = Vec::new();
        rewrite_stream(&mut rewriter, dump.as_bytes(), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(!out.contains("CREATE DATABASE"));
        assert!(out.starts_with("ALTER DATABASE \"shop_restored\" SET search_path"));
        assert!(out.contains("\\connect \"shop_restored\"\n"));
        assert!(out.contains("CREATE TABLE orders"));
        assert_eq!(rewriter.current_database(), Some("shop"));
    }

    #[test]
    fn test_find_reference_shapes() {
        let r = find_reference(SqlFamily::MySql, b"CREATE DATABASE IF NOT EXISTS `x`;\n").unwrap();
        assert_eq!((r.kind, r.name.as_str()), (StatementKind::Create, "x"));

        let r = find_reference(SqlFamily::Postgres, b"\\c \"Mixed\"\"Case\"\n").unwrap();
        assert_eq!((r.kind, r.name.as_str()), (StatementKind::Switch, "Mixed\"Case"));

        let r = find_reference(SqlFamily::Postgres, b"CREATE DATABASE Shop;\n").unwrap();
        assert_eq!(r.name, "shop");

        assert!(find_reference(SqlFamily::MySql, b"INSERT INTO t VALUES ('USE `a`');\n").is_none());
        assert!(find_reference(SqlFamily::Postgres, b"-- \\connect shop\n").is_none());
    }
}
