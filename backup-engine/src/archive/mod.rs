//! Multi-database archive: a TAR stream whose first entry is `manifest.json`,
//! followed by one dump file per database.
//!
//! The `tar` crate is synchronous, so packing and unpacking run on the
//! blocking pool. Entries are streamed from and to disk without buffering
//! whole dumps in memory.

pub mod manifest;

pub use manifest::{ArchiveManifest, DatabaseEntry, DumpFormat};

use crate::utils::{EngineError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, info};

pub const MANIFEST_NAME: &str = "manifest.json";

const BLOCK_SIZE: usize = 512;
const USTAR_MAGIC_OFFSET: usize = 257;

/// One per-database dump to pack
#[derive(Debug, Clone)]
pub struct PackSource {
    pub name: String,
    pub path: PathBuf,
    pub format: DumpFormat,
}

/// Archive entry name for a database: `{sanitized}.{ext}`, suffixed `_n`
/// on collision.
pub fn entry_name(database: &str, format: DumpFormat, used: &mut HashSet<String>) -> String {
    let mut stem: String = database
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        stem = "database".to_string();
    }

    let mut candidate = format!("{}.{}", stem, format.extension());
    let mut n = 1;
    while candidate == MANIFEST_NAME || used.contains(&candidate) {
        candidate = format!("{}_{}.{}", stem, n, format.extension());
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Pack `sources` into a new archive at `dest`.
///
/// The archive is written to a sibling temp file and renamed into place, so
/// `dest` either holds a complete archive or is untouched.
pub async fn pack(
    sources: Vec<PackSource>,
    dest: &Path,
    source_type: &str,
    engine_version: Option<String>,
) -> Result<ArchiveManifest> {
    let dest = dest.to_path_buf();
    let source_type = source_type.to_string();
    tokio::task::spawn_blocking(move || pack_blocking(&sources, &dest, &source_type, engine_version))
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
}

fn pack_blocking(
    sources: &[PackSource],
    dest: &Path,
    source_type: &str,
    engine_version: Option<String>,
) -> Result<ArchiveManifest> {
    let mut used = HashSet::new();
    let mut entries = Vec::with_capacity(sources.len());
    for source in sources {
        let size = std::fs::metadata(&source.path)?.len();
        entries.push(DatabaseEntry {
            name: source.name.clone(),
            filename: entry_name(&source.name, source.format, &mut used),
            size,
            format: source.format,
        });
    }
    let manifest = ArchiveManifest::new(source_type, engine_version, entries);
    let manifest_json = manifest.to_json()?;

    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".archive-")
        .suffix(".partial")
        .tempfile_in(parent)?;

    let mut builder = Builder::new(tmp.as_file().try_clone()?);
    let mtime = manifest.created_at.timestamp().max(0) as u64;

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(manifest_json.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append_data(&mut header, MANIFEST_NAME, manifest_json.as_slice())?;

    for (source, entry) in sources.iter().zip(&manifest.databases) {
        let mut file = File::open(&source.path)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(entry.size);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_cksum();
        builder.append_data(&mut header, &entry.filename, (&mut file).take(entry.size))?;
        debug!(database = %entry.name, file = %entry.filename, size = entry.size, "Packed");
    }

    let mut out = builder.into_inner()?;
    out.flush()?;
    out.sync_all()?;
    tmp.persist(dest).map_err(|e| EngineError::Io(e.error))?;

    info!(
        "Packed {} database(s) into {} ({} bytes of dumps)",
        manifest.databases.len(),
        dest.display(),
        manifest.total_size
    );
    Ok(manifest)
}

/// Extract every dump under `dir`, returning the manifest.
pub async fn unpack(archive: &Path, dir: &Path) -> Result<ArchiveManifest> {
    let archive = archive.to_path_buf();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_blocking(&archive, &dir))
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
}

fn unpack_blocking(path: &Path, dir: &Path) -> Result<ArchiveManifest> {
    std::fs::create_dir_all(dir)?;
    let mut archive = Archive::new(File::open(path)?);
    let mut manifest = None;
    let mut extracted = HashSet::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path()?.into_owned();
        // Only the final component; no entry may escape `dir`.
        let Some(name) = entry_path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        if name == MANIFEST_NAME {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            manifest = Some(ArchiveManifest::from_json(&data)?);
            continue;
        }

        let mut out = File::create(dir.join(&name))?;
        std::io::copy(&mut entry, &mut out)?;
        extracted.insert(name);
    }

    let manifest = manifest.ok_or_else(|| {
        EngineError::format(format!("{} has no {} entry", path.display(), MANIFEST_NAME))
    })?;
    for entry in &manifest.databases {
        if !extracted.contains(&entry.filename) {
            return Err(EngineError::format(format!(
                "Archive manifest lists {} but the archive does not contain it",
                entry.filename
            )));
        }
    }
    Ok(manifest)
}

/// Read only the manifest, stopping as soon as it has been parsed.
pub async fn read_manifest(path: &Path) -> Result<ArchiveManifest> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_manifest_blocking(&path))
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
}

fn read_manifest_blocking(path: &Path) -> Result<ArchiveManifest> {
    let mut archive = Archive::new(File::open(path)?);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_manifest = entry
            .path()?
            .file_name()
            .is_some_and(|n| n == MANIFEST_NAME);
        if is_manifest {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return ArchiveManifest::from_json(&data);
        }
    }
    Err(EngineError::format(format!(
        "{} has no {} entry",
        path.display(),
        MANIFEST_NAME
    )))
}

/// Whether the first header block looks like one of our archives.
pub fn looks_like_tar(header: &[u8]) -> bool {
    if header.len() < BLOCK_SIZE {
        return false;
    }
    if &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5] == b"ustar" {
        return true;
    }
    // Pre-POSIX writers have no magic; fall back to the first entry's name.
    let name = &header[..100];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    &name[..end] == MANIFEST_NAME.as_bytes()
}

/// Header check on the first 512 bytes, confirmed by parsing the manifest.
pub async fn is_multi_db_tar(path: &Path) -> Result<bool> {
    let mut header = vec![0u8; BLOCK_SIZE];
    let mut file = tokio::fs::File::open(path).await?;
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = tokio::io::AsyncReadExt::read(&mut file, &mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if !looks_like_tar(&header[..filled]) {
        return Ok(false);
    }
    Ok(read_manifest(path).await.is_ok())
}
