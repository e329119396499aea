// dbvault/src/restore/logic.rs
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

use super::db_restore::{RestoreOutcome, restore_database};
use crate::backup::archive::{GZIP_SUFFIX, ZIP_SUFFIX, gunzip_file, unzip_archive};
use crate::config::Connection;
use crate::errors::{AppError, Result};
use crate::utils::BinaryResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// The file or directory handed to the restore strategy.
    pub source: PathBuf,
    pub extracted: bool,
    pub outcome: RestoreOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Gzip,
    Zip,
}

fn archive_format(path: &Path) -> Option<ArchiveFormat> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        GZIP_SUFFIX => Some(ArchiveFormat::Gzip),
        ZIP_SUFFIX => Some(ArchiveFormat::Zip),
        _ => None,
    }
}

/// Restores backup artifacts into a target database. Destructive: callers
/// must have confirmed the user's intent before invoking it.
#[derive(Debug, Clone)]
pub struct RestoreExecutor {
    resolver: BinaryResolver,
    temp_root: Option<PathBuf>,
}

impl RestoreExecutor {
    pub fn new(resolver: BinaryResolver) -> Self {
        Self {
            resolver,
            temp_root: None,
        }
    }

    /// Extract archives under `dir` instead of the system temp directory.
    pub fn with_temp_root(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_root = dir;
        self
    }

    pub async fn restore(&self, artifact: &Path, target: &Connection, database: &str) -> Result<RestoreReport> {
        info!(artifact = %artifact.display(), database, "Starting restore");

        if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
            return Err(AppError::ArtifactNotFound(artifact.to_path_buf()));
        }

        let Some(format) = archive_format(artifact) else {
            let outcome = restore_database(&self.resolver, target, database, artifact).await?;
            info!(database, "Restore completed successfully");
            return Ok(RestoreReport {
                source: artifact.to_path_buf(),
                extracted: false,
                outcome,
            });
        };

        let scratch = self.scratch_dir()?;
        let result = self.restore_archive(artifact, format, scratch.path(), target, database).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "Failed to cleanup temp directory");
        }

        if result.is_ok() {
            info!(database, "Restore completed successfully");
        }
        result
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("db-restore-");
            b
        };
        let dir = match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn restore_archive(
        &self,
        artifact: &Path,
        format: ArchiveFormat,
        scratch: &Path,
        target: &Connection,
        database: &str,
    ) -> Result<RestoreReport> {
        let source = extract(artifact, format, scratch).await?;
        info!(path = %source.display(), "Extracted backup");

        let outcome = restore_database(&self.resolver, target, database, &source).await?;
        Ok(RestoreReport {
            source,
            extracted: true,
            outcome,
        })
    }
}

async fn extract(artifact: &Path, format: ArchiveFormat, scratch: &Path) -> Result<PathBuf> {
    match format {
        ArchiveFormat::Gzip => {
            let name = artifact
                .file_stem()
                .map(|s| s.to_os_string())
                .unwrap_or_else(|| "backup".into());
            let dest = scratch.join(name);
            let (src, dst) = (artifact.to_path_buf(), dest.clone());
            tokio::task::spawn_blocking(move || gunzip_file(&src, &dst)).await??;
            Ok(dest)
        }
        ArchiveFormat::Zip => {
            let (src, dst) = (artifact.to_path_buf(), scratch.to_path_buf());
            tokio::task::spawn_blocking(move || unzip_archive(&src, &dst)).await??;
            select_extracted_entry(scratch)
                .await?
                .ok_or_else(|| AppError::EmptyArchive(artifact.to_path_buf()))
        }
    }
}

/// Picks the backup out of an extracted zip.
///
/// Hidden entries and `__MACOSX` are ignored. A lone entry wins; otherwise a
/// `.sql` file, then an extension-less directory (a mongo dump), then the
/// first remaining entry by name.
pub async fn select_extracted_entry(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = Vec::new();
    let mut listing = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = listing.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == "__MACOSX" {
            continue;
        }
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((name, is_dir, entry.path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if entries.len() <= 1 {
        return Ok(entries.pop().map(|(_, _, path)| path));
    }

    let sql_file = entries
        .iter()
        .find(|(name, is_dir, _)| !is_dir && name.ends_with(".sql"));
    let dump_dir = entries
        .iter()
        .find(|(name, is_dir, _)| *is_dir && Path::new(name).extension().is_none());

    Ok(sql_file
        .or(dump_dir)
        .or(entries.first())
        .map(|(_, _, path)| path.clone()))
}
