// dbvault/src/backup/archive.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{AppError, Result};

pub const GZIP_SUFFIX: &str = "gz";
pub const ZIP_SUFFIX: &str = "zip";

/// Gzip-streams `source` into `dest`.
pub fn gzip_file(source: &Path, dest: &Path) -> Result<()> {
    let input = File::open(source)?;
    let output = BufWriter::new(File::create(dest)?);
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)?;
    let mut output = encoder.finish()?;
    output.flush()?;
    Ok(())
}

/// Decompresses the gzip stream at `source` into `dest`.
pub fn gunzip_file(source: &Path, dest: &Path) -> Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut output = BufWriter::new(File::create(dest)?);
    io::copy(&mut decoder, &mut output)?;
    output.flush()?;
    Ok(())
}

/// Packs the contents of `source_dir` into a zip container at `dest`.
///
/// Entry names are relative to `source_dir` and always use `/` separators.
pub fn zip_directory(source_dir: &Path, dest: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(AppError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Source for archival is not a directory: {}", source_dir.display()),
        )));
    }

    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue, // the root itself
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut input = BufReader::new(File::open(entry.path())?);
            io::copy(&mut input, &mut writer)?;
        }
    }

    let mut output = writer.finish()?;
    output.flush()?;
    Ok(())
}

/// Unpacks the zip container at `archive_path` into `dest_dir`.
pub fn unzip_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
    fs::create_dir_all(dest_dir)?;
    archive.extract(dest_dir)?;
    debug!(
        archive = %archive_path.display(),
        entries = archive.len(),
        "Zip archive extracted"
    );
    Ok(())
}

/// Replaces a freshly dumped artifact with its compressed form.
///
/// Directories become `{dir}.zip`, files become `{file}.gz`; the original is
/// removed only after the compressed copy is complete. On failure the
/// original is left untouched and any partial output is discarded.
pub async fn compress_artifact(artifact: &Path) -> Result<PathBuf> {
    let source = artifact.to_path_buf();
    let is_dir = tokio::fs::metadata(&source)
        .await
        .map_err(|e| compression_failed(&source, e))?
        .is_dir();
    let dest = append_extension(&source, if is_dir { ZIP_SUFFIX } else { GZIP_SUFFIX });

    info!(from = %source.display(), to = %dest.display(), "Compressing backup");

    let (src, dst) = (source.clone(), dest.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        if is_dir {
            zip_directory(&src, &dst)
        } else {
            gzip_file(&src, &dst)
        }
    })
    .await
    .map_err(AppError::from)
    .and_then(|r| r);

    if let Err(e) = outcome {
        if let Err(cleanup) = tokio::fs::remove_file(&dest).await {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %dest.display(), error = %cleanup, "Failed to remove partial archive");
            }
        }
        return Err(compression_failed(&source, e));
    }

    let removed = if is_dir {
        tokio::fs::remove_dir_all(&source).await
    } else {
        tokio::fs::remove_file(&source).await
    };
    removed.map_err(|e| compression_failed(&source, e))?;

    Ok(dest)
}

fn compression_failed(path: &Path, cause: impl std::fmt::Display) -> AppError {
    AppError::CompressionFailed {
        path: path.to_path_buf(),
        reason: cause.to_string(),
    }
}

/// `backup.sql` + `gz` -> `backup.sql.gz`
pub fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_gzip_round_trip_is_byte_identical() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let original = dir.path().join("shop_2024-01-01T00-00-00.sql");
        let content: Vec<u8> = (0..50_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        fs::write(&original, &content)?;

        let compressed = append_extension(&original, GZIP_SUFFIX);
        gzip_file(&original, &compressed)?;
        let restored = dir.path().join("restored.sql");
        gunzip_file(&compressed, &restored)?;

        assert_eq!(fs::read(&restored)?, content);
        Ok(())
    }

    #[test]
    fn test_zip_directory_round_trip() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let dump = dir.path().join("mongo_2024-01-01T00-00-00");
        fs::create_dir_all(dump.join("shop"))?;
        fs::write(dump.join("shop").join("orders.bson"), b"\x16\x00\x00\x00")?;
        fs::write(dump.join("shop").join("orders.metadata.json"), b"{}")?;

        let archive = append_extension(&dump, ZIP_SUFFIX);
        zip_directory(&dump, &archive)?;

        let out = dir.path().join("out");
        unzip_archive(&archive, &out)?;
        assert_eq!(fs::read(out.join("shop").join("orders.bson"))?, b"\x16\x00\x00\x00");
        assert_eq!(fs::read(out.join("shop").join("orders.metadata.json"))?, b"{}");
        Ok(())
    }

    #[test]
    fn test_zip_directory_rejects_files() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("a.sql");
        fs::write(&file, "select 1;")?;
        assert!(zip_directory(&file, &dir.path().join("a.zip")).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_compress_artifact_replaces_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let dump = dir.path().join("shop.sql");
        fs::write(&dump, "INSERT INTO t VALUES (1);\n")?;

        let compressed = compress_artifact(&dump).await?;

        assert_eq!(compressed, dir.path().join("shop.sql.gz"));
        assert!(compressed.exists());
        assert!(!dump.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_compress_artifact_replaces_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let dump = dir.path().join("mongo_x");
        fs::create_dir_all(dump.join("shop"))?;
        fs::write(dump.join("shop").join("c.bson"), b"data")?;

        let compressed = compress_artifact(&dump).await?;

        assert_eq!(compressed, dir.path().join("mongo_x.zip"));
        assert!(compressed.is_file());
        assert!(!dump.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_compress_missing_artifact_fails() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let result = compress_artifact(&dir.path().join("gone.sql")).await;
        assert!(matches!(result, Err(AppError::CompressionFailed { .. })));
        Ok(())
    }
}
