pub mod databases;
pub mod process;

use std::path::{Path, PathBuf};
use tracing::debug;
use which::which;

/// Maps a logical tool name (`pg_dump`, `mongorestore`, ...) to the path to invoke.
#[derive(Debug, Clone)]
pub struct BinaryResolver {
    bundled_dir: PathBuf,
}

impl BinaryResolver {
    pub fn new(bundled_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundled_dir: bundled_dir.into(),
        }
    }

    /// An explicit directory is joined as-is. Otherwise the bundled directory
    /// is tried first, then `PATH`; if neither has the tool the bundled path
    /// is returned so the spawn error names the expected location.
    pub fn resolve(&self, tool: &str, explicit_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = explicit_dir.filter(|d| !d.as_os_str().is_empty()) {
            return dir.join(tool);
        }

        let bundled = self.bundled_dir.join(executable_name(tool));
        if bundled.is_file() {
            return bundled;
        }

        match which(tool) {
            Ok(found) => {
                debug!(tool, path = %found.display(), "Using tool from PATH");
                found
            }
            Err(_) => bundled,
        }
    }
}

fn executable_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(verbose)
        .compact()
        .init();
}

/// Total bytes under `path`: the file size, or the recursive sum for a directory.
pub fn disk_usage(path: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    let mut total = 0;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::other)?.len();
        }
    }
    Ok(total)
}
