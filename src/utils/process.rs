// dbvault/src/utils/process.rs
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{AppError, Result};

enum StdoutTarget {
    Capture,
    File(PathBuf),
}

/// One invocation of an external dump/restore tool.
pub struct ToolCommand {
    tool: String,
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    stdout: StdoutTarget,
}

/// Outcome of a finished child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Empty when stdout was streamed into a file.
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl ToolCommand {
    /// `tool` is the logical name used in errors and logs; `program` is what gets spawned.
    pub fn new(tool: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.to_string(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdout: StdoutTarget::Capture,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Streams the child's stdout into `path` (created or truncated) instead of capturing it.
    pub fn stdout_to_file(mut self, path: &Path) -> Self {
        self.stdout = StdoutTarget::File(path.to_path_buf());
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arg_list(&self) -> &[OsString] {
        &self.args
    }

    pub fn env_list(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    /// Spawns the process and waits for it to exit, draining stdout and
    /// stderr concurrently so neither pipe can fill up and stall the child.
    pub async fn run(self) -> Result<ProcessOutput> {
        // Arguments may carry credentials (mongo -p), so only the program is logged.
        debug!(tool = %self.tool, program = %self.program.display(), "Spawning tool");

        let mut sink = match &self.stdout {
            StdoutTarget::File(path) => Some(tokio::fs::File::create(path).await?),
            StdoutTarget::Capture => None,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AppError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("child stderr was not captured"))?;

        let stdout_task = async {
            let mut captured = Vec::new();
            match sink.as_mut() {
                Some(file) => {
                    tokio::io::copy(&mut stdout, file).await?;
                    file.flush().await?;
                }
                None => {
                    stdout.read_to_end(&mut captured).await?;
                }
            }
            Ok::<_, std::io::Error>(captured)
        };
        let stderr_task = async {
            let mut captured = Vec::new();
            stderr.read_to_end(&mut captured).await?;
            Ok::<_, std::io::Error>(captured)
        };

        let (stdout_bytes, stderr_bytes) = match tokio::try_join!(stdout_task, stderr_task) {
            Ok(streams) => streams,
            Err(e) => {
                // kill() also reaps the child.
                if let Err(kill_err) = child.kill().await {
                    warn!(tool = %self.tool, error = %kill_err, "Failed to stop tool after stream error");
                }
                return Err(e.into());
            }
        };
        let status = child.wait().await?;

        let output = ProcessOutput {
            exit_code: status.code(),
            stdout: stdout_bytes,
            stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_string(),
        };
        debug!(tool = %self.tool, exit_code = ?output.exit_code, "Tool exited");
        Ok(output)
    }
}
