//! External process execution for tool adapters
//!
//! Adapters shell out through [`ToolCommand`], which enforces a timeout,
//! kills the child on expiry and maps every failure mode onto a
//! [`ToolStatus`]. [`Workspace`] materializes a unit's files for tools that
//! need a directory on disk.

use super::types::ToolStatus;
use crate::unit::{normalize_path, SourceUnit};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Longest stderr excerpt carried into a tool report.
const STDERR_EXCERPT: usize = 400;

/// A failed tool step, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub status: ToolStatus,
    pub detail: String,
}

impl ToolFailure {
    pub fn new(status: ToolStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::new(ToolStatus::ParseError, detail)
    }

    pub fn crashed(detail: impl Into<String>) -> Self {
        Self::new(ToolStatus::ToolCrashed, detail)
    }
}

/// Captured output of a finished tool process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Overall time budget shared by the steps of one adapter invocation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// One external command with a bounded argument list.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    accepted_exit_codes: Vec<i32>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            accepted_exit_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Exit codes that count as success (some linters exit 1 on findings).
    pub fn accept_exit_codes(mut self, codes: &[i32]) -> Self {
        self.accepted_exit_codes = codes.to_vec();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run to completion within `deadline`.
    ///
    /// Missing executables map to `ToolNotInstalled`, expiry to
    /// `ToolTimeout` (the child is killed), unaccepted exit codes and
    /// signals to `ToolCrashed`.
    pub async fn run(&self, deadline: &Deadline) -> Result<ProcessOutput, ToolFailure> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(ToolFailure::new(
                ToolStatus::ToolTimeout,
                format!("{} not started: {}s budget exhausted", self.program, deadline.budget().as_secs()),
            ));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!(program = %self.program, args = ?self.args, "spawning tool");
        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ToolFailure::new(ToolStatus::ToolNotInstalled, format!("{}: {}", self.program, e))
            }
            _ => ToolFailure::crashed(format!("{}: spawn failed: {}", self.program, e)),
        })?;

        // dropping the wait future drops the child, which kills it
        let output = match tokio::time::timeout(remaining, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolFailure::crashed(format!("{}: {}", self.program, e))),
            Err(_) => {
                warn!(program = %self.program, timeout_secs = deadline.budget().as_secs(), "tool timed out, killed");
                return Err(ToolFailure::new(
                    ToolStatus::ToolTimeout,
                    format!("{} exceeded {}s", self.program, deadline.budget().as_secs()),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        match exit_code {
            Some(code) if self.accepted_exit_codes.contains(&code) => Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code,
            }),
            _ => {
                warn!(
                    program = %self.program,
                    exit_code = ?exit_code,
                    stderr = %excerpt(&stderr),
                    "tool exited abnormally"
                );
                Err(ToolFailure::crashed(format!(
                    "{} exited with {}: {}",
                    self.program,
                    exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    excerpt(&stderr)
                )))
            }
        }
    }
}

/// Tail of `text`, bounded for logs and reports.
pub fn excerpt(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_EXCERPT {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_EXCERPT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

/// Query `<program> --version`, returning the first non-empty output line.
pub async fn query_version(program: &str, timeout: Duration) -> Option<String> {
    let output = ToolCommand::new(program)
        .arg("--version")
        .run(&Deadline::after(timeout))
        .await
        .ok()?;
    output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// A unit's files written under a private temporary directory.
///
/// Removed from disk when dropped.
pub struct Workspace {
    dir: TempDir,
    source_root: PathBuf,
}

impl Workspace {
    pub fn materialize(unit: &SourceUnit) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("secgraph-").tempdir()?;
        let source_root = dir.path().join("src");
        std::fs::create_dir_all(&source_root)?;
        for file in unit.files() {
            let relative = normalize_path(&file.path);
            if relative.is_empty() {
                continue;
            }
            let target = source_root.join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.text)?;
        }
        Ok(Self { dir, source_root })
    }

    /// Directory holding the unit's files.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Path for tool scratch output, outside the source root.
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Map a tool-reported path back to the unit's relative path.
    ///
    /// Accepts absolute paths under the source root, `file://` URIs and
    /// paths relative to the source root.
    pub fn relativize(&self, reported: &str, unit: &SourceUnit) -> String {
        let reported = reported.strip_prefix("file://").unwrap_or(reported);
        let path = Path::new(reported);
        let roots = [
            Some(self.source_root.clone()),
            self.source_root.canonicalize().ok(),
        ];
        for root in roots.iter().flatten() {
            if let Ok(rest) = path.strip_prefix(root) {
                return normalize_path(&rest.to_string_lossy());
            }
        }
        let normalized = normalize_path(reported);
        if unit.file(&normalized).is_some() {
            return normalized;
        }
        // tools sometimes prefix the root's own name (`src/A.java`)
        if let Some(rest) = normalized.strip_prefix("src/") {
            if unit.file(rest).is_some() {
                return rest.to_string();
            }
        }
        unit.files()
            .iter()
            .find(|f| normalized.ends_with(&format!("/{}", f.path)))
            .map(|f| f.path.clone())
            .unwrap_or(normalized)
    }
}
