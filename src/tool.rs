//! External documentation tool invocation.
//!
//! The tool is an opaque program run once per [`Phase`] with the
//! materialized source path as an argument. Arguments are passed as a
//! structured list, never through a shell. Only the exit status decides
//! success; captured output is kept for operator diagnostics.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{ToolConfig, REPO_PATH_PLACEHOLDER};
use crate::error::{PipelineError, PipelineResult};
use crate::runs::CancelSignal;

/// Longest diagnostic excerpt carried on an error.
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// One of the two required tool invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Analyze,
    GenerateReadme,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::GenerateReadme => "generate-readme",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured process output of a successful phase.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a tool phase against a materialized source tree.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn run(
        &self,
        phase: Phase,
        repo_path: &Path,
        cancel: &CancelSignal,
    ) -> PipelineResult<ToolOutput>;
}

/// [`ToolInvoker`] that launches a configured program.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    working_dir: Option<PathBuf>,
    analyze_args: Vec<String>,
    generate_args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandInvoker {
    pub fn new(
        program: impl Into<String>,
        analyze_args: Vec<String>,
        generate_args: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            analyze_args,
            generate_args,
            timeout: None,
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            program: config.program.clone(),
            working_dir: config.working_dir.clone(),
            analyze_args: config.analyze_args.clone(),
            generate_args: config.generate_args.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Expand the phase's argument template for `repo_path`.
    pub fn args_for(&self, phase: Phase, repo_path: &Path) -> Vec<OsString> {
        let template = match phase {
            Phase::Analyze => &self.analyze_args,
            Phase::GenerateReadme => &self.generate_args,
        };
        template
            .iter()
            .map(|arg| {
                if arg == REPO_PATH_PLACEHOLDER {
                    // Pass the path through untouched, even if not UTF-8.
                    repo_path.as_os_str().to_os_string()
                } else if arg.contains(REPO_PATH_PLACEHOLDER) {
                    OsString::from(
                        arg.replace(REPO_PATH_PLACEHOLDER, &repo_path.to_string_lossy()),
                    )
                } else {
                    OsString::from(arg)
                }
            })
            .collect()
    }

    async fn execute(&self, phase: Phase, repo_path: &Path) -> PipelineResult<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(phase, repo_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(phase = %phase, program = %self.program, path = %repo_path.display(), "running external tool");

        let child = cmd.spawn().map_err(|e| PipelineError::ExternalToolFailed {
            phase,
            diagnostics: format!("failed to launch '{}': {}", self.program, e),
        })?;

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(res) => res,
                Err(_) => {
                    return Err(PipelineError::ExternalToolFailed {
                        phase,
                        diagnostics: format!("timed out after {}s", limit.as_secs()),
                    })
                }
            },
            None => wait.await,
        }
        .map_err(|e| PipelineError::ExternalToolFailed {
            phase,
            diagnostics: format!("failed to wait for '{}': {}", self.program, e),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stdout.trim().is_empty() {
            tracing::debug!(phase = %phase, "tool stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            tracing::debug!(phase = %phase, "tool stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            return Err(PipelineError::ExternalToolFailed {
                phase,
                diagnostics: format!("{}: {}", output.status, tail(detail, MAX_DIAGNOSTIC_CHARS)),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

#[async_trait]
impl ToolInvoker for CommandInvoker {
    async fn run(
        &self,
        phase: Phase,
        repo_path: &Path,
        cancel: &CancelSignal,
    ) -> PipelineResult<ToolOutput> {
        // Dropping the execute future drops the child, which kills it.
        tokio::select! {
            res = self.execute(phase, repo_path) => res,
            _ = cancel.cancelled() => Err(PipelineError::ExternalToolFailed {
                phase,
                diagnostics: "cancelled".to_string(),
            }),
        }
    }
}

/// Last `max` characters of `s`.
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::cancel_pair;

    fn sh(analyze: &str, generate: &str) -> CommandInvoker {
        // `sh -c script {repo_path}` exposes the path to the script as $0.
        CommandInvoker::new(
            "sh",
            vec!["-c".into(), analyze.into(), REPO_PATH_PLACEHOLDER.into()],
            vec!["-c".into(), generate.into(), REPO_PATH_PLACEHOLDER.into()],
        )
    }

    #[test]
    fn args_substitute_repo_path() {
        let inv = CommandInvoker::new(
            "uv",
            vec!["analyze".into(), "--repo-path".into(), REPO_PATH_PLACEHOLDER.into()],
            vec!["generate".into(), format!("--repo-path={}", REPO_PATH_PLACEHOLDER)],
        );
        let path = Path::new("/data/repos/u1_abc");
        assert_eq!(
            inv.args_for(Phase::Analyze, path),
            vec![
                OsString::from("analyze"),
                OsString::from("--repo-path"),
                OsString::from("/data/repos/u1_abc")
            ]
        );
        assert_eq!(
            inv.args_for(Phase::GenerateReadme, path),
            vec![
                OsString::from("generate"),
                OsString::from("--repo-path=/data/repos/u1_abc")
            ]
        );
    }

    #[test]
    fn path_with_spaces_stays_one_argument() {
        let inv = sh("true", "true");
        let args = inv.args_for(Phase::Analyze, Path::new("/tmp/my repo; rm -rf x"));
        assert_eq!(args.len(), 3);
        assert_eq!(args[2], OsString::from("/tmp/my repo; rm -rf x"));
    }

    #[tokio::test]
    async fn zero_exit_succeeds_and_captures_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let inv = sh("echo analyzed \"$0\"", "true");
        let out = inv
            .run(Phase::Analyze, tmp.path(), &CancelSignal::never())
            .await
            .unwrap();
        assert!(out.stdout.contains("analyzed"));
        assert!(out.stdout.contains(&tmp.path().display().to_string()));
    }

    #[tokio::test]
    async fn nonzero_exit_is_tool_failure_with_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let inv = sh("true", "echo 'no model configured' >&2; exit 3");
        let err = inv
            .run(Phase::GenerateReadme, tmp.path(), &CancelSignal::never())
            .await
            .unwrap_err();
        match err {
            PipelineError::ExternalToolFailed { phase, diagnostics } => {
                assert_eq!(phase, Phase::GenerateReadme);
                assert!(diagnostics.contains("no model configured"), "{}", diagnostics);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_tool_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let inv = CommandInvoker::new(
            "repodoc-no-such-program",
            vec![REPO_PATH_PLACEHOLDER.into()],
            vec![REPO_PATH_PLACEHOLDER.into()],
        );
        let err = inv
            .run(Phase::Analyze, tmp.path(), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to launch"), "{}", err);
    }

    #[tokio::test]
    async fn cancellation_stops_a_hung_phase() {
        let tmp = tempfile::TempDir::new().unwrap();
        let inv = sh("sleep 30", "true");
        let (handle, signal) = cancel_pair();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let started = std::time::Instant::now();
        let err = inv.run(Phase::Analyze, tmp.path(), &signal).await.unwrap_err();
        canceller.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn timeout_fails_the_phase() {
        let tmp = tempfile::TempDir::new().unwrap();
        let inv = sh("sleep 30", "true").with_timeout(Duration::from_millis(200));
        let err = inv
            .run(Phase::Analyze, tmp.path(), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("äöü", 2), "öü");
    }
}
