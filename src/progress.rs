//! Pipeline progress reporting.
//!
//! Clients normally poll the project status; these events are the push-side
//! view of the same transitions, emitted after the status is persisted so
//! they never run ahead of what a poll would return.

use std::io::Write;

use crate::models::ProjectStatus;
use crate::tool::Phase;

/// A single progress event for one project run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The project's persisted status changed.
    Status {
        project_id: String,
        status: ProjectStatus,
    },
    /// A tool phase finished successfully.
    PhaseFinished { project_id: String, phase: Phase },
    /// An artifact was persisted.
    ArtifactStored { project_id: String, name: String },
    /// An artifact or output location was skipped.
    ArtifactSkipped {
        project_id: String,
        name: String,
        reason: String,
    },
}

/// Receives pipeline events. Called from the orchestrator task.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Structured log lines via `tracing`.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Status { project_id, status } => {
                tracing::info!(project = %project_id, status = %status, "project status changed");
            }
            PipelineEvent::PhaseFinished { project_id, phase } => {
                tracing::info!(project = %project_id, phase = %phase, "tool phase finished");
            }
            PipelineEvent::ArtifactStored { project_id, name } => {
                tracing::debug!(project = %project_id, artifact = %name, "artifact stored");
            }
            PipelineEvent::ArtifactSkipped {
                project_id,
                name,
                reason,
            } => {
                tracing::warn!(project = %project_id, artifact = %name, "artifact skipped: {}", reason);
            }
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PipelineEvent) {
        let obj = match &event {
            PipelineEvent::Status { project_id, status } => serde_json::json!({
                "event": "status",
                "project_id": project_id,
                "status": status,
            }),
            PipelineEvent::PhaseFinished { project_id, phase } => serde_json::json!({
                "event": "phase_finished",
                "project_id": project_id,
                "phase": phase.as_str(),
            }),
            PipelineEvent::ArtifactStored { project_id, name } => serde_json::json!({
                "event": "artifact_stored",
                "project_id": project_id,
                "name": name,
            }),
            PipelineEvent::ArtifactSkipped {
                project_id,
                name,
                reason,
            } => serde_json::json!({
                "event": "artifact_skipped",
                "project_id": project_id,
                "name": name,
                "reason": reason,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: PipelineEvent) {}
}

/// Progress mode for the CLI: structured logs only, or JSON lines on stderr.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Log,
    Json,
}

impl ProgressMode {
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Log => Box::new(TracingProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
