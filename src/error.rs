//! Error taxonomy for the documentation pipeline.
//!
//! Only [`PipelineError::AcquisitionFailed`], [`PipelineError::ExternalToolFailed`]
//! and [`PipelineError::Store`] end a run. Artifact and cleanup errors are
//! logged and recorded on the run but never change the project's outcome.

use std::path::PathBuf;

use thiserror::Error;

use crate::tool::Phase;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Clone, extraction, or post-acquisition verification failed.
    #[error("acquisition failed: {reason}")]
    AcquisitionFailed { reason: String },

    /// A tool phase exited non-zero, could not be launched, or was cancelled.
    #[error("external tool phase '{phase}' failed: {diagnostics}")]
    ExternalToolFailed { phase: Phase, diagnostics: String },

    /// One artifact could not be persisted.
    #[error("failed to persist artifact '{name}': {reason}")]
    ArtifactPersistFailed { name: String, reason: String },

    /// Removing a materialized-source directory failed.
    #[error("failed to clean up {}: {reason}", path.display())]
    CleanupFailed { path: PathBuf, reason: String },

    /// A project already has an active run.
    #[error("project {0} already has an active pipeline run")]
    AlreadyRunning(String),

    /// Status or project-record persistence failed.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn acquisition(reason: impl Into<String>) -> Self {
        PipelineError::AcquisitionFailed {
            reason: reason.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
