//! Storage abstraction for project records and artifacts.
//!
//! The [`Store`] trait is everything the pipeline and the read path need
//! from persistence. [`sqlite::SqliteStore`] is the production backend;
//! [`memory::InMemoryStore`] backs tests and embedders that do not want a
//! database file.
//!
//! Implementations must enforce two invariants themselves:
//!
//! - status updates only follow the project state machine
//!   ([`ProjectStatus::can_transition_to`]); anything else is an error, so
//!   a project can never move backwards;
//! - [`Store::upsert_artifact`] is keyed by `(project_id, name)`, so
//!   persisting the same artifact twice leaves one row with the latest
//!   content.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Artifact, Project, ProjectStatus, ProjectSummary, StoredArtifact};

/// Persistent store for projects and their artifacts.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_project`](Store::create_project) | Insert a new `pending` project |
/// | [`get_project`](Store::get_project) | Fetch one project |
/// | [`list_projects`](Store::list_projects) | An owner's projects, newest first |
/// | [`list_unfinished`](Store::list_unfinished) | Projects not yet in a terminal status |
/// | [`update_status`](Store::update_status) | Advance the state machine |
/// | [`set_local_path`](Store::set_local_path) | Record or clear the materialized path |
/// | [`complete_project`](Store::complete_project) | `generating → completed` + timestamp |
/// | [`upsert_artifact`](Store::upsert_artifact) | Insert or overwrite an artifact |
/// | [`list_artifacts`](Store::list_artifacts) | All artifacts of a project |
/// | [`get_artifact`](Store::get_artifact) | One artifact by name |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, project: &Project) -> Result<()>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self, owner_id: &str) -> Result<Vec<ProjectSummary>>;

    /// Every project in `pending`, `analyzing` or `generating`, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Project>>;

    /// Move a project to `status`. Fails if the project is unknown or the
    /// transition is not allowed from its persisted status.
    async fn update_status(&self, id: &str, status: ProjectStatus) -> Result<()>;

    async fn set_local_path(&self, id: &str, path: Option<&str>) -> Result<()>;

    /// Atomically set `completed` and the completion timestamp.
    async fn complete_project(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()>;

    async fn upsert_artifact(&self, project_id: &str, artifact: &Artifact) -> Result<()>;

    /// Sorted by name.
    async fn list_artifacts(&self, project_id: &str) -> Result<Vec<StoredArtifact>>;

    async fn get_artifact(&self, project_id: &str, name: &str) -> Result<Option<StoredArtifact>>;
}

pub(crate) fn transition_error(id: &str, from: ProjectStatus, to: ProjectStatus) -> anyhow::Error {
    anyhow::anyhow!(
        "illegal status transition for project {}: {} -> {}",
        id,
        from,
        to
    )
}

pub(crate) fn not_found(id: &str) -> anyhow::Error {
    anyhow::anyhow!("project not found: {}", id)
}
