//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Semantics match the SQLite
//! backend, including rejection of illegal status transitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Artifact, Project, ProjectStatus, ProjectSummary, StoredArtifact};

use super::{not_found, transition_error, Store};

/// In-memory store.
pub struct InMemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    /// project id → artifact name → artifact
    artifacts: RwLock<HashMap<String, BTreeMap<String, StoredArtifact>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            artifacts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_project(&self, project: &Project) -> Result<()> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        if projects.contains_key(&project.id) {
            anyhow::bail!("project already exists: {}", project.id);
        }
        projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects.get(id).cloned())
    }

    async fn list_projects(&self, owner_id: &str) -> Result<Vec<ProjectSummary>> {
        let projects = self.projects.read().map_err(poisoned)?;
        let artifacts = self.artifacts.read().map_err(poisoned)?;
        let mut out: Vec<ProjectSummary> = projects
            .values()
            .filter(|p| p.owner_id == owner_id)
            .map(|p| ProjectSummary {
                project: p.clone(),
                artifact_count: artifacts.get(&p.id).map(|a| a.len() as i64).unwrap_or(0),
            })
            .collect();
        out.sort_by(|a, b| b.project.created_at.cmp(&a.project.created_at));
        Ok(out)
    }

    async fn list_unfinished(&self) -> Result<Vec<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        let mut out: Vec<Project> = projects
            .values()
            .filter(|p| !p.status.is_terminal())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn update_status(&self, id: &str, status: ProjectStatus) -> Result<()> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects.get_mut(id).ok_or_else(|| not_found(id))?;
        if !project.status.can_transition_to(status) {
            return Err(transition_error(id, project.status, status));
        }
        project.status = status;
        Ok(())
    }

    async fn set_local_path(&self, id: &str, path: Option<&str>) -> Result<()> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects.get_mut(id).ok_or_else(|| not_found(id))?;
        project.local_path = path.map(str::to_string);
        Ok(())
    }

    async fn complete_project(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        let project = projects.get_mut(id).ok_or_else(|| not_found(id))?;
        if !project.status.can_transition_to(ProjectStatus::Completed) {
            return Err(transition_error(id, project.status, ProjectStatus::Completed));
        }
        project.status = ProjectStatus::Completed;
        project.completed_at = Some(completed_at);
        Ok(())
    }

    async fn upsert_artifact(&self, project_id: &str, artifact: &Artifact) -> Result<()> {
        if !self.projects.read().map_err(poisoned)?.contains_key(project_id) {
            return Err(not_found(project_id));
        }
        let mut artifacts = self.artifacts.write().map_err(poisoned)?;
        artifacts.entry(project_id.to_string()).or_default().insert(
            artifact.name.clone(),
            StoredArtifact {
                project_id: project_id.to_string(),
                name: artifact.name.clone(),
                kind: artifact.kind,
                content: artifact.content.clone(),
                source_path: artifact.source_path.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_artifacts(&self, project_id: &str) -> Result<Vec<StoredArtifact>> {
        let artifacts = self.artifacts.read().map_err(poisoned)?;
        Ok(artifacts
            .get(project_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_artifact(&self, project_id: &str, name: &str) -> Result<Option<StoredArtifact>> {
        let artifacts = self.artifacts.read().map_err(poisoned)?;
        Ok(artifacts.get(project_id).and_then(|m| m.get(name)).cloned())
    }
}
