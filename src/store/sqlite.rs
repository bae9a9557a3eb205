//! SQLite-backed [`Store`] implementation.
//!
//! Status changes are single conditional `UPDATE`s (`WHERE status IN
//! (<legal predecessors>)`), so the state machine holds even with several
//! writers on the same database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{
    Artifact, ArtifactKind, Project, ProjectStatus, ProjectSummary, SourceKind, StoredArtifact,
};

use super::{not_found, transition_error, Store};

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and apply migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Like [`open`](Self::open) for an explicit database path.
    pub async fn open_path(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn current_status(&self, id: &str) -> Result<Option<ProjectStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        status.map(|s| s.parse()).transpose()
    }

    /// Explain why a conditional status update touched no row.
    async fn rejected_update(&self, id: &str, to: ProjectStatus) -> anyhow::Error {
        match self.current_status(id).await {
            Ok(Some(from)) => transition_error(id, from, to),
            Ok(None) => not_found(id),
            Err(e) => e,
        }
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let source_kind: String = row.get("source_kind");
    let status: String = row.get("status");
    let created_at: i64 = row.get("created_at");
    let completed_at: Option<i64> = row.get("completed_at");

    Ok(Project {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        source: row.get("source"),
        source_kind: source_kind.parse::<SourceKind>()?,
        local_path: row.get("local_path"),
        status: status.parse::<ProjectStatus>()?,
        created_at: from_millis(created_at),
        completed_at: completed_at.map(from_millis),
    })
}

fn artifact_from_row(row: &SqliteRow) -> Result<StoredArtifact> {
    let kind: String = row.get("kind");
    let created_at: i64 = row.get("created_at");
    Ok(StoredArtifact {
        project_id: row.get("project_id"),
        name: row.get("name"),
        kind: kind.parse::<ArtifactKind>()?,
        content: row.get("content"),
        source_path: row.get("source_path"),
        created_at: from_millis(created_at),
    })
}

const PROJECT_COLUMNS: &str =
    "id, owner_id, name, source, source_kind, local_path, status, created_at, completed_at";

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, owner_id, name, source, source_kind, local_path,
                                  status, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.owner_id)
        .bind(&project.name)
        .bind(&project.source)
        .bind(project.source_kind.as_str())
        .bind(&project.local_path)
        .bind(project.status.as_str())
        .bind(to_millis(project.created_at))
        .bind(project.completed_at.map(to_millis))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert project {}", project.id))?;
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE id = ?",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn list_projects(&self, owner_id: &str) -> Result<Vec<ProjectSummary>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {},
                   (SELECT COUNT(*) FROM artifacts a WHERE a.project_id = projects.id) AS artifact_count
            FROM projects
            WHERE owner_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
            PROJECT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ProjectSummary {
                    project: project_from_row(row)?,
                    artifact_count: row.get("artifact_count"),
                })
            })
            .collect()
    }

    async fn list_unfinished(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE status IN (?, ?, ?) ORDER BY created_at ASC, rowid ASC",
            PROJECT_COLUMNS
        ))
        .bind(ProjectStatus::Pending.as_str())
        .bind(ProjectStatus::Analyzing.as_str())
        .bind(ProjectStatus::Generating.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn update_status(&self, id: &str, status: ProjectStatus) -> Result<()> {
        let predecessors = status.predecessors();
        if predecessors.is_empty() {
            return Err(self.rejected_update(id, status).await);
        }

        let placeholders = vec!["?"; predecessors.len()].join(", ");
        let sql = format!(
            "UPDATE projects SET status = ? WHERE id = ? AND status IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(status.as_str()).bind(id);
        for p in predecessors {
            query = query.bind(p.as_str());
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.rejected_update(id, status).await);
        }
        Ok(())
    }

    async fn set_local_path(&self, id: &str, path: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET local_path = ? WHERE id = ?")
            .bind(path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn complete_project(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE projects SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ProjectStatus::Completed.as_str())
        .bind(to_millis(completed_at))
        .bind(id)
        .bind(ProjectStatus::Generating.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.rejected_update(id, ProjectStatus::Completed).await);
        }
        Ok(())
    }

    async fn upsert_artifact(&self, project_id: &str, artifact: &Artifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (project_id, name, kind, content, source_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, name) DO UPDATE SET
                kind = excluded.kind,
                content = excluded.content,
                source_path = excluded.source_path,
                created_at = excluded.created_at
            "#,
        )
        .bind(project_id)
        .bind(&artifact.name)
        .bind(artifact.kind.as_str())
        .bind(&artifact.content)
        .bind(&artifact.source_path)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store artifact '{}'", artifact.name))?;
        Ok(())
    }

    async fn list_artifacts(&self, project_id: &str) -> Result<Vec<StoredArtifact>> {
        let rows = sqlx::query(
            "SELECT project_id, name, kind, content, source_path, created_at FROM artifacts WHERE project_id = ? ORDER BY name ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(artifact_from_row).collect()
    }

    async fn get_artifact(&self, project_id: &str, name: &str) -> Result<Option<StoredArtifact>> {
        let row = sqlx::query(
            "SELECT project_id, name, kind, content, source_path, created_at FROM artifacts WHERE project_id = ? AND name = ?",
        )
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(artifact_from_row).transpose()
    }
}
