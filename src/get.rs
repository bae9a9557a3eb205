//! Project retrieval: status, artifacts, and per-owner listings.
//!
//! Used by both the `repodoc status` / `repodoc list` CLI commands and the
//! `GET /projects` HTTP endpoints.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::{ProjectDetail, ProjectSummary};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Fetch a project with all of its artifacts.
///
/// With `owner_id` set, a project owned by someone else is reported as
/// missing rather than forbidden.
pub async fn get_project_detail(
    store: &dyn Store,
    id: &str,
    owner_id: Option<&str>,
) -> Result<Option<ProjectDetail>> {
    let project = match store.get_project(id).await? {
        Some(p) => p,
        None => return Ok(None),
    };
    if let Some(owner) = owner_id {
        if project.owner_id != owner {
            return Ok(None);
        }
    }

    let artifacts = store.list_artifacts(id).await?;
    Ok(Some(ProjectDetail { project, artifacts }))
}

/// An owner's projects, newest first, with artifact counts.
pub async fn list_owner_projects(store: &dyn Store, owner_id: &str) -> Result<Vec<ProjectSummary>> {
    store.list_projects(owner_id).await
}

/// CLI entry point for `repodoc status`.
pub async fn run_status(config: &Config, id: &str, owner_id: Option<&str>, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let detail = get_project_detail(&store, id, owner_id).await;
    store.close().await;

    let detail = match detail? {
        Some(d) => d,
        None => {
            eprintln!("Error: project not found: {}", id);
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let p = &detail.project;
    println!("--- Project ---");
    println!("id:           {}", p.id);
    println!("name:         {}", p.name);
    println!("owner:        {}", p.owner_id);
    println!("source:       {} ({})", p.source, p.source_kind.as_str());
    println!("status:       {}", p.status);
    println!("created_at:   {}", format_ts_iso(&p.created_at));
    if let Some(ref done) = p.completed_at {
        println!("completed_at: {}", format_ts_iso(done));
    }
    if let Some(ref path) = p.local_path {
        println!("local_path:   {}", path);
    }
    println!();

    println!("--- Artifacts ({}) ---", detail.artifacts.len());
    for a in &detail.artifacts {
        println!("[{}] {} ({} bytes)", a.kind.as_str(), a.name, a.content.len());
    }

    Ok(())
}

/// CLI entry point for `repodoc list`.
pub async fn run_list(config: &Config, owner_id: &str, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let projects = list_owner_projects(&store, owner_id).await;
    store.close().await;
    let projects = projects?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }

    if projects.is_empty() {
        println!("No projects for owner '{}'.", owner_id);
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:>9}  {:<20}  NAME",
        "ID", "STATUS", "ARTIFACTS", "CREATED"
    );
    for s in &projects {
        println!(
            "{:<36}  {:<10}  {:>9}  {:<20}  {}",
            s.project.id,
            s.project.status.as_str(),
            s.artifact_count,
            format_ts_iso(&s.project.created_at),
            s.project.name
        );
    }

    Ok(())
}

fn format_ts_iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artifact, ArtifactKind, Project, Submission};
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn detail_is_scoped_to_owner() {
        let store = InMemoryStore::new();
        let p = Project::new_pending("alice", &Submission::git("https://example.com/a/tool.git"));
        store.create_project(&p).await.unwrap();
        store
            .upsert_artifact(
                &p.id,
                &Artifact {
                    name: "README".into(),
                    kind: ArtifactKind::Readme,
                    content: "# tool".into(),
                    source_path: None,
                },
            )
            .await
            .unwrap();

        let own = get_project_detail(&store, &p.id, Some("alice")).await.unwrap();
        assert_eq!(own.unwrap().artifacts.len(), 1);

        let other = get_project_detail(&store, &p.id, Some("bob")).await.unwrap();
        assert!(other.is_none());

        let unscoped = get_project_detail(&store, &p.id, None).await.unwrap();
        assert!(unscoped.is_some());

        assert!(get_project_detail(&store, "missing", None).await.unwrap().is_none());
    }

    #[test]
    fn timestamps_format_as_utc_seconds() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(format_ts_iso(&ts), "2023-11-14T22:13:20Z");
    }
}
