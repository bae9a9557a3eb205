//! Core data models used throughout Repodoc.
//!
//! These types represent the projects, artifacts, and submissions that flow
//! through the ingestion and documentation-generation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Reserved artifact name under which the top-level summary document is stored.
pub const SUMMARY_ARTIFACT_NAME: &str = "README";

/// Lifecycle status of a [`Project`].
///
/// ```text
/// pending ──▶ analyzing ──▶ generating ──▶ completed
///    │            │             │
///    └────────────┴─────────────┴──────▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Analyzing,
    Generating,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Analyzing => "analyzing",
            ProjectStatus::Generating => "generating",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    /// `true` for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, next),
            (Pending, Analyzing)
                | (Analyzing, Generating)
                | (Generating, Completed)
                | (Pending, Failed)
                | (Analyzing, Failed)
                | (Generating, Failed)
        )
    }

    /// Statuses from which `self` may be entered.
    pub fn predecessors(&self) -> &'static [ProjectStatus] {
        use ProjectStatus::*;
        match self {
            Pending => &[],
            Analyzing => &[Pending],
            Generating => &[Analyzing],
            Completed => &[Generating],
            Failed => &[Pending, Analyzing, Generating],
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(ProjectStatus::Pending),
            "analyzing" => Ok(ProjectStatus::Analyzing),
            "generating" => Ok(ProjectStatus::Generating),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            other => anyhow::bail!("unknown project status: '{}'", other),
        }
    }
}

/// How a project's source reaches local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Remote version-control URL, materialized with `git clone`.
    Git,
    /// Uploaded zip archive, materialized by extraction.
    Archive,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Archive => "archive",
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            // Hosting-provider labels all clone the same way.
            "git" | "github" | "gitlab" | "bitbucket" => Ok(SourceKind::Git),
            "archive" | "zip" => Ok(SourceKind::Archive),
            other => anyhow::bail!("unknown source kind: '{}'", other),
        }
    }
}

/// Where the pipeline fetches a repository from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Clone this remote URL.
    Git { url: String },
    /// Extract the staged upload at `path`. `file_name` is the client's
    /// original file name and becomes the project's source descriptor.
    Archive { path: PathBuf, file_name: String },
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Git { .. } => SourceKind::Git,
            Source::Archive { .. } => SourceKind::Archive,
        }
    }

    /// The descriptor persisted on the project record.
    pub fn descriptor(&self) -> &str {
        match self {
            Source::Git { url } => url,
            Source::Archive { file_name, .. } => file_name,
        }
    }

    /// Display name derived from the descriptor: last URL segment without
    /// `.git`, or the archive file name without `.zip`.
    pub fn default_name(&self) -> String {
        match self {
            Source::Git { url } => {
                let last = url
                    .trim_end_matches('/')
                    .rsplit(['/', ':'])
                    .next()
                    .unwrap_or(url);
                let name = last.strip_suffix(".git").unwrap_or(last);
                if name.is_empty() {
                    url.clone()
                } else {
                    name.to_string()
                }
            }
            Source::Archive { file_name, .. } => file_name
                .strip_suffix(".zip")
                .unwrap_or(file_name)
                .to_string(),
        }
    }
}

/// A client request to ingest a repository.
#[derive(Debug, Clone)]
pub struct Submission {
    pub source: Source,
    /// Optional explicit display name; derived from the source otherwise.
    pub name: Option<String>,
}

impl Submission {
    pub fn git(url: impl Into<String>) -> Self {
        Self {
            source: Source::Git { url: url.into() },
            name: None,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            source: Source::Archive {
                path: path.into(),
                file_name: file_name.into(),
            },
            name: None,
        }
    }
}

/// One ingested repository and its documentation-generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub source: String,
    pub source_kind: SourceKind,
    /// Server-side working directory; never exposed to clients.
    #[serde(skip_serializing)]
    pub local_path: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Build a fresh `pending` project for a submission.
    pub fn new_pending(owner_id: &str, submission: &Submission) -> Self {
        let name = submission
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| submission.source.default_name());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name,
            source: submission.source.descriptor().to_string(),
            source_kind: submission.source.kind(),
            local_path: None,
            status: ProjectStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Kind of documentation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// One document from the tool's analysis directory.
    Analysis,
    /// The top-level summary document.
    Readme,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Analysis => "analysis",
            ArtifactKind::Readme => "readme",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "analysis" => Ok(ArtifactKind::Analysis),
            "readme" => Ok(ArtifactKind::Readme),
            other => anyhow::bail!("unknown artifact kind: '{}'", other),
        }
    }
}

/// A named documentation output collected from the tool, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub content: String,
    /// Path the content was read from (diagnostics only).
    pub source_path: Option<String>,
}

/// A persisted artifact, as returned from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredArtifact {
    pub project_id: String,
    pub name: String,
    pub kind: ArtifactKind,
    pub content: String,
    pub source_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Project detail with every artifact persisted so far.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub artifacts: Vec<StoredArtifact>,
}

/// Listing row: a project plus how many artifacts it has.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    pub artifact_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_state_machine() {
        use ProjectStatus::*;
        assert!(Pending.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Generating.can_transition_to(Failed));

        assert!(!Analyzing.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Analyzing));
    }

    #[test]
    fn predecessors_agree_with_transitions() {
        use ProjectStatus::*;
        let all = [Pending, Analyzing, Generating, Completed, Failed];
        for to in all {
            for from in all {
                assert_eq!(
                    from.can_transition_to(to),
                    to.predecessors().contains(&from),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn default_name_from_git_url() {
        let s = Source::Git {
            url: "https://github.com/acme/widgets.git".into(),
        };
        assert_eq!(s.default_name(), "widgets");

        let s = Source::Git {
            url: "git@github.com:acme/gadgets".into(),
        };
        assert_eq!(s.default_name(), "gadgets");
    }

    #[test]
    fn default_name_from_archive() {
        let s = Source::Archive {
            path: "/tmp/upload-1".into(),
            file_name: "my-project.zip".into(),
        };
        assert_eq!(s.default_name(), "my-project");
        assert_eq!(s.descriptor(), "my-project.zip");
    }

    #[test]
    fn source_kind_accepts_provider_labels() {
        assert_eq!("github".parse::<SourceKind>().unwrap(), SourceKind::Git);
        assert_eq!("zip".parse::<SourceKind>().unwrap(), SourceKind::Archive);
        assert!("svn".parse::<SourceKind>().is_err());
    }

    #[test]
    fn new_project_is_pending() {
        let p = Project::new_pending("u1", &Submission::git("https://example.com/repo.git"));
        assert_eq!(p.status, ProjectStatus::Pending);
        assert_eq!(p.name, "repo");
        assert_eq!(p.source_kind, SourceKind::Git);
        assert!(p.local_path.is_none());
        assert!(p.completed_at.is_none());
    }

    #[test]
    fn local_path_is_not_serialized() {
        let mut p = Project::new_pending("u1", &Submission::git("https://example.com/repo.git"));
        p.local_path = Some("/srv/repos/u1_abc".into());
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("local_path").is_none());
        assert!(!json.to_string().contains("/srv/repos"));
        assert_eq!(json["name"], "repo");
    }
}
