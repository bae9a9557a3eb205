//! Pipeline orchestration.
//!
//! Drives one project through the state machine:
//!
//! ```text
//! submit ─▶ pending ─acquire─▶ analyzing ─analyze─▶ generating ─generate+collect─▶ completed
//!              │                   │                    │
//!              └───────────────────┴────────────────────┴──── any fatal error ───▶ failed
//! ```
//!
//! A status is persisted *before* the stage it names starts, so a client
//! polling mid-stage sees the stage in progress. After either terminal
//! status the run's materialized source is removed; only the project record
//! and its artifacts outlive the run.
//!
//! Runs are spawned as background tasks and tracked in a [`RunRegistry`]
//! keyed by project id. Each run gets a [`CancelSignal`] that is threaded
//! through acquisition and both tool phases.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::acquire::{Acquired, LocalAcquirer, SourceAcquirer};
use crate::collect::{collect_artifacts, Collection, OutputLayout};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Project, ProjectStatus, Source, Submission};
use crate::progress::{PipelineEvent, ProgressReporter, TracingProgress};
use crate::runs::{CancelSignal, RunRegistry};
use crate::store::Store;
use crate::tool::{CommandInvoker, Phase, ToolInvoker};

/// Execution context of a single run. Owned by exactly one task.
#[derive(Debug)]
pub struct PipelineRun {
    pub project_id: String,
    pub owner_id: String,
    pub source: Source,
    pub acquired: Option<Acquired>,
    /// Last status persisted by this run.
    pub stage: ProjectStatus,
    /// Non-fatal errors (artifact persistence, cleanup) and the fatal one, if any.
    pub errors: Vec<PipelineError>,
    cancel: CancelSignal,
}

impl PipelineRun {
    fn new(project: &Project, source: Source, cancel: CancelSignal) -> Self {
        Self {
            project_id: project.id.clone(),
            owner_id: project.owner_id.clone(),
            source,
            acquired: None,
            stage: project.status,
            errors: Vec::new(),
            cancel,
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub project_id: String,
    /// `Completed` or `Failed`.
    pub status: ProjectStatus,
    /// Names of the artifacts that were persisted.
    pub stored: Vec<String>,
    pub errors: Vec<PipelineError>,
}

/// Sequences acquisition, the two tool phases, and artifact persistence
/// for each submitted project.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    acquirer: Arc<dyn SourceAcquirer>,
    tool: Arc<dyn ToolInvoker>,
    layout: OutputLayout,
    progress: Arc<dyn ProgressReporter>,
    runs: RunRegistry,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        acquirer: Arc<dyn SourceAcquirer>,
        tool: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            store,
            acquirer,
            tool,
            layout: OutputLayout::default(),
            progress: Arc::new(TracingProgress),
            runs: RunRegistry::new(),
        }
    }

    /// Wire the production acquirer and tool invoker from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Self {
        let acquirer =
            LocalAcquirer::new(&config.storage.repos_root).with_git_depth(config.git.depth);
        let tool = CommandInvoker::from_config(&config.tool);
        Self::new(store, Arc::new(acquirer), Arc::new(tool))
            .with_layout(OutputLayout::from_config(&config.artifacts))
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Create a `pending` project and start its pipeline in the background.
    ///
    /// Returns as soon as the record exists; the run continues independently.
    pub async fn submit(&self, owner_id: &str, submission: Submission) -> PipelineResult<Project> {
        let project = Project::new_pending(owner_id, &submission);
        self.store.create_project(&project).await?;
        tracing::info!(project = %project.id, source = %project.source, "project submitted");
        self.report_status(&project.id, ProjectStatus::Pending);

        self.launch(&project, submission.source).await?;
        Ok(project)
    }

    /// Spawn the run for a freshly created project. A project whose run
    /// cannot start is failed rather than left `pending`.
    async fn launch(&self, project: &Project, source: Source) -> PipelineResult<()> {
        let Err(e) = self.spawn(project, source) else {
            return Ok(());
        };
        tracing::error!(project = %project.id, "could not start pipeline: {}", e);
        match self.store.update_status(&project.id, ProjectStatus::Failed).await {
            Ok(()) => self.report_status(&project.id, ProjectStatus::Failed),
            Err(status_err) => {
                tracing::warn!(project = %project.id, "failed to persist failed status: {:#}", status_err)
            }
        }
        Err(e)
    }

    /// Start a background run for an existing `pending` project.
    pub fn spawn(&self, project: &Project, source: Source) -> PipelineResult<()> {
        let cancel = self.runs.register(&project.id)?;
        let slot = RunSlot {
            runs: self.runs.clone(),
            project_id: project.id.clone(),
        };
        let this = self.clone();
        let run = PipelineRun::new(project, source, cancel);

        let task = tokio::spawn(async move {
            let _slot = slot;
            this.execute(run).await;
        });
        self.runs.attach(&project.id, task);
        Ok(())
    }

    /// Run the pipeline for `project` on the current task and return its outcome.
    pub async fn run_project(&self, project: &Project, source: Source) -> PipelineResult<RunOutcome> {
        let cancel = self.runs.register(&project.id)?;
        let _slot = RunSlot {
            runs: self.runs.clone(),
            project_id: project.id.clone(),
        };
        Ok(self.execute(PipelineRun::new(project, source, cancel)).await)
    }

    /// Wait for a background run to finish. Returns immediately if the
    /// project has no active run.
    pub async fn wait(&self, project_id: &str) {
        if let Some(task) = self.runs.take_task(project_id) {
            if let Err(e) = task.await {
                tracing::error!(project = %project_id, "pipeline task aborted: {}", e);
            }
        }
    }

    /// Request cancellation of an active run. The run ends in `failed`.
    pub fn cancel(&self, project_id: &str) -> bool {
        self.runs.cancel(project_id)
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.runs.is_running(project_id)
    }

    /// Mark projects left mid-pipeline by a previous process as `failed`
    /// and remove their materialized sources. Returns how many were failed.
    pub async fn fail_interrupted(&self) -> anyhow::Result<usize> {
        let mut failed = 0;
        for project in self.store.list_unfinished().await? {
            if self.runs.is_running(&project.id) {
                continue;
            }
            match self.store.update_status(&project.id, ProjectStatus::Failed).await {
                Ok(()) => {
                    tracing::warn!(project = %project.id, status = %project.status, "failing interrupted run");
                    self.report_status(&project.id, ProjectStatus::Failed);
                    failed += 1;
                }
                Err(e) => {
                    tracing::warn!(project = %project.id, "could not fail interrupted run: {:#}", e);
                    continue;
                }
            }
            if let Some(path) = project.local_path.as_deref() {
                match remove_dir(Path::new(path)).await {
                    Ok(()) => {
                        if let Err(e) = self.store.set_local_path(&project.id, None).await {
                            tracing::warn!(project = %project.id, "failed to clear local path: {:#}", e);
                        }
                    }
                    Err(e) => tracing::warn!(project = %project.id, "{}", e),
                }
            }
        }
        Ok(failed)
    }

    async fn execute(&self, mut run: PipelineRun) -> RunOutcome {
        let result = self.advance(&mut run).await;

        let (status, stored) = match result {
            Ok(stored) => (ProjectStatus::Completed, stored),
            Err(e) => {
                tracing::error!(project = %run.project_id, stage = %run.stage, "pipeline failed: {}", e);
                run.errors.push(e);
                self.mark_failed(&mut run).await;
                (ProjectStatus::Failed, Vec::new())
            }
        };

        self.cleanup(&mut run).await;

        RunOutcome {
            project_id: run.project_id,
            status,
            stored,
            errors: run.errors,
        }
    }

    /// Every stage up to and including `completed`. Returns the names of
    /// the persisted artifacts.
    async fn advance(&self, run: &mut PipelineRun) -> PipelineResult<Vec<String>> {
        let acquired = self
            .acquirer
            .acquire(&run.owner_id, &run.source, &run.cancel)
            .await?;
        run.acquired = Some(acquired.clone());
        let local_path = acquired.path.to_string_lossy().to_string();
        self.store
            .set_local_path(&run.project_id, Some(local_path.as_str()))
            .await?;

        self.transition(run, ProjectStatus::Analyzing).await?;
        self.run_phase(run, Phase::Analyze, &acquired.path).await?;

        self.transition(run, ProjectStatus::Generating).await?;
        self.run_phase(run, Phase::GenerateReadme, &acquired.path).await?;

        let stored = self.persist_artifacts(run, &acquired.path).await;

        self.store
            .complete_project(&run.project_id, Utc::now())
            .await?;
        run.stage = ProjectStatus::Completed;
        self.report_status(&run.project_id, ProjectStatus::Completed);
        tracing::info!(project = %run.project_id, artifacts = stored.len(), "documentation ready");

        Ok(stored)
    }

    async fn transition(&self, run: &mut PipelineRun, status: ProjectStatus) -> PipelineResult<()> {
        self.store.update_status(&run.project_id, status).await?;
        run.stage = status;
        self.report_status(&run.project_id, status);
        Ok(())
    }

    async fn run_phase(&self, run: &PipelineRun, phase: Phase, path: &Path) -> PipelineResult<()> {
        self.tool.run(phase, path, &run.cancel).await?;
        self.progress.report(PipelineEvent::PhaseFinished {
            project_id: run.project_id.clone(),
            phase,
        });
        Ok(())
    }

    /// Collect and persist artifacts one by one. Failures are recorded on
    /// the run and never abort it.
    async fn persist_artifacts(&self, run: &mut PipelineRun, path: &Path) -> Vec<String> {
        let root = path.to_path_buf();
        let layout = self.layout.clone();
        let collection = match tokio::task::spawn_blocking(move || collect_artifacts(&root, &layout)).await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(project = %run.project_id, "artifact collection task failed: {}", e);
                Collection::default()
            }
        };

        for skipped in &collection.skipped {
            self.progress.report(PipelineEvent::ArtifactSkipped {
                project_id: run.project_id.clone(),
                name: skipped.path.display().to_string(),
                reason: skipped.reason.clone(),
            });
        }

        let mut stored = Vec::new();
        for artifact in &collection.artifacts {
            match self.store.upsert_artifact(&run.project_id, artifact).await {
                Ok(()) => {
                    stored.push(artifact.name.clone());
                    self.progress.report(PipelineEvent::ArtifactStored {
                        project_id: run.project_id.clone(),
                        name: artifact.name.clone(),
                    });
                }
                Err(e) => {
                    let err = PipelineError::ArtifactPersistFailed {
                        name: artifact.name.clone(),
                        reason: format!("{:#}", e),
                    };
                    self.progress.report(PipelineEvent::ArtifactSkipped {
                        project_id: run.project_id.clone(),
                        name: artifact.name.clone(),
                        reason: err.to_string(),
                    });
                    run.errors.push(err);
                }
            }
        }
        stored
    }

    async fn mark_failed(&self, run: &mut PipelineRun) {
        match self
            .store
            .update_status(&run.project_id, ProjectStatus::Failed)
            .await
        {
            Ok(()) => {
                run.stage = ProjectStatus::Failed;
                self.report_status(&run.project_id, ProjectStatus::Failed);
            }
            Err(e) => {
                tracing::error!(project = %run.project_id, "failed to persist failed status: {:#}", e);
            }
        }
    }

    /// Remove the run's local files. Errors are logged and recorded only.
    async fn cleanup(&self, run: &mut PipelineRun) {
        if let Some(acquired) = run.acquired.take() {
            match remove_dir(&acquired.root).await {
                Ok(()) => {
                    if let Err(e) = self.store.set_local_path(&run.project_id, None).await {
                        tracing::warn!(project = %run.project_id, "failed to clear local path: {:#}", e);
                    }
                }
                Err(e) => {
                    tracing::warn!(project = %run.project_id, "{}", e);
                    run.errors.push(e);
                }
            }
        }

        // An upload that never reached extraction is still staged.
        if let Source::Archive { path, .. } = &run.source {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(project = %run.project_id, path = %path.display(), "failed to remove staged upload: {}", e);
                }
            }
        }
    }

    fn report_status(&self, project_id: &str, status: ProjectStatus) {
        self.progress.report(PipelineEvent::Status {
            project_id: project_id.to_string(),
            status,
        });
    }
}

/// Releases a project's registry slot when the run ends, including by panic.
struct RunSlot {
    runs: RunRegistry,
    project_id: String,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.runs.finish(&self.project_id);
    }
}

async fn remove_dir(path: &Path) -> PipelineResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::CleanupFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::tool::ToolOutput;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl SourceAcquirer for Unreachable {
        async fn acquire(
            &self,
            _owner_id: &str,
            _source: &Source,
            _cancel: &CancelSignal,
        ) -> PipelineResult<Acquired> {
            Err(PipelineError::acquisition("unreachable"))
        }
    }

    #[async_trait]
    impl ToolInvoker for Unreachable {
        async fn run(
            &self,
            phase: Phase,
            _repo_path: &Path,
            _cancel: &CancelSignal,
        ) -> PipelineResult<ToolOutput> {
            Err(PipelineError::ExternalToolFailed {
                phase,
                diagnostics: "unreachable".into(),
            })
        }
    }

    #[tokio::test]
    async fn run_that_cannot_start_fails_the_project() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(Unreachable), Arc::new(Unreachable));
        let submission = Submission::git("https://example.com/repo.git");
        let project = Project::new_pending("u1", &submission);
        store.create_project(&project).await.unwrap();

        let _held = orchestrator.runs().register(&project.id).unwrap();
        let err = orchestrator
            .launch(&project, submission.source)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning(_)));

        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Failed);
    }
}
