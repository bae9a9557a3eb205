//! Source acquisition: materializes a repository on local storage.
//!
//! Every call allocates a fresh `<repos_root>/<owner>_<uuid>` directory and
//! fills it either with `git clone` or by extracting an uploaded zip archive.
//! Nothing from a failed acquisition is left behind.
//!
//! Git sources must be remote: `http(s)://`, `ssh://`, `git://` or scp-style
//! `[user@]host:path`. Local paths and `file://` URLs are refused so that a
//! submitter cannot read repositories from the server's filesystem.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::Source;
use crate::runs::CancelSignal;

/// Result of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Directory allocated for this run; removing it reclaims everything.
    pub root: PathBuf,
    /// Materialized source tree handed to the tool. Equal to `root` unless
    /// an archive wrapped its content in a single folder.
    pub path: PathBuf,
}

#[async_trait]
pub trait SourceAcquirer: Send + Sync {
    async fn acquire(
        &self,
        owner_id: &str,
        source: &Source,
        cancel: &CancelSignal,
    ) -> PipelineResult<Acquired>;
}

/// Transports `git clone` may use.
const GIT_ALLOWED_PROTOCOLS: &str = "https:http:ssh:git";

/// Whether `url` names a remote git repository.
pub fn is_remote_git_url(url: &str) -> bool {
    if url.starts_with('-') {
        return false;
    }
    if let Some((scheme, rest)) = url.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        return matches!(scheme.as_str(), "https" | "http" | "ssh" | "git" | "git+ssh")
            && !rest.is_empty()
            && !rest.starts_with('/');
    }
    // scp-style: a ':' before any '/'.
    match url.split_once(':') {
        Some((host, path)) => !host.is_empty() && !host.contains('/') && !path.is_empty(),
        None => false,
    }
}

/// [`SourceAcquirer`] writing under a local storage root.
#[derive(Debug, Clone)]
pub struct LocalAcquirer {
    repos_root: PathBuf,
    git_depth: u32,
}

impl LocalAcquirer {
    pub fn new(repos_root: impl Into<PathBuf>) -> Self {
        Self {
            repos_root: repos_root.into(),
            git_depth: 1,
        }
    }

    /// Clone depth; 0 performs a full clone.
    pub fn with_git_depth(mut self, depth: u32) -> Self {
        self.git_depth = depth;
        self
    }

    /// Create a new, never-before-used directory for `owner_id`.
    pub fn allocate_dir(&self, owner_id: &str) -> PipelineResult<PathBuf> {
        std::fs::create_dir_all(&self.repos_root).map_err(|e| {
            PipelineError::acquisition(format!(
                "cannot create storage root {}: {}",
                self.repos_root.display(),
                e
            ))
        })?;

        let dir = self
            .repos_root
            .join(format!("{}_{}", sanitize_owner(owner_id), Uuid::new_v4()));
        // create_dir (not create_dir_all) fails instead of reusing an existing path.
        std::fs::create_dir(&dir).map_err(|e| {
            PipelineError::acquisition(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    async fn clone_repo(&self, url: &str, dest: &Path, cancel: &CancelSignal) -> PipelineResult<()> {
        if !is_remote_git_url(url) {
            return Err(PipelineError::acquisition(format!(
                "not a remote git URL: {}",
                url
            )));
        }

        let mut cmd = Command::new("git");
        cmd.args(["-c", "protocol.file.allow=never", "clone"]);
        if self.git_depth > 0 {
            cmd.args(["--depth", &self.git_depth.to_string()]);
        }
        cmd.arg("--")
            .arg(url)
            .arg(dest)
            // Fail instead of waiting for credentials on a private repository.
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ALLOW_PROTOCOL", GIT_ALLOWED_PROTOCOLS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::acquisition(format!("failed to execute 'git clone': {}", e)))?;

        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(|e| {
                PipelineError::acquisition(format!("failed to wait for 'git clone': {}", e))
            })?,
            _ = cancel.cancelled() => return Err(PipelineError::acquisition("git clone cancelled")),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::acquisition(format!(
                "git clone failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn extract_upload(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> PipelineResult<PathBuf> {
        let archive_owned = archive.to_path_buf();
        let dest_owned = dest.to_path_buf();
        let stop = Arc::new(AtomicBool::new(false));
        let job_stop = Arc::clone(&stop);
        let mut job = tokio::task::spawn_blocking(move || -> anyhow::Result<PathBuf> {
            extract_zip(&archive_owned, &dest_owned, &job_stop)?;
            Ok(reroot_single_dir(&dest_owned)?)
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // spawn_blocking cannot be aborted; wait for it before cleanup.
                stop.store(true, Ordering::Relaxed);
                let _ = (&mut job).await;
                Err(PipelineError::acquisition("archive extraction cancelled"))
            }
            res = &mut job => match res {
                Ok(inner) => inner.map_err(|e| PipelineError::acquisition(format!("{:#}", e))),
                Err(join) => Err(PipelineError::acquisition(format!("extraction task failed: {}", join))),
            },
        };

        // The staged upload is consumed either way.
        if let Err(e) = tokio::fs::remove_file(archive).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %archive.display(), "failed to remove uploaded archive: {}", e);
            }
        }

        result
    }
}

#[async_trait]
impl SourceAcquirer for LocalAcquirer {
    async fn acquire(
        &self,
        owner_id: &str,
        source: &Source,
        cancel: &CancelSignal,
    ) -> PipelineResult<Acquired> {
        let root = self.allocate_dir(owner_id)?;

        let materialized = match source {
            Source::Git { url } => self.clone_repo(url, &root, cancel).await.map(|_| root.clone()),
            Source::Archive { path, .. } => self.extract_upload(path, &root, cancel).await,
        };

        let verified = match materialized {
            Ok(path) => verify_accessible(&path).await.map(|_| path),
            Err(e) => Err(e),
        };

        match verified {
            Ok(path) => {
                tracing::info!(source = source.descriptor(), path = %path.display(), "source materialized");
                Ok(Acquired { root, path })
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir_all(&root).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %root.display(), "failed to remove partial acquisition: {}", rm);
                    }
                }
                Err(e)
            }
        }
    }
}

async fn verify_accessible(path: &Path) -> PipelineResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(PipelineError::acquisition(format!(
            "{} is not a directory",
            path.display()
        ))),
        Err(e) => Err(PipelineError::acquisition(format!(
            "{} is not accessible: {}",
            path.display(),
            e
        ))),
    }
}

/// Extract every entry of a zip archive under `dest`.
///
/// Entries whose names would escape `dest` (absolute paths, `..`) abort the
/// extraction, as does `stop` being set; it is checked before every entry.
pub fn extract_zip(archive: &Path, dest: &Path, stop: &AtomicBool) -> anyhow::Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip archive: {}", archive.display()))?;

    for i in 0..zip.len() {
        if stop.load(Ordering::Relaxed) {
            anyhow::bail!("extraction stopped after {} of {} entries", i, zip.len());
        }
        let mut entry = zip.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| anyhow::anyhow!("unsafe entry path in archive: {}", entry.name()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", out_path.display()))?;
    }

    Ok(())
}

/// If `root` holds exactly one entry and it is a directory, return that
/// directory; otherwise `root`. Applied once, not recursively.
pub fn reroot_single_dir(root: &Path) -> std::io::Result<PathBuf> {
    let mut entries = std::fs::read_dir(root)?.collect::<Result<Vec<_>, _>>()?;
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        return Ok(entries.remove(0).path());
    }
    Ok(root.to_path_buf())
}

fn sanitize_owner(owner_id: &str) -> String {
    let cleaned: String = owner_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}
