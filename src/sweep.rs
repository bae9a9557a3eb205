//! Retention sweep over the materialized-source storage root.
//!
//! Finished runs remove their own directories; this reclaims the ones
//! orphaned by a crash mid-run. Any top-level directory whose modification
//! time is older than the threshold is removed recursively. One failed
//! removal is logged and the sweep moves on.
//!
//! Dot-directories (such as the default `.uploads` staging area) are never
//! touched.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    /// Candidate directories inspected.
    pub scanned: usize,
    /// Directories removed (or that would be removed in a dry run).
    pub removed: Vec<PathBuf>,
    /// Directories that could not be inspected or removed.
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
pub struct Sweeper {
    root: PathBuf,
    max_age: Duration,
    dry_run: bool,
}

impl Sweeper {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            root: root.into(),
            max_age,
            dry_run: false,
        }
    }

    /// Report what would be removed without deleting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(SystemTime::now(), |p| std::fs::remove_dir_all(p))
    }

    /// Sweep as of `now`, deleting with `remove`.
    pub fn sweep_at<F>(&self, now: SystemTime, mut remove: F) -> Result<SweepReport>
    where
        F: FnMut(&Path) -> std::io::Result<()>,
    {
        let mut report = SweepReport::default();
        if !self.root.exists() {
            return Ok(report);
        }

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    tracing::warn!(path = %path.display(), "cannot inspect entry: {}", e);
                    report.failed.push((path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            report.scanned += 1;

            let path = entry.path().to_path_buf();
            let modified = match entry.metadata().map_err(|e| e.to_string()).and_then(|m| {
                m.modified().map_err(|e| e.to_string())
            }) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "cannot read modification time: {}", e);
                    report.failed.push((path, e));
                    continue;
                }
            };

            // A modification time in the future counts as fresh.
            let expired = now
                .duration_since(modified)
                .map(|age| age > self.max_age)
                .unwrap_or(false);
            if !expired {
                continue;
            }

            if self.dry_run {
                report.removed.push(path);
                continue;
            }

            match remove(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed expired source directory");
                    report.removed.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to remove expired directory: {}", e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        tracing::info!(
            root = %self.root.display(),
            scanned = report.scanned,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "retention sweep complete"
        );
        Ok(report)
    }
}

/// Run `sweeper` every `interval` on the blocking pool until the task is aborted.
pub fn spawn_periodic(sweeper: Sweeper, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let s = sweeper.clone();
            match tokio::task::spawn_blocking(move || s.sweep()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("retention sweep failed: {:#}", e),
                Err(e) => tracing::warn!("retention sweep task failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn dir_with_age(root: &Path, name: &str, age: Duration) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("main.py"), "print(1)").unwrap();
        let when = SystemTime::now() - age;
        File::open(&dir).unwrap().set_modified(when).unwrap();
        dir
    }

    #[test]
    fn removes_only_expired_directories() {
        let tmp = TempDir::new().unwrap();
        let old = dir_with_age(tmp.path(), "u1_old", 10 * DAY);
        let fresh = dir_with_age(tmp.path(), "u1_fresh", DAY);

        let report = Sweeper::new(tmp.path(), 7 * DAY).sweep().unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(report.failed.is_empty());
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn continues_after_a_failed_removal() {
        let tmp = TempDir::new().unwrap();
        let a = dir_with_age(tmp.path(), "a_old", 30 * DAY);
        let b = dir_with_age(tmp.path(), "b_old", 30 * DAY);
        let c = dir_with_age(tmp.path(), "c_old", 30 * DAY);

        let report = Sweeper::new(tmp.path(), 7 * DAY)
            .sweep_at(SystemTime::now(), |p| {
                if p.ends_with("b_old") {
                    Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "busy"))
                } else {
                    fs::remove_dir_all(p)
                }
            })
            .unwrap();

        assert_eq!(report.removed, vec![a.clone(), c.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, b);
        assert!(!a.exists() && !c.exists());
        assert!(b.exists());
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let tmp = TempDir::new().unwrap();
        let old = dir_with_age(tmp.path(), "u1_old", 10 * DAY);

        let report = Sweeper::new(tmp.path(), 7 * DAY)
            .dry_run(true)
            .sweep()
            .unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(old.exists());
    }

    #[test]
    fn skips_files_and_dot_directories() {
        let tmp = TempDir::new().unwrap();
        dir_with_age(tmp.path(), ".uploads", 30 * DAY);
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        let report = Sweeper::new(tmp.path(), 7 * DAY).sweep().unwrap();
        assert_eq!(report.scanned, 0);
        assert!(tmp.path().join(".uploads").exists());
        assert!(tmp.path().join("stray.txt").exists());
    }

    #[test]
    fn missing_root_is_empty_report() {
        let tmp = TempDir::new().unwrap();
        let report = Sweeper::new(tmp.path().join("absent"), DAY).sweep().unwrap();
        assert_eq!(report.scanned, 0);
    }
}
