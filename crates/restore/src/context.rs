//! Sandboxed output directory and deferred verification for one restore.

use crate::error::{RestoreError, RestoreResult};
use std::future::Future;
use std::io;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs::{File, OpenOptions};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Process-wide context handed to file handlers through [`FileContext`].
///
/// All paths are relative to the restore directory; anything that would
/// resolve outside of it is rejected with [`RestoreError::PathEscape`].
#[derive(Clone)]
pub struct ProcessContext {
    inner: Arc<ProcessContextInner>,
}

struct ProcessContextInner {
    root: PathBuf,
    cancel: CancellationToken,
    checks: Mutex<JoinSet<RestoreResult<()>>>,
}

impl ProcessContext {
    pub fn new(root: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ProcessContextInner {
                root: root.into(),
                cancel,
                checks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// The restore directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Cancelled when the restore is aborted.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn lock_checks(&self) -> MutexGuard<'_, JoinSet<RestoreResult<()>>> {
        self.inner.checks.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Async check set lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `check` concurrently with the rest of the restore.
    ///
    /// The restore does not complete before every registered check has
    /// reported; the first failing check fails the restore.
    pub fn check_async<F>(&self, check: F)
    where
        F: Future<Output = RestoreResult<()>> + Send + 'static,
    {
        let cancel = self.inner.cancel.clone();
        self.lock_checks().spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RestoreError::Canceled),
                result = check => result,
            }
        });
    }

    /// Number of registered checks that have not been collected yet.
    pub fn outstanding(&self) -> usize {
        self.lock_checks().len()
    }

    /// Collect checks that already finished, returning the first failure.
    pub fn check_failures(&self) -> RestoreResult<()> {
        let mut checks = self.lock_checks();
        while let Some(joined) = checks.try_join_next() {
            joined_result(joined)?;
        }
        Ok(())
    }

    /// Wait for every registered check and return the first failure.
    ///
    /// Checks still running when one fails are aborted.
    pub async fn wait_for_async_checks(&self) -> RestoreResult<()> {
        let mut checks = std::mem::take(&mut *self.lock_checks());
        tracing::debug!(outstanding = checks.len(), "Waiting for async checks");
        while let Some(joined) = checks.join_next().await {
            joined_result(joined)?;
        }
        Ok(())
    }

    /// Resolve `relative` inside the restore directory.
    pub async fn resolve_path(&self, relative: impl AsRef<Path>) -> RestoreResult<PathBuf> {
        let root = self.inner.root.clone();
        let relative = relative.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || resolve_path_sync(&root, &relative))
            .await
            .map_err(|e| RestoreError::Infrastructure(format!("spawn_blocking failed: {e}")))?
    }

    /// Open a file inside the restore directory.
    pub async fn open_file(
        &self,
        relative: impl AsRef<Path>,
        options: &OpenOptions,
    ) -> RestoreResult<File> {
        let path = self.resolve_path(relative).await?;
        Ok(options.open(&path).await?)
    }

    /// Create a directory (and its parents) inside the restore directory.
    pub async fn mkdir(&self, relative: impl AsRef<Path>) -> RestoreResult<()> {
        let path = self.resolve_path(relative).await?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(())
    }
}

fn joined_result(
    joined: Result<RestoreResult<()>, tokio::task::JoinError>,
) -> RestoreResult<()> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(RestoreError::AsyncCheck(
            "verification task panicked".to_string(),
        )),
        Err(_) => Err(RestoreError::Canceled),
    }
}

fn escape(relative: &Path, what: &str) -> RestoreError {
    RestoreError::PathEscape(format!("{}: {what}", relative.display()))
}

/// Resolve `relative` under `root`, refusing anything that escapes it.
///
/// Besides rejecting absolute and non-normal components, this follows
/// symlinks: the target itself if it exists, otherwise its nearest existing
/// ancestor, must canonicalize to somewhere inside `root`.
fn resolve_path_sync(root: &Path, relative: &Path) -> RestoreResult<PathBuf> {
    if relative.as_os_str().is_empty() {
        return Err(escape(relative, "empty path"));
    }
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(escape(relative, "contains an unsafe path component"));
    }

    let path = root.join(relative);
    let root_canonical = root.canonicalize().map_err(|e| {
        RestoreError::Io(io::Error::new(
            e.kind(),
            format!("failed to canonicalize restore root: {e}"),
        ))
    })?;

    // The path itself if it exists, else its closest existing ancestor.
    let mut candidate = path.as_path();
    loop {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let canonical = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        escape(relative, "dangling symlink")
                    } else {
                        RestoreError::Io(io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(escape(relative, "resolves outside the restore directory"));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(RestoreError::Io(io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }
        match candidate.parent() {
            Some(parent) => candidate = parent,
            None => return Ok(path),
        }
    }
}

/// A [`ProcessContext`] scoped to one manifest entry.
#[derive(Clone)]
pub struct FileContext {
    process: ProcessContext,
    file_name: String,
    index: usize,
}

impl FileContext {
    pub fn new(process: ProcessContext, file_name: impl Into<String>, index: usize) -> Self {
        Self {
            process,
            file_name: file_name.into(),
            index,
        }
    }

    /// Name of the manifest file being restored.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Position of the file in the manifest.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for FileContext {
    type Target = ProcessContext;

    fn deref(&self) -> &ProcessContext {
        &self.process
    }
}
