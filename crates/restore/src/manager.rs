//! Owner of the single active restore process.

use crate::analyzer::analyze;
use crate::error::{RestoreError, RestoreResult};
use crate::process::{AttemptHandle, NewProcess, RestoreProcess};
use crate::reader::PhysicalReader;
use crate::registry::FormatRegistry;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::config::RestoreConfig;
use warden_core::{AttemptId, RestoreHeader, RestoreId, ResumeInfo};

/// Restarts the service after a successful restore so it picks up the
/// restored data.
pub trait Restarter: Send + Sync {
    fn restart(&self);
}

/// Runs at most one restore at a time.
pub struct Manager {
    registry: Arc<FormatRegistry>,
    config: RestoreConfig,
    restarter: Arc<dyn Restarter>,
    active: RwLock<Option<Arc<RestoreProcess>>>,
    shutdown: CancellationToken,
}

impl Manager {
    pub fn new(
        registry: Arc<FormatRegistry>,
        config: RestoreConfig,
        restarter: Arc<dyn Restarter>,
    ) -> Self {
        Self {
            registry,
            config,
            restarter,
            active: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    /// Cancels every restore this manager started.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate `header`, then start restoring from `reader`.
    ///
    /// Fails without side effects if the format is unknown, the manifest does
    /// not match it, or another restore is active.
    pub fn launch_restore_process(
        self: &Arc<Self>,
        header: RestoreHeader,
        reader: PhysicalReader,
        initiating_user: Option<String>,
    ) -> RestoreResult<(Arc<RestoreProcess>, AttemptHandle)> {
        let format = self
            .registry
            .get_format(&header.format_name)
            .ok_or_else(|| RestoreError::UnknownFormat(header.format_name.clone()))?;
        let analysis = analyze(&header.manifest, &format)?;

        let process = {
            let mut active = self.active.write().unwrap_or_else(|poisoned| {
                warn!("Active restore lock was poisoned, recovering");
                poisoned.into_inner()
            });
            if let Some(existing) = active.as_ref() {
                return Err(RestoreError::AlreadyActive(existing.id().to_string()));
            }

            let process = Arc::new(RestoreProcess::new(NewProcess {
                id: RestoreId::new(),
                header,
                files: analysis.files,
                postgres_bundle: format.is_postgres_bundle(),
                initiating_user,
                reader,
                attempt_id: AttemptId::new(),
                restore_root: self.config.restore_root.clone(),
                reattach_timeout: self.config.reattach_timeout(),
                resume_accept_timeout: self.config.resume_accept_timeout(),
                parent: self.shutdown.clone(),
            }));
            *active = Some(process.clone());
            process
        };

        let handle = match process.launch() {
            Ok(handle) => handle,
            Err(err) => {
                self.release(&process);
                return Err(err);
            }
        };
        info!(
            restore_id = %process.id(),
            format = %format.name(),
            decoded_bytes = analysis.total_decoded_bytes,
            "Restore process started"
        );
        self.supervise(process.clone());
        Ok((process, handle))
    }

    fn supervise(self: &Arc<Self>, process: Arc<RestoreProcess>) {
        let manager = self.clone();
        tokio::spawn(async move {
            match process.wait().await {
                Ok(()) => {
                    let grace = manager.config.restart_grace_period();
                    info!(restore_id = %process.id(), grace = ?grace, "Restore succeeded, restarting service");
                    tokio::select! {
                        _ = manager.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(grace) => manager.restarter.restart(),
                    }
                }
                Err(err) => {
                    info!(restore_id = %process.id(), error = %err, "Restore failed, releasing slot");
                    manager.release(&process);
                }
            }
        });
    }

    fn release(&self, process: &Arc<RestoreProcess>) {
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, process))
        {
            *active = None;
        }
    }

    /// The active process, if any.
    pub fn active_process(&self) -> Option<Arc<RestoreProcess>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The active process, if it has the given id.
    pub fn get_process(&self, id: RestoreId) -> RestoreResult<Arc<RestoreProcess>> {
        self.active_process()
            .filter(|process| process.id() == id)
            .ok_or_else(|| RestoreError::NotFound(id.to_string()))
    }

    /// Interrupt the current attempt of process `id`.
    pub async fn interrupt(&self, id: RestoreId, attempt_id: &AttemptId) -> RestoreResult<ResumeInfo> {
        let process = self.get_process(id)?;
        let timeout = self.config.interrupt_timeout();
        tokio::time::timeout(timeout, process.interrupt(attempt_id))
            .await
            .map_err(|_| RestoreError::Timeout("interrupt", timeout))?
    }

    /// Resume process `id` from `reader`.
    pub async fn resume(
        &self,
        id: RestoreId,
        previous_attempt: &AttemptId,
        reader: PhysicalReader,
        position: u64,
        checksum: u32,
    ) -> RestoreResult<(Arc<RestoreProcess>, AttemptHandle)> {
        let process = self.get_process(id)?;
        let handle = process
            .resume(previous_attempt, reader, position, checksum)
            .await?;
        Ok((process, handle))
    }

    /// Cancel process `id`.
    pub fn cancel(&self, id: RestoreId) -> RestoreResult<()> {
        self.get_process(id)?.cancel();
        Ok(())
    }
}
