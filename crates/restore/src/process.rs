//! The restore process state machine.
//!
//! A process owns the logical upload stream and two tasks:
//!
//! - the run task, which feeds the stream through the file pipeline in
//!   manifest order and publishes the result, and
//! - the control task, which resolves detachments of the stream. A clean end
//!   finishes the stream; anything else pauses the process and opens a
//!   reattach window until a client resumes, the process is cancelled, or the
//!   reattach timeout expires.
//!
//! ```text
//! NotStarted --launch--> InProgress --detach--> Paused --resume--> InProgress
//!                             |                    |
//!                             +--> Completed <-----+ (timeout / cancel)
//! ```

use crate::analyzer::RestoreFile;
use crate::codec::{ChecksumReader, FileDecoder};
use crate::context::{FileContext, ProcessContext};
use crate::error::{RestoreError, RestoreResult, from_io};
use crate::reader::{AttemptReader, Detachment, PhysicalReader, ResumableReader};
use crate::signal::Signal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{
    AttemptId, ProcessState, RestoreHeader, RestoreId, RestoreMetadata, RestoreStatus,
    ResumeInfo,
};

/// Name of the directory a finished restore is published to.
pub const RESTORED_DIR: &str = "restored";

/// How an attempt or a whole process ended.
pub type Outcome = Result<(), Arc<RestoreError>>;

/// Everything needed to construct a [`RestoreProcess`].
pub struct NewProcess {
    pub id: RestoreId,
    pub header: RestoreHeader,
    pub files: Vec<RestoreFile>,
    pub postgres_bundle: bool,
    pub initiating_user: Option<String>,
    /// The connection carrying the first attempt.
    pub reader: PhysicalReader,
    pub attempt_id: AttemptId,
    pub restore_root: PathBuf,
    pub reattach_timeout: Duration,
    pub resume_accept_timeout: Duration,
    /// Cancelling this cancels the process.
    pub parent: CancellationToken,
}

/// Waits for the end of one attempt.
///
/// An attempt ends with an error when its connection fails or is
/// interrupted, and with `Ok` when the process completes successfully while
/// the attempt is attached.
#[derive(Clone)]
pub struct AttemptHandle {
    attempt_id: AttemptId,
    done: Signal<Outcome>,
}

impl std::fmt::Debug for AttemptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptHandle")
            .field("attempt_id", &self.attempt_id)
            .finish_non_exhaustive()
    }
}

impl AttemptHandle {
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    pub async fn wait(&self) -> Outcome {
        self.done.wait().await
    }

    /// The outcome, if the attempt already ended.
    pub fn outcome(&self) -> Option<Outcome> {
        self.done.get()
    }
}

struct Attempt {
    id: AttemptId,
    cancel: CancellationToken,
    done: Signal<Outcome>,
}

impl Attempt {
    fn new(id: AttemptId, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            done: Signal::new(),
        }
    }

    fn handle(&self) -> AttemptHandle {
        AttemptHandle {
            attempt_id: self.id.clone(),
            done: self.done.clone(),
        }
    }
}

struct ReattachState {
    attempt: Attempt,
    reattach_tx: Option<mpsc::Sender<ResumeRequest>>,
    reattach_position: Option<u64>,
}

struct ResumeRequest {
    previous_attempt: AttemptId,
    reader: PhysicalReader,
    position: u64,
    checksum: u32,
    reply: oneshot::Sender<RestoreResult<AttemptHandle>>,
}

struct PendingStream {
    reader: ResumableReader,
    events: mpsc::UnboundedReceiver<Detachment>,
}

/// One restore of one export bundle.
pub struct RestoreProcess {
    id: RestoreId,
    metadata: RestoreMetadata,
    files: Vec<RestoreFile>,
    postgres_bundle: bool,
    restore_root: PathBuf,
    reattach_timeout: Duration,
    resume_accept_timeout: Duration,
    cancel: CancellationToken,
    state: watch::Sender<ProcessState>,
    reattach: RwLock<ReattachState>,
    pending: Mutex<Option<PendingStream>>,
    bytes_read: Arc<AtomicU64>,
    files_processed: AtomicU64,
    /// Set when the stream is failed from outside the run task, so the
    /// final error names the cause rather than its echo through a handler.
    stream_failure: Signal<Arc<RestoreError>>,
    completion: Signal<Outcome>,
}

impl RestoreProcess {
    pub fn new(params: NewProcess) -> Self {
        let NewProcess {
            id,
            header,
            files,
            postgres_bundle,
            initiating_user,
            reader,
            attempt_id,
            restore_root,
            reattach_timeout,
            resume_accept_timeout,
            parent,
        } = params;

        let cancel = parent.child_token();
        let attempt = Attempt::new(attempt_id, cancel.child_token());
        let physical: PhysicalReader = Box::new(AttemptReader::new(
            reader,
            attempt.id.clone(),
            attempt.cancel.clone(),
        ));
        let (reader, events) = ResumableReader::new(physical);
        let bytes_read = reader.progress();
        let (state, _) = watch::channel(ProcessState::NotStarted);

        Self {
            id,
            metadata: RestoreMetadata {
                id,
                header,
                start_time: OffsetDateTime::now_utc(),
                initiating_user,
            },
            files,
            postgres_bundle,
            restore_root,
            reattach_timeout,
            resume_accept_timeout,
            cancel,
            state,
            reattach: RwLock::new(ReattachState {
                attempt,
                reattach_tx: None,
                reattach_position: None,
            }),
            pending: Mutex::new(Some(PendingStream { reader, events })),
            bytes_read,
            files_processed: AtomicU64::new(0),
            stream_failure: Signal::new(),
            completion: Signal::new(),
        }
    }

    pub fn id(&self) -> RestoreId {
        self.id
    }

    pub fn metadata(&self) -> &RestoreMetadata {
        &self.metadata
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// The id of the attempt currently feeding (or last fed) the stream.
    pub fn current_attempt(&self) -> AttemptId {
        self.read_reattach().attempt.id.clone()
    }

    fn read_reattach(&self) -> RwLockReadGuard<'_, ReattachState> {
        self.reattach
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_reattach(&self) -> RwLockWriteGuard<'_, ReattachState> {
        self.reattach.write().unwrap_or_else(|poisoned| {
            warn!(restore_id = %self.id, "Reattach state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn take_pending(&self) -> Option<PendingStream> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Move to `next` unless the process already completed.
    fn transition(&self, next: ProcessState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn scratch_dir(&self) -> PathBuf {
        self.restore_root.join(format!(".restore-{}", self.id))
    }

    /// Start the run and control tasks. Returns a handle on the first attempt.
    pub fn launch(self: &Arc<Self>) -> RestoreResult<AttemptHandle> {
        let Some(PendingStream { reader, events }) = self.take_pending() else {
            return Err(match self.state() {
                ProcessState::Completed => RestoreError::NotRunning(ProcessState::Completed),
                _ => RestoreError::AlreadyLaunched,
            });
        };

        let handle = self.read_reattach().attempt.handle();
        self.transition(ProcessState::InProgress);
        info!(
            restore_id = %self.id,
            attempt_id = %handle.attempt_id(),
            format = %self.metadata.header.format_name,
            files = self.files.len(),
            "Launching restore"
        );

        tokio::spawn(self.clone().control_loop(events));
        tokio::spawn(self.clone().run(reader));
        Ok(handle)
    }

    async fn run(self: Arc<Self>, mut reader: ResumableReader) {
        let scratch = self.scratch_dir();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RestoreError::Canceled),
            result = self.process_stream(&scratch, &mut reader) => result,
        };
        drop(reader);

        let result = match result {
            Ok(()) => self.publish(&scratch).await,
            Err(err) => {
                remove_best_effort(&scratch).await;
                Err(err)
            }
        };
        self.finish(result);
    }

    async fn process_stream(
        &self,
        scratch: &Path,
        reader: &mut ResumableReader,
    ) -> RestoreResult<()> {
        remove_best_effort(scratch).await;
        tokio::fs::create_dir_all(scratch).await.map_err(|e| {
            RestoreError::Infrastructure(format!(
                "failed to create restore directory {}: {e}",
                scratch.display()
            ))
        })?;

        let ctx = ProcessContext::new(scratch, self.cancel.child_token());
        for (index, file) in self.files.iter().enumerate() {
            self.process_file(&ctx, reader, index, file).await?;
            self.files_processed.fetch_add(1, Ordering::Relaxed);
            ctx.check_failures()?;
        }

        let mut probe = [0u8; 1];
        if reader.read(&mut probe).await? != 0 {
            return Err(RestoreError::Protocol(format!(
                "unexpected data after the last manifest file at position {}",
                reader.position() - 1
            )));
        }

        ctx.wait_for_async_checks().await
    }

    async fn process_file(
        &self,
        ctx: &ProcessContext,
        reader: &mut ResumableReader,
        index: usize,
        file: &RestoreFile,
    ) -> RestoreResult<()> {
        let entry = &file.manifest_entry;
        debug!(
            restore_id = %self.id,
            file = %entry.name,
            encoding = %entry.encoding,
            position = reader.position(),
            "Restoring file"
        );

        let encoded = (&mut *reader).take(entry.encoded_size);
        let decoder = FileDecoder::new(encoded, entry.encoding)?;
        let mut verifier = ChecksumReader::new(
            decoder,
            entry.name.as_str(),
            entry.decoded_size,
            entry.decoded_crc32,
        );

        let file_ctx = FileContext::new(ctx.clone(), entry.name.as_str(), index);
        file.handler
            .restore(&file_ctx, &mut verifier, entry.decoded_size)
            .await?;

        let decoder = verifier.close().await?;
        let leftover = decoder.encoded_remaining();
        if leftover != 0 {
            return Err(RestoreError::Protocol(format!(
                "file {}: {leftover} of {} encoded bytes were not consumed",
                entry.name, entry.encoded_size
            )));
        }

        debug!(restore_id = %self.id, file = %entry.name, "File restored");
        Ok(())
    }

    async fn publish(&self, scratch: &Path) -> RestoreResult<()> {
        if self.postgres_bundle {
            remove_best_effort(scratch).await;
            return Ok(());
        }

        let target = self.restore_root.join(RESTORED_DIR);
        let previous = self.restore_root.join(format!(".previous-{}", self.id));
        let had_previous = match tokio::fs::rename(&target, &previous).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                remove_best_effort(scratch).await;
                return Err(RestoreError::Infrastructure(format!(
                    "failed to move aside {}: {e}",
                    target.display()
                )));
            }
        };

        if let Err(e) = tokio::fs::rename(scratch, &target).await {
            if had_previous {
                if let Err(restore_err) = tokio::fs::rename(&previous, &target).await {
                    warn!(error = %restore_err, "Failed to put back previous restore directory");
                }
            }
            remove_best_effort(scratch).await;
            return Err(RestoreError::Infrastructure(format!(
                "failed to publish restored data: {e}"
            )));
        }

        if had_previous {
            remove_best_effort(&previous).await;
        }
        info!(restore_id = %self.id, path = %target.display(), "Published restored data");
        Ok(())
    }

    fn finish(&self, result: RestoreResult<()>) {
        let outcome: Outcome = result.map_err(|err| {
            self.stream_failure
                .get()
                .unwrap_or_else(|| Arc::new(err))
        });
        match &outcome {
            Ok(()) => info!(
                restore_id = %self.id,
                bytes_read = self.bytes_read.load(Ordering::Relaxed),
                "Restore completed"
            ),
            Err(err) => warn!(restore_id = %self.id, error = %err, "Restore failed"),
        }

        self.state.send_replace(ProcessState::Completed);
        {
            let mut reattach = self.write_reattach();
            reattach.reattach_tx = None;
            reattach.reattach_position = None;
            reattach.attempt.done.fire(outcome.clone());
        }
        self.completion.fire(outcome);
        self.cancel.cancel();
    }

    async fn control_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<Detachment>) {
        while let Some(mut detachment) = events.recv().await {
            let Some(error) = detachment.take_error() else {
                debug!(
                    restore_id = %self.id,
                    position = detachment.position(),
                    "Upload stream ended"
                );
                detachment.finish();
                continue;
            };

            if self.cancel.is_cancelled() {
                detachment.abort(RestoreError::Canceled);
                continue;
            }
            self.reattach_window(detachment, from_io(error)).await;
        }
    }

    async fn reattach_window(&self, mut detachment: Detachment, cause: RestoreError) {
        let position = detachment.position();
        warn!(
            restore_id = %self.id,
            position,
            error = %cause,
            "Upload stream detached, waiting for reattachment"
        );

        // An interrupt that nobody resumes ends as a cancellation
        let interrupted = cause.is_canceled();
        let (tx, mut requests) = mpsc::channel(1);
        {
            let mut reattach = self.write_reattach();
            reattach.attempt.done.fire(Err(Arc::new(cause)));
            reattach.reattach_tx = Some(tx);
            reattach.reattach_position = Some(position);
        }
        self.transition(ProcessState::Paused);

        let deadline = tokio::time::sleep(self.reattach_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.close_window();
                    detachment.abort(RestoreError::Canceled);
                    return;
                }
                _ = &mut deadline => {
                    let abandoned = || {
                        if interrupted {
                            RestoreError::Canceled
                        } else {
                            RestoreError::ReattachTimeout(self.reattach_timeout)
                        }
                    };
                    warn!(
                        restore_id = %self.id,
                        timeout = ?self.reattach_timeout,
                        interrupted,
                        "No reattachment, giving up"
                    );
                    self.stream_failure.fire(Arc::new(abandoned()));
                    self.close_window();
                    detachment.abort(abandoned());
                    return;
                }
                request = requests.recv() => {
                    let Some(request) = request else {
                        detachment.abort(RestoreError::Protocol("reattach window closed".to_string()));
                        return;
                    };
                    if self.accept(&mut detachment, request) {
                        return;
                    }
                }
            }
        }
    }

    /// Try to continue the stream with `request`. Returns true once the
    /// stream is reattached.
    fn accept(&self, detachment: &mut Detachment, request: ResumeRequest) -> bool {
        let ResumeRequest {
            previous_attempt,
            reader,
            position,
            checksum,
            reply,
        } = request;

        // The caller already gave up waiting for an answer
        if reply.is_closed() {
            debug!(restore_id = %self.id, "Dropping abandoned resume request");
            return false;
        }

        let current = self.current_attempt();
        if previous_attempt != current {
            let _ = reply.send(Err(RestoreError::AttemptMismatch {
                requested: previous_attempt.to_string(),
            }));
            return false;
        }
        if let Err(err) = detachment.verify(position, checksum) {
            warn!(restore_id = %self.id, error = %err, "Rejected reattachment");
            let _ = reply.send(Err(err));
            return false;
        }

        let attempt = Attempt::new(AttemptId::new(), self.cancel.child_token());
        let handle = attempt.handle();
        let physical: PhysicalReader = Box::new(AttemptReader::new(
            reader,
            attempt.id.clone(),
            attempt.cancel.clone(),
        ));
        {
            let mut reattach = self.write_reattach();
            reattach.attempt = attempt;
            reattach.reattach_tx = None;
            reattach.reattach_position = None;
        }
        self.transition(ProcessState::InProgress);

        if let Err(err) = detachment.attach(physical, position, checksum) {
            let _ = reply.send(Err(err));
            return true;
        }
        info!(
            restore_id = %self.id,
            previous_attempt = %previous_attempt,
            attempt_id = %handle.attempt_id(),
            position,
            "Upload stream reattached"
        );
        if reply.send(Ok(handle)).is_err() {
            // The caller is gone, so detach the new attempt again
            warn!(restore_id = %self.id, "Resume caller went away, interrupting new attempt");
            self.read_reattach().attempt.cancel.cancel();
        }
        true
    }

    fn close_window(&self) {
        let mut reattach = self.write_reattach();
        reattach.reattach_tx = None;
    }

    /// Continue a paused restore from `reader`.
    ///
    /// `previous_attempt` must name the attempt that was paused, and
    /// `position`/`checksum` must match the stream at the point it detached.
    /// On success the stream continues under a new attempt id.
    pub async fn resume(
        &self,
        previous_attempt: &AttemptId,
        reader: PhysicalReader,
        position: u64,
        checksum: u32,
    ) -> RestoreResult<AttemptHandle> {
        let tx = {
            let reattach = self.read_reattach();
            match (&reattach.reattach_tx, self.state()) {
                (_, ProcessState::Completed) => {
                    return Err(RestoreError::NotRunning(ProcessState::Completed));
                }
                (Some(tx), _) => tx.clone(),
                (None, _) => return Err(RestoreError::NotPaused),
            }
        };

        let (reply, response) = oneshot::channel();
        let request = ResumeRequest {
            previous_attempt: previous_attempt.clone(),
            reader,
            position,
            checksum,
            reply,
        };
        // Timing out drops `response`; accept() skips closed replies
        let exchange = async move {
            tx.send(request)
                .await
                .map_err(|_| RestoreError::NotPaused)?;
            response.await.map_err(|_| RestoreError::NotPaused)?
        };

        tokio::time::timeout(self.resume_accept_timeout, exchange)
            .await
            .map_err(|_| RestoreError::Timeout("resume", self.resume_accept_timeout))?
    }

    /// Interrupt the current attempt and return where to resume.
    ///
    /// Calling this on a paused process returns the resume position again.
    pub async fn interrupt(&self, attempt_id: &AttemptId) -> RestoreResult<ResumeInfo> {
        let mut states = self.state.subscribe();
        {
            let reattach = self.read_reattach();
            let state = *states.borrow_and_update();
            match state {
                ProcessState::NotStarted | ProcessState::Completed => {
                    return Err(RestoreError::NotRunning(state));
                }
                ProcessState::Paused => {
                    if let Some(pos) = reattach.reattach_position {
                        return Ok(ResumeInfo { pos });
                    }
                }
                ProcessState::InProgress => {}
            }
            if reattach.attempt.id != *attempt_id {
                return Err(RestoreError::AttemptMismatch {
                    requested: attempt_id.to_string(),
                });
            }
            info!(restore_id = %self.id, attempt_id = %attempt_id, "Interrupting attempt");
            reattach.attempt.cancel.cancel();
        }

        loop {
            if states.changed().await.is_err() {
                return Err(RestoreError::NotRunning(self.state()));
            }
            let state = *states.borrow_and_update();
            match state {
                ProcessState::Paused => {
                    if let Some(pos) = self.read_reattach().reattach_position {
                        return Ok(ResumeInfo { pos });
                    }
                }
                ProcessState::Completed => return Err(RestoreError::NotRunning(state)),
                ProcessState::NotStarted | ProcessState::InProgress => {}
            }
        }
    }

    /// Abort the restore.
    pub fn cancel(&self) {
        info!(restore_id = %self.id, "Cancelling restore");
        self.stream_failure.fire(Arc::new(RestoreError::Canceled));
        self.read_reattach()
            .attempt
            .done
            .fire(Err(Arc::new(RestoreError::Canceled)));
        if self.take_pending().is_some() {
            self.finish(Err(RestoreError::Canceled));
        }
        self.cancel.cancel();
    }

    /// Best-effort snapshot for polling clients.
    pub fn status(&self) -> RestoreStatus {
        let state = self.state();
        let (attempt_id, resume_info) = {
            let reattach = self.read_reattach();
            let resume_info = match state {
                ProcessState::Paused => reattach.reattach_position.map(|pos| ResumeInfo { pos }),
                _ => None,
            };
            (Some(reattach.attempt.id.clone()), resume_info)
        };
        let error = self
            .completion
            .get()
            .and_then(|outcome| outcome.err())
            .map(|err| err.to_string());

        RestoreStatus {
            id: self.id,
            state,
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            attempt_id,
            resume_info,
            error,
            metadata: self.metadata.clone(),
        }
    }

    /// Wait for the process to complete.
    pub async fn wait(&self) -> Outcome {
        self.completion.wait().await
    }

    /// The final outcome, if the process completed.
    pub fn outcome(&self) -> Option<Outcome> {
        self.completion.get()
    }
}

async fn remove_best_effort(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove directory"),
    }
}
