//! Logical upload stream spanning several physical connections.
//!
//! A [`ResumableReader`] reads from one attached physical reader at a time.
//! When that reader ends or fails, the reader emits a [`Detachment`] on its
//! event channel and blocks until whoever owns the channel resolves it: by
//! attaching a new physical reader at the same position, by finishing the
//! stream, or by aborting it.
//!
//! Every byte handed out is folded into a continuity CRC32 counted from
//! position 0, so a resuming client can prove it continues the same stream.

use crate::error::{RestoreError, RestoreResult, into_io};
use crc32fast::Hasher;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use warden_core::AttemptId;

/// A physical source of stream bytes, typically one HTTP request body.
pub type PhysicalReader = Box<dyn AsyncRead + Send + Unpin>;

/// How a detachment is resolved.
pub enum Continuation {
    /// Continue reading from a new physical reader.
    Attach(PhysicalReader),
    /// The logical stream ends here.
    Finish,
    /// The logical stream fails with this error.
    Abort(RestoreError),
}

enum Source {
    Attached(PhysicalReader),
    Detached(oneshot::Receiver<Continuation>),
    Finished,
    Failed,
}

/// Reader over the logical stream. See the module docs.
pub struct ResumableReader {
    source: Source,
    position: u64,
    hasher: Hasher,
    events: mpsc::UnboundedSender<Detachment>,
    progress: Arc<AtomicU64>,
}

impl ResumableReader {
    /// Create a reader attached to `initial`, plus the receiving end of its
    /// detachment events.
    pub fn new(initial: PhysicalReader) -> (Self, mpsc::UnboundedReceiver<Detachment>) {
        let (events, rx) = mpsc::unbounded_channel();
        let reader = Self {
            source: Source::Attached(initial),
            position: 0,
            hasher: Hasher::new(),
            events,
            progress: Arc::new(AtomicU64::new(0)),
        };
        (reader, rx)
    }

    /// Bytes handed out so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Continuity checksum over everything handed out so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Shared counter mirroring [`position`](Self::position), readable
    /// without access to the reader.
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    fn detach(&mut self, error: Option<io::Error>) {
        let (reply, rx) = oneshot::channel();
        let event = Detachment {
            error,
            position: self.position,
            checksum: self.checksum(),
            reply: Some(reply),
        };
        self.source = match self.events.send(event) {
            Ok(()) => Source::Detached(rx),
            Err(_) => Source::Failed,
        };
    }
}

impl AsyncRead for ResumableReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match &mut this.source {
                Source::Attached(reader) => {
                    let before = buf.filled().len();
                    match Pin::new(reader).poll_read(cx, buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(())) => {
                            let read = &buf.filled()[before..];
                            if read.is_empty() {
                                this.detach(None);
                                continue;
                            }
                            this.hasher.update(read);
                            this.position += read.len() as u64;
                            this.progress.store(this.position, Ordering::Relaxed);
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Err(err)) => {
                            this.detach(Some(err));
                        }
                    }
                }
                Source::Detached(rx) => match Pin::new(rx).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(Continuation::Attach(reader))) => {
                        this.source = Source::Attached(reader);
                    }
                    Poll::Ready(Ok(Continuation::Finish)) => {
                        this.source = Source::Finished;
                    }
                    Poll::Ready(Ok(Continuation::Abort(err))) => {
                        this.source = Source::Failed;
                        return Poll::Ready(Err(into_io(err)));
                    }
                    Poll::Ready(Err(_)) => {
                        this.source = Source::Failed;
                        return Poll::Ready(Err(into_io(RestoreError::Protocol(
                            "detachment was dropped without being resolved".to_string(),
                        ))));
                    }
                },
                Source::Finished => return Poll::Ready(Ok(())),
                Source::Failed => {
                    return Poll::Ready(Err(into_io(RestoreError::Protocol(
                        "restore stream has failed".to_string(),
                    ))));
                }
            }
        }
    }
}

/// A physical reader ended. The logical stream is blocked until this is
/// resolved; dropping it unresolved fails the stream.
pub struct Detachment {
    error: Option<io::Error>,
    position: u64,
    checksum: u32,
    reply: Option<oneshot::Sender<Continuation>>,
}

impl Detachment {
    /// Whether the physical reader reached end-of-data without an error.
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Logical position at which the reader detached.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Continuity checksum at [`position`](Self::position).
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Check that a client resuming at `at_position` with
    /// `expected_checksum` continues this stream.
    pub fn verify(&self, at_position: u64, expected_checksum: u32) -> RestoreResult<()> {
        if at_position != self.position {
            return Err(RestoreError::PositionMismatch {
                expected: self.position,
                actual: at_position,
            });
        }
        if expected_checksum != self.checksum {
            return Err(RestoreError::ResumeChecksumMismatch {
                position: at_position,
                expected: self.checksum,
                actual: expected_checksum,
            });
        }
        Ok(())
    }

    /// Continue the stream from `reader`.
    ///
    /// A rejected attach leaves the detachment unresolved so another reader
    /// can be offered.
    pub fn attach(
        &mut self,
        reader: PhysicalReader,
        at_position: u64,
        expected_checksum: u32,
    ) -> RestoreResult<()> {
        self.verify(at_position, expected_checksum)?;
        let reply = self
            .reply
            .take()
            .ok_or_else(|| RestoreError::Protocol("detachment already resolved".to_string()))?;
        reply
            .send(Continuation::Attach(reader))
            .map_err(|_| RestoreError::Protocol("restore stream is gone".to_string()))
    }

    /// End the logical stream.
    pub fn finish(mut self) {
        self.resolve(Continuation::Finish);
    }

    /// Fail the logical stream with `err`.
    pub fn abort(mut self, err: RestoreError) {
        self.resolve(Continuation::Abort(err));
    }

    fn resolve(&mut self, continuation: Continuation) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(continuation);
        }
    }
}

/// Physical reader bound to one attempt; fails once the attempt is
/// interrupted so the stream detaches at a clean byte boundary.
pub struct AttemptReader {
    inner: PhysicalReader,
    attempt_id: AttemptId,
    interrupted: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl AttemptReader {
    pub fn new(inner: PhysicalReader, attempt_id: AttemptId, token: CancellationToken) -> Self {
        Self {
            inner,
            attempt_id,
            interrupted: Box::pin(token.cancelled_owned()),
        }
    }
}

impl AsyncRead for AttemptReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.interrupted.as_mut().poll(cx).is_ready() {
            let id = self.attempt_id.to_string();
            return Poll::Ready(Err(into_io(RestoreError::AttemptInterrupted(id))));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::from_io;
    use tokio::io::AsyncReadExt;

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    fn crc(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    #[tokio::test]
    async fn test_clean_end_finishes_stream() {
        let (mut reader, mut events) = ResumableReader::new(Box::new(&b"hello"[..]));
        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            (out, reader.position(), reader.checksum())
        });

        let detachment = events.recv().await.unwrap();
        assert!(detachment.is_clean());
        assert_eq!(detachment.position(), 5);
        assert_eq!(detachment.checksum(), crc(b"hello"));
        detachment.finish();

        let (out, position, checksum) = task.await.unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(position, 5);
        assert_eq!(checksum, crc(b"hello"));
    }

    #[tokio::test]
    async fn test_reattach_continues_checksum() {
        let first: PhysicalReader = Box::new(tokio::io::AsyncReadExt::chain(&b"abc"[..], Broken));
        let (mut reader, mut events) = ResumableReader::new(first);
        let progress = reader.progress();
        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            (out, reader.checksum())
        });

        let mut detachment = events.recv().await.unwrap();
        assert!(!detachment.is_clean());
        assert_eq!(detachment.position(), 3);
        assert_eq!(progress.load(Ordering::Relaxed), 3);

        let err = detachment
            .attach(Box::new(&b"def"[..]), 2, crc(b"abc"))
            .unwrap_err();
        assert!(matches!(err, RestoreError::PositionMismatch { expected: 3, actual: 2 }));
        let err = detachment
            .attach(Box::new(&b"def"[..]), 3, crc(b"abd"))
            .unwrap_err();
        assert!(matches!(err, RestoreError::ResumeChecksumMismatch { position: 3, .. }));

        detachment
            .attach(Box::new(&b"def"[..]), 3, crc(b"abc"))
            .unwrap();
        events.recv().await.unwrap().finish();

        let (out, checksum) = task.await.unwrap();
        assert_eq!(out, b"abcdef");
        assert_eq!(checksum, crc(b"abcdef"));
    }

    #[tokio::test]
    async fn test_abort_surfaces_error() {
        let (mut reader, mut events) = ResumableReader::new(Box::new(Broken));
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });

        events
            .recv()
            .await
            .unwrap()
            .abort(RestoreError::ReattachTimeout(std::time::Duration::from_secs(1)));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(from_io(err), RestoreError::ReattachTimeout(_)));
    }

    #[tokio::test]
    async fn test_dropped_detachment_fails_stream() {
        let (mut reader, mut events) = ResumableReader::new(Box::new(&b""[..]));
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });
        drop(events.recv().await.unwrap());
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_interrupted_attempt_reader_fails() {
        let token = CancellationToken::new();
        let mut reader = AttemptReader::new(
            Box::new(&b"data"[..]),
            AttemptId::from("attempt-1"),
            token.clone(),
        );
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);

        token.cancel();
        let err = reader.read(&mut buf).await.unwrap_err();
        match from_io(err) {
            RestoreError::AttemptInterrupted(id) => assert_eq!(id, "attempt-1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
