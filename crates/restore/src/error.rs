//! Restore error types.

use thiserror::Error;

/// Coarse classification used by transports to pick a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed or does not match the format.
    InvalidArgument,
    /// The request is valid but the process is not in a state to accept it.
    FailedPrecondition,
    /// The restore was aborted on purpose.
    Canceled,
    /// Nobody resumed within the reattach window.
    DeadlineExceeded,
    /// The referenced process does not exist.
    NotFound,
    /// Everything else, including data integrity failures.
    Internal,
}

/// Restore operation errors.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("checksum mismatch for {subject}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        subject: String,
        expected: u32,
        actual: u32,
    },

    #[error("position mismatch: stream is at {expected}, client claims {actual}")]
    PositionMismatch { expected: u64, actual: u64 },

    #[error("stream checksum at {position} is {expected:08x}, client claims {actual:08x}")]
    ResumeChecksumMismatch {
        position: u64,
        expected: u32,
        actual: u32,
    },

    #[error("no reattachment within {0:?}")]
    ReattachTimeout(std::time::Duration),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, std::time::Duration),

    #[error("restore canceled")]
    Canceled,

    #[error("attempt {requested} is not the active attempt")]
    AttemptMismatch { requested: String },

    #[error("restore process is not paused")]
    NotPaused,

    #[error("restore process has already been launched")]
    AlreadyLaunched,

    #[error("an active restore process already exists: {0}")]
    AlreadyActive(String),

    #[error("restore process not found: {0}")]
    NotFound(String),

    #[error("unsupported export format: {0}")]
    UnknownFormat(String),

    #[error("format registration failed: {0}")]
    Registration(String),

    #[error("path escapes the restore directory: {0}")]
    PathEscape(String),

    #[error("handler for {file} failed: {message}")]
    Handler { file: String, message: String },

    #[error("asynchronous check failed: {0}")]
    AsyncCheck(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("attempt {0} was interrupted")]
    AttemptInterrupted(String),

    #[error("restore process is {0}")]
    NotRunning(warden_core::ProcessState),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl RestoreError {
    /// Build a handler error for `file`.
    pub fn handler(file: impl Into<String>, message: impl ToString) -> Self {
        Self::Handler {
            file: file.into(),
            message: message.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::UnknownFormat(_) | Self::PathEscape(_) => {
                ErrorKind::InvalidArgument
            }
            Self::PositionMismatch { .. }
            | Self::ResumeChecksumMismatch { .. }
            | Self::AttemptMismatch { .. }
            | Self::NotPaused
            | Self::AlreadyLaunched
            | Self::AlreadyActive(_)
            | Self::NotRunning(_) => ErrorKind::FailedPrecondition,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Canceled | Self::AttemptInterrupted(_) => ErrorKind::Canceled,
            Self::ReattachTimeout(_) | Self::Timeout(..) => ErrorKind::DeadlineExceeded,
            Self::Protocol(_)
            | Self::ChecksumMismatch { .. }
            | Self::Registration(_)
            | Self::Handler { .. }
            | Self::AsyncCheck(_)
            | Self::Infrastructure(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is a deliberate abort rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::AttemptInterrupted(_))
    }
}

impl From<std::io::Error> for RestoreError {
    fn from(err: std::io::Error) -> Self {
        from_io(err)
    }
}

impl From<warden_core::Error> for RestoreError {
    fn from(err: warden_core::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for restore operations.
pub type RestoreResult<T> = std::result::Result<T, RestoreError>;

/// Recover a typed restore error carried through an `io::Error`.
///
/// Readers in the stream stack report failures as `io::Error`; the ones that
/// originate here wrap a `RestoreError`. This is also what `?` does on an
/// `io::Error` inside a handler, so a reattach timeout stays a timeout.
pub(crate) fn from_io(err: std::io::Error) -> RestoreError {
    if err
        .get_ref()
        .is_some_and(|inner| inner.is::<RestoreError>())
    {
        match err.into_inner().map(|inner| inner.downcast::<RestoreError>()) {
            Some(Ok(restore)) => *restore,
            Some(Err(other)) => RestoreError::Io(std::io::Error::other(other)),
            None => RestoreError::Protocol("stream failed".to_string()),
        }
    } else {
        RestoreError::Io(err)
    }
}

/// Wrap a restore error so it can travel through `AsyncRead`.
pub(crate) fn into_io(err: RestoreError) -> std::io::Error {
    std::io::Error::other(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_roundtrip_preserves_restore_error() {
        let io = into_io(RestoreError::ChecksumMismatch {
            subject: "bolt.db".to_string(),
            expected: 1,
            actual: 2,
        });
        match from_io(io) {
            RestoreError::ChecksumMismatch { subject, .. } => assert_eq!(subject, "bolt.db"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(from_io(io), RestoreError::Io(_)));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(RestoreError::Canceled.kind(), ErrorKind::Canceled);
        assert_eq!(
            RestoreError::Validation("x".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            RestoreError::AlreadyActive("x".into()).kind(),
            ErrorKind::FailedPrecondition
        );
        assert_eq!(
            RestoreError::ReattachTimeout(std::time::Duration::from_secs(1)).kind(),
            ErrorKind::DeadlineExceeded
        );
    }

    #[test]
    fn test_resume_claims_are_client_errors() {
        let resume = RestoreError::ResumeChecksumMismatch {
            position: 5,
            expected: 1,
            actual: 2,
        };
        assert_eq!(resume.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(
            RestoreError::PositionMismatch { expected: 5, actual: 4 }.kind(),
            ErrorKind::FailedPrecondition
        );

        // Corrupt file content is still a server-side failure
        let content = RestoreError::ChecksumMismatch {
            subject: "bolt.db".to_string(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(content.kind(), ErrorKind::Internal);
    }
}
