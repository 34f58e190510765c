//! Restore process identifiers, states and status reporting types.

use crate::manifest::RestoreHeader;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a restore process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestoreId(Uuid);

impl RestoreId {
    /// Generate a new random restore ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid restore ID: {e}")))
    }
}

impl Default for RestoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RestoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RestoreId({})", self.0)
    }
}

impl fmt::Display for RestoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one attempt, i.e. one physical connection feeding a restore.
///
/// Server-generated attempt IDs are UUIDs, but clients only ever echo them
/// back, so any non-empty string is accepted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    /// Generate a new random attempt ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a client-supplied attempt ID.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.trim().is_empty() {
            return Err(crate::Error::InvalidId("attempt ID is empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for AttemptId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttemptId({})", self.0)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Restore process state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Created but not launched.
    #[default]
    NotStarted,
    /// Consuming bytes from an attached connection.
    InProgress,
    /// The connection dropped; waiting for a client to resume.
    Paused,
    /// Finished, successfully or not.
    Completed,
}

impl ProcessState {
    /// Check if the process reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the process may still receive bytes.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Where a resuming client has to continue the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeInfo {
    /// Logical stream offset, counted from the first byte after the header.
    pub pos: u64,
}

/// Descriptive metadata captured when a restore is launched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreMetadata {
    pub id: RestoreId,
    pub header: RestoreHeader,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// Opaque identity of whoever started the restore, if known.
    pub initiating_user: Option<String>,
}

/// Polling view of a restore process.
///
/// Counters are sampled without synchronizing with each other, so a status
/// is a best-effort snapshot rather than a consistent one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreStatus {
    pub id: RestoreId,
    pub state: ProcessState,
    pub bytes_read: u64,
    pub files_processed: u64,
    pub attempt_id: Option<AttemptId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_info: Option<ResumeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: RestoreMetadata,
}

/// Request body for interrupting the current attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub attempt_id: AttemptId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_id_roundtrip() {
        let id = RestoreId::new();
        let parsed = RestoreId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(RestoreId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_attempt_id_rejects_blank() {
        assert!(AttemptId::parse("  ").is_err());
        assert_eq!(AttemptId::parse("attempt-1").unwrap().as_str(), "attempt-1");
        assert_ne!(AttemptId::new(), AttemptId::new());
    }

    #[test]
    fn test_process_state_flags() {
        assert!(!ProcessState::NotStarted.is_active());
        assert!(ProcessState::InProgress.is_active());
        assert!(ProcessState::Paused.is_active());
        assert!(ProcessState::Completed.is_terminal());
        assert!(!ProcessState::Paused.is_terminal());
    }

    #[test]
    fn test_process_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProcessState::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(ProcessState::Paused.to_string(), "paused");
    }
}
