//! Core domain types for the Warden restore service.
//!
//! This crate defines the data model shared by the restore engine and the
//! HTTP boundary:
//! - Restore header and manifest wire types
//! - Restore and attempt identifiers
//! - Process states and status reporting
//! - Export format introspection
//! - Configuration

pub mod config;
pub mod error;
pub mod format;
pub mod manifest;
pub mod process;

pub use error::{Error, Result};
pub use format::{FormatFileInfo, FormatInfo};
pub use manifest::{Encoding, Manifest, ManifestFile, RestoreHeader};
pub use process::{
    AttemptId, InterruptRequest, ProcessState, RestoreId, RestoreMetadata, RestoreStatus,
    ResumeInfo,
};

/// Default upper bound for a serialized restore header: 4 MiB
pub const DEFAULT_MAX_HEADER_SIZE: u64 = 4 * 1024 * 1024;
