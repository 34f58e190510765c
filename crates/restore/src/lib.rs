//! Resumable, verified restore of database export bundles.
//!
//! This crate provides:
//! - Export format definitions and a registry of them
//! - Manifest analysis into a per-file handler pipeline
//! - A logical upload stream that survives reconnects
//! - The restore process state machine and its manager
//! - Built-in formats that copy files into the restore directory

pub mod analyzer;
mod codec;
pub mod context;
pub mod error;
pub mod format;
pub mod formats;
pub mod manager;
pub mod process;
pub mod reader;
pub mod registry;
pub mod signal;

pub use analyzer::{Analysis, RestoreFile, analyze};
pub use context::{FileContext, ProcessContext};
pub use error::{ErrorKind, RestoreError, RestoreResult};
pub use format::{
    ExportFormat, FileHandlerDescriptor, FileHandlerFunc, FormatProvider, RestoreFileHandler,
};
pub use manager::{Manager, Restarter};
pub use process::{AttemptHandle, NewProcess, Outcome, RESTORED_DIR, RestoreProcess};
pub use reader::PhysicalReader;
pub use registry::FormatRegistry;
