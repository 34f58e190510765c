//! Export format definitions and the file handler contract.

use crate::context::FileContext;
use crate::error::RestoreResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use warden_core::{FormatFileInfo, FormatInfo};

/// Restores one file of an export bundle from its decoded bytes.
///
/// The reader yields exactly `decoded_size` bytes and the handler is expected
/// to consume all of them; a handler that stops early fails the restore.
/// Handlers may register deferred verification with
/// [`FileContext::check_async`].
#[async_trait]
pub trait RestoreFileHandler: Send + Sync {
    async fn restore(
        &self,
        ctx: &FileContext,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        decoded_size: u64,
    ) -> RestoreResult<()>;
}

/// Shared handle to a file handler.
pub type FileHandlerFunc = Arc<dyn RestoreFileHandler>;

/// A file an export format knows how to restore.
#[derive(Clone)]
pub struct FileHandlerDescriptor {
    pub file_name: String,
    pub optional: bool,
    pub handler: FileHandlerFunc,
}

impl FileHandlerDescriptor {
    /// A file that must be present in every manifest of the format.
    pub fn required(file_name: impl Into<String>, handler: FileHandlerFunc) -> Self {
        Self {
            file_name: file_name.into(),
            optional: false,
            handler,
        }
    }

    /// A file a manifest may omit.
    pub fn optional(file_name: impl Into<String>, handler: FileHandlerFunc) -> Self {
        Self {
            file_name: file_name.into(),
            optional: true,
            handler,
        }
    }
}

impl fmt::Debug for FileHandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandlerDescriptor")
            .field("file_name", &self.file_name)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

/// A named contract listing the files that make up one kind of export.
#[derive(Debug)]
pub struct ExportFormat {
    name: String,
    files: Vec<FileHandlerDescriptor>,
    postgres_bundle: bool,
}

impl ExportFormat {
    pub fn new(name: impl Into<String>, files: Vec<FileHandlerDescriptor>) -> Self {
        Self {
            name: name.into(),
            files,
            postgres_bundle: false,
        }
    }

    /// Mark the format as a postgres bundle.
    ///
    /// Postgres bundles load their data into the database directly; their
    /// restore directory is scratch space and is never published.
    pub fn with_postgres_bundle(mut self) -> Self {
        self.postgres_bundle = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &[FileHandlerDescriptor] {
        &self.files
    }

    pub fn is_postgres_bundle(&self) -> bool {
        self.postgres_bundle
    }

    /// Introspection view for clients.
    pub fn info(&self) -> FormatInfo {
        FormatInfo {
            name: self.name.clone(),
            files: self
                .files
                .iter()
                .map(|f| FormatFileInfo {
                    name: f.file_name.clone(),
                    optional: f.optional,
                })
                .collect(),
        }
    }
}

/// Supplies export formats to a registry.
pub trait FormatProvider {
    fn formats(&self) -> Vec<Arc<ExportFormat>>;
}
