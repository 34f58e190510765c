//! Built-in export formats.

use crate::context::FileContext;
use crate::error::{RestoreError, RestoreResult};
use crate::format::{
    ExportFormat, FileHandlerDescriptor, FileHandlerFunc, FormatProvider, RestoreFileHandler,
};
use crate::registry::FormatRegistry;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Streams a file verbatim into the restore directory under its manifest
/// name, then verifies its on-disk size in the background.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCopyHandler;

#[async_trait]
impl RestoreFileHandler for FileCopyHandler {
    async fn restore(
        &self,
        ctx: &FileContext,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        decoded_size: u64,
    ) -> RestoreResult<()> {
        let relative = Path::new(ctx.file_name());
        if let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) {
            ctx.mkdir(parent).await?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let mut file = ctx.open_file(relative, &options).await?;
        let copied = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;

        if copied != decoded_size {
            return Err(RestoreError::handler(
                ctx.file_name(),
                format!("wrote {copied} bytes, expected {decoded_size}"),
            ));
        }

        let path = ctx.resolve_path(relative).await?;
        let name = ctx.file_name().to_string();
        ctx.check_async(async move {
            let written = tokio::fs::metadata(&path).await?.len();
            if written != decoded_size {
                return Err(RestoreError::AsyncCheck(format!(
                    "{name} is {written} bytes on disk, expected {decoded_size}"
                )));
            }
            Ok(())
        });
        Ok(())
    }
}

fn copy_handler() -> FileHandlerFunc {
    Arc::new(FileCopyHandler)
}

/// `postgresv1`: a database dump plus its migration marker.
pub struct PostgresV1Provider;

impl FormatProvider for PostgresV1Provider {
    fn formats(&self) -> Vec<Arc<ExportFormat>> {
        let format = ExportFormat::new(
            "postgresv1",
            vec![
                FileHandlerDescriptor::required("postgres.dump", copy_handler()),
                FileHandlerDescriptor::optional("migration_version.yaml", copy_handler()),
            ],
        )
        .with_postgres_bundle();
        vec![Arc::new(format)]
    }
}

/// `keyvaluev1`: a key-value store file plus optional key material.
pub struct KeyValueV1Provider;

impl FormatProvider for KeyValueV1Provider {
    fn formats(&self) -> Vec<Arc<ExportFormat>> {
        vec![Arc::new(ExportFormat::new(
            "keyvaluev1",
            vec![
                FileHandlerDescriptor::required("kv.db", copy_handler()),
                FileHandlerDescriptor::optional("keys/caps.json", copy_handler()),
            ],
        ))]
    }
}

/// Providers for every built-in format.
pub fn default_providers() -> Vec<Box<dyn FormatProvider>> {
    vec![Box::new(PostgresV1Provider), Box::new(KeyValueV1Provider)]
}

/// A registry holding the built-in formats.
pub fn default_registry() -> RestoreResult<FormatRegistry> {
    let providers = default_providers();
    FormatRegistry::from_providers(providers.iter().map(|provider| provider.as_ref()))
}
