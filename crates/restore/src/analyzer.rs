//! Matching a client manifest against an export format.

use crate::error::{RestoreError, RestoreResult};
use crate::format::{ExportFormat, FileHandlerDescriptor, FileHandlerFunc};
use std::collections::HashMap;
use std::fmt;
use warden_core::{Encoding, Manifest, ManifestFile};

/// One step of a restore pipeline: a manifest entry and the handler for it.
#[derive(Clone)]
pub struct RestoreFile {
    pub manifest_entry: ManifestFile,
    pub handler: FileHandlerFunc,
}

impl fmt::Debug for RestoreFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreFile")
            .field("manifest_entry", &self.manifest_entry)
            .finish_non_exhaustive()
    }
}

/// Result of analyzing a manifest.
#[derive(Debug)]
pub struct Analysis {
    /// Handler pipeline in manifest order, which is also upload byte order.
    pub files: Vec<RestoreFile>,
    pub total_decoded_bytes: u64,
}

/// Build the handler pipeline for `manifest` under `format`.
pub fn analyze(manifest: &Manifest, format: &ExportFormat) -> RestoreResult<Analysis> {
    if manifest.files.is_empty() {
        return Err(RestoreError::Validation("manifest lists no files".to_string()));
    }

    let mut remaining: HashMap<&str, &FileHandlerDescriptor> = format
        .files()
        .iter()
        .map(|descriptor| (descriptor.file_name.as_str(), descriptor))
        .collect();

    let mut files = Vec::with_capacity(manifest.files.len());
    let mut total_decoded_bytes: u64 = 0;

    for entry in &manifest.files {
        if entry.encoding == Encoding::Unknown {
            return Err(RestoreError::Validation(format!(
                "file {} has an unsupported encoding",
                entry.name
            )));
        }

        let Some(descriptor) = remaining.remove(entry.name.as_str()) else {
            let known = format.files().iter().any(|d| d.file_name == entry.name);
            let message = if known {
                format!("manifest file {} is listed more than once", entry.name)
            } else {
                format!(
                    "manifest file {} is not part of format {}",
                    entry.name,
                    format.name()
                )
            };
            return Err(RestoreError::Validation(message));
        };

        total_decoded_bytes = total_decoded_bytes
            .checked_add(entry.decoded_size)
            .ok_or_else(|| {
                RestoreError::Validation("total decoded size overflows".to_string())
            })?;

        files.push(RestoreFile {
            manifest_entry: entry.clone(),
            handler: descriptor.handler.clone(),
        });
    }

    if manifest.total_encoded_size().is_none() {
        return Err(RestoreError::Validation(
            "total encoded size overflows".to_string(),
        ));
    }

    let mut missing: Vec<&str> = remaining
        .values()
        .filter(|descriptor| !descriptor.optional)
        .map(|descriptor| descriptor.file_name.as_str())
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(RestoreError::Validation(format!(
            "manifest is missing required files for format {}: {}",
            format.name(),
            missing.join(", ")
        )));
    }

    Ok(Analysis {
        files,
        total_decoded_bytes,
    })
}
