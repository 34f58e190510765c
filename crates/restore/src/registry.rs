//! Registry of supported export formats.

use crate::error::{RestoreError, RestoreResult};
use crate::format::{ExportFormat, FormatProvider};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use warden_core::FormatInfo;

/// Holds the export formats a server accepts, keyed by name.
#[derive(Default)]
pub struct FormatRegistry {
    formats: RwLock<HashMap<String, Arc<ExportFormat>>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an explicit list of providers.
    pub fn from_providers<'a, I>(providers: I) -> RestoreResult<Self>
    where
        I: IntoIterator<Item = &'a dyn FormatProvider>,
    {
        let registry = Self::new();
        for provider in providers {
            for format in provider.formats() {
                registry.register_format(format)?;
            }
        }
        Ok(registry)
    }

    /// Register a format.
    ///
    /// Registering the same `Arc` twice is a no-op; a different format under
    /// an existing name is rejected.
    pub fn register_format(&self, format: Arc<ExportFormat>) -> RestoreResult<()> {
        if format.name().is_empty() {
            return Err(RestoreError::Registration(
                "format name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for file in format.files() {
            if !seen.insert(file.file_name.as_str()) {
                return Err(RestoreError::Registration(format!(
                    "format {} declares more than one handler for file {}",
                    format.name(),
                    file.file_name
                )));
            }
        }

        let mut formats = self.formats.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Format registry lock was poisoned, recovering");
            poisoned.into_inner()
        });
        if let Some(existing) = formats.get(format.name()) {
            if Arc::ptr_eq(existing, &format) {
                return Ok(());
            }
            return Err(RestoreError::Registration(format!(
                "a different format named {} is already registered",
                format.name()
            )));
        }

        tracing::debug!(format = %format.name(), files = format.files().len(), "Registered export format");
        formats.insert(format.name().to_string(), format);
        Ok(())
    }

    /// Look up a format by name.
    pub fn get_format(&self, name: &str) -> Option<Arc<ExportFormat>> {
        let formats = self
            .formats
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        formats.get(name).cloned()
    }

    /// All registered formats, sorted by name.
    pub fn supported_formats(&self) -> Vec<Arc<ExportFormat>> {
        let formats = self
            .formats
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut list: Vec<_> = formats.values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    /// Introspection listing, sorted by name.
    pub fn format_listings(&self) -> Vec<FormatInfo> {
        self.supported_formats()
            .iter()
            .map(|format| format.info())
            .collect()
    }
}
