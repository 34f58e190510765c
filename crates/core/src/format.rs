//! Introspection view of registered export formats.

use serde::{Deserialize, Serialize};

/// One file an export format expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatFileInfo {
    pub name: String,
    pub optional: bool,
}

/// Export format as exposed to clients, used to pre-validate manifests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub name: String,
    pub files: Vec<FormatFileInfo>,
}
