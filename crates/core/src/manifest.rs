//! Restore header and manifest types.
//!
//! The header is the JSON prefix of a restore upload. Its manifest lists the
//! files of the snapshot in the exact order their bytes follow the header.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding of one file's bytes inside the upload body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw bytes; encoded size equals decoded size.
    Uncompressed,
    /// Raw DEFLATE stream (RFC 1951, no zlib or gzip framing).
    Deflated,
    /// Any encoding this build does not understand.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uncompressed => "uncompressed",
            Self::Deflated => "deflated",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One file of a restore upload as declared by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// File name, matched against the handlers of the export format.
    pub name: String,
    /// How the bytes are encoded on the wire.
    pub encoding: Encoding,
    /// Number of bytes this file occupies in the upload body.
    pub encoded_size: u64,
    /// Number of bytes after decoding.
    pub decoded_size: u64,
    /// CRC32 (IEEE) of the decoded bytes.
    pub decoded_crc32: u32,
}

impl ManifestFile {
    /// Create an uncompressed entry whose sizes and checksum describe `data`.
    pub fn uncompressed(name: impl Into<String>, data: &[u8], crc32: u32) -> Self {
        Self {
            name: name.into(),
            encoding: Encoding::Uncompressed,
            encoded_size: data.len() as u64,
            decoded_size: data.len() as u64,
            decoded_crc32: crc32,
        }
    }
}

/// Ordered description of the files composing one restore upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    /// Create a manifest from ordered entries.
    pub fn new(files: Vec<ManifestFile>) -> Self {
        Self { files }
    }

    /// Number of declared files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Total number of body bytes the manifest accounts for.
    ///
    /// Returns `None` on overflow.
    pub fn total_encoded_size(&self) -> Option<u64> {
        self.files
            .iter()
            .try_fold(0u64, |acc, f| acc.checked_add(f.encoded_size))
    }
}

/// Header prefixing every restore upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreHeader {
    /// Name of the registered export format.
    pub format_name: String,
    /// Files following the header.
    pub manifest: Manifest,
}

impl RestoreHeader {
    /// Parse a header from its serialized bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::InvalidHeader(e.to_string()))
    }

    /// Serialize to the wire representation.
    pub fn to_vec(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parses_wire_json() {
        let json = br#"{
            "format_name": "postgresv1",
            "manifest": {"files": [
                {"name": "postgres.dump", "encoding": "deflated",
                 "encoded_size": 10, "decoded_size": 42, "decoded_crc32": 7}
            ]}
        }"#;
        let header = RestoreHeader::from_slice(json).unwrap();
        assert_eq!(header.format_name, "postgresv1");
        assert_eq!(header.manifest.file_count(), 1);
        assert_eq!(header.manifest.files[0].encoding, Encoding::Deflated);
        assert_eq!(header.manifest.files[0].decoded_size, 42);
    }

    #[test]
    fn test_unknown_encoding_is_preserved_for_validation() {
        let json = br#"{"format_name": "x", "manifest": {"files": [
            {"name": "a", "encoding": "zstd", "encoded_size": 1,
             "decoded_size": 1, "decoded_crc32": 0}]}}"#;
        let header = RestoreHeader::from_slice(json).unwrap();
        assert_eq!(header.manifest.files[0].encoding, Encoding::Unknown);
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let err = RestoreHeader::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, crate::Error::InvalidHeader(_)));
    }

    #[test]
    fn test_total_encoded_size_detects_overflow() {
        let mut file = ManifestFile::uncompressed("a", b"", 0);
        file.encoded_size = u64::MAX;
        let manifest = Manifest::new(vec![file.clone(), file]);
        assert_eq!(manifest.total_encoded_size(), None);

        let manifest = Manifest::new(vec![
            ManifestFile::uncompressed("a", b"abc", 0),
            ManifestFile::uncompressed("b", b"de", 0),
        ]);
        assert_eq!(manifest.total_encoded_size(), Some(5));
    }
}
