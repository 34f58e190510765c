//! Test fixtures for building restore uploads.

use axum::body::Body;
use axum::http::Request;
use warden_core::{Manifest, ManifestFile, RestoreHeader};

/// CRC32 of `data`.
pub fn crc(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A `keyvaluev1` header with an uncompressed `kv.db`.
#[allow(dead_code)]
pub fn kv_header(data: &[u8]) -> RestoreHeader {
    RestoreHeader {
        format_name: "keyvaluev1".to_string(),
        manifest: Manifest::new(vec![ManifestFile::uncompressed("kv.db", data, crc(data))]),
    }
}

/// Wire bytes of `header`.
pub fn header_bytes(header: &RestoreHeader) -> Vec<u8> {
    header.to_vec().expect("header serializes")
}

/// A complete upload request: header followed by `payload`.
#[allow(dead_code)]
pub fn upload_request(header: &RestoreHeader, payload: &[u8]) -> Request<Body> {
    let mut body = header_bytes(header);
    let header_length = body.len();
    body.extend_from_slice(payload);
    Request::builder()
        .method("POST")
        .uri(format!("/db/v2/restore?header_length={header_length}"))
        .header("x-warden-user", "alice")
        .body(Body::from(body))
        .unwrap()
}
