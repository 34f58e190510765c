use async_compression::tokio::write::DeflateEncoder;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use warden_core::{AttemptId, Encoding, Manifest, ManifestFile, ProcessState, RestoreHeader, RestoreId};
use warden_restore::{
    ExportFormat, FileContext, FileHandlerDescriptor, FileHandlerFunc, NewProcess, PhysicalReader,
    RestoreFile, RestoreFileHandler, RestoreProcess, RestoreResult, analyze,
};

pub type SharedBytes = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub fn crc(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub async fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

pub fn manifest_file(name: &str, data: &[u8]) -> ManifestFile {
    ManifestFile::uncompressed(name, data, crc(data))
}

pub fn static_reader(data: Vec<u8>) -> PhysicalReader {
    Box::new(io::Cursor::new(data))
}

/// A connection that fails with a reset on every read.
pub struct Broken;

impl AsyncRead for Broken {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

/// Delivers `data`, then fails like a dropped connection.
pub fn failing_reader(data: Vec<u8>) -> PhysicalReader {
    Box::new(io::Cursor::new(data).chain(Broken))
}

/// Records everything it is handed, keyed by file name.
pub struct RecordingHandler {
    pub received: SharedBytes,
    /// Stop reading after this many bytes.
    pub read_limit: Option<usize>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, SharedBytes) {
        let received = SharedBytes::default();
        let handler = Arc::new(Self {
            received: received.clone(),
            read_limit: None,
        });
        (handler, received)
    }
}

#[async_trait]
impl RestoreFileHandler for RecordingHandler {
    async fn restore(
        &self,
        ctx: &FileContext,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        _decoded_size: u64,
    ) -> RestoreResult<()> {
        let mut data = Vec::new();
        match self.read_limit {
            Some(limit) => {
                let mut limited = reader.take(limit as u64);
                limited.read_to_end(&mut data).await?;
            }
            None => {
                reader.read_to_end(&mut data).await?;
            }
        }
        self.received
            .lock()
            .unwrap()
            .insert(ctx.file_name().to_string(), data);
        Ok(())
    }
}

/// A format whose files are all required and handled by `handler`.
pub fn single_format(name: &str, files: &[&str], handler: FileHandlerFunc) -> Arc<ExportFormat> {
    Arc::new(ExportFormat::new(
        name,
        files
            .iter()
            .map(|file| FileHandlerDescriptor::required(*file, handler.clone()))
            .collect(),
    ))
}

/// Build (but do not launch) a process for `manifest` under `format`.
pub fn new_process(
    root: &Path,
    format: &ExportFormat,
    manifest: Manifest,
    reader: PhysicalReader,
    reattach_timeout: Duration,
) -> Arc<RestoreProcess> {
    new_process_with(
        root,
        format,
        manifest,
        reader,
        reattach_timeout,
        Duration::from_secs(5),
    )
}

pub fn new_process_with(
    root: &Path,
    format: &ExportFormat,
    manifest: Manifest,
    reader: PhysicalReader,
    reattach_timeout: Duration,
    resume_accept_timeout: Duration,
) -> Arc<RestoreProcess> {
    let files: Vec<RestoreFile> = analyze(&manifest, format).unwrap().files;
    Arc::new(RestoreProcess::new(NewProcess {
        id: RestoreId::new(),
        header: RestoreHeader {
            format_name: format.name().to_string(),
            manifest,
        },
        files,
        postgres_bundle: format.is_postgres_bundle(),
        initiating_user: Some("tester".to_string()),
        reader,
        attempt_id: AttemptId::from("attempt-1"),
        restore_root: root.to_path_buf(),
        reattach_timeout,
        resume_accept_timeout,
        parent: CancellationToken::new(),
    }))
}

pub async fn wait_for_state(process: &RestoreProcess, state: ProcessState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while process.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("process never reached {state}"));
}

pub async fn wait_for_bytes(process: &RestoreProcess, bytes: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while process.status().bytes_read < bytes {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("process never read {bytes} bytes"));
}

pub fn deflated_file(name: &str, data: &[u8], encoded: &[u8]) -> ManifestFile {
    ManifestFile {
        name: name.to_string(),
        encoding: Encoding::Deflated,
        encoded_size: encoded.len() as u64,
        decoded_size: data.len() as u64,
        decoded_crc32: crc(data),
    }
}
