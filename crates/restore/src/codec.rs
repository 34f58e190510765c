//! Per-file decoding and content verification.

use crate::error::{RestoreError, RestoreResult};
use async_compression::tokio::bufread::DeflateDecoder;
use crc32fast::Hasher;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf, Take};
use warden_core::Encoding;

/// Decodes the encoded bytes of one manifest file.
pub(crate) enum FileDecoder<R> {
    Uncompressed(Take<R>),
    Deflated(DeflateDecoder<BufReader<Take<R>>>),
}

impl<R: AsyncRead + Unpin> FileDecoder<R> {
    /// Decode `encoded` according to `encoding`.
    pub(crate) fn new(encoded: Take<R>, encoding: Encoding) -> RestoreResult<Self> {
        match encoding {
            Encoding::Uncompressed => Ok(Self::Uncompressed(encoded)),
            Encoding::Deflated => Ok(Self::Deflated(DeflateDecoder::new(BufReader::new(
                encoded,
            )))),
            Encoding::Unknown => Err(RestoreError::Validation(
                "unsupported file encoding".to_string(),
            )),
        }
    }

    /// Encoded bytes of this file that were never consumed, including bytes
    /// sitting in the decompressor's input buffer.
    pub(crate) fn encoded_remaining(&self) -> u64 {
        match self {
            Self::Uncompressed(take) => take.limit(),
            Self::Deflated(decoder) => {
                let buffered = decoder.get_ref();
                buffered.get_ref().limit() + buffered.buffer().len() as u64
            }
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for FileDecoder<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Uncompressed(take) => Pin::new(take).poll_read(cx, buf),
            Self::Deflated(decoder) => Pin::new(decoder).poll_read(cx, buf),
        }
    }
}

/// Hands out at most `expected_size` decoded bytes while hashing them.
pub(crate) struct ChecksumReader<R> {
    inner: Take<R>,
    hasher: Hasher,
    read: u64,
    expected_size: u64,
    expected_crc32: u32,
    file_name: String,
}

impl<R: AsyncRead + Unpin> ChecksumReader<R> {
    pub(crate) fn new(
        inner: R,
        file_name: impl Into<String>,
        expected_size: u64,
        expected_crc32: u32,
    ) -> Self {
        Self {
            inner: inner.take(expected_size),
            hasher: Hasher::new(),
            read: 0,
            expected_size,
            expected_crc32,
            file_name: file_name.into(),
        }
    }

    /// Verify size and content checksum, returning the inner reader.
    ///
    /// Fails if fewer bytes than declared were consumed, if the source
    /// decodes to more than declared, or if the CRC32 differs.
    pub(crate) async fn close(self) -> RestoreResult<R> {
        let Self {
            inner,
            hasher,
            read,
            expected_size,
            expected_crc32,
            file_name,
        } = self;

        if read != expected_size {
            return Err(RestoreError::Protocol(format!(
                "file {file_name}: {read} of {expected_size} decoded bytes were consumed"
            )));
        }

        let mut inner = inner.into_inner();
        let mut probe = [0u8; 1];
        if inner.read(&mut probe).await? != 0 {
            return Err(RestoreError::Protocol(format!(
                "file {file_name} decodes to more than the declared {expected_size} bytes"
            )));
        }

        let actual = hasher.finalize();
        if actual != expected_crc32 {
            return Err(RestoreError::ChecksumMismatch {
                subject: file_name,
                expected: expected_crc32,
                actual,
            });
        }
        Ok(inner)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChecksumReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = &buf.filled()[before..];
            this.hasher.update(read);
            this.read += read.len() as u64;
        }
        result
    }
}
