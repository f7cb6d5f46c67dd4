use crate::{CsvResult, SourcePosition};
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use bytes::Bytes;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::codec::Utf8Transcoder;

/// Boxed sequential byte stream handed to the CSV parser.
pub type SourceReader = Box<dyn AsyncRead + Unpin + Send>;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

#[derive(Debug, Clone)]
pub struct SourceMeta {
    /// e.g. "application/gzip" or "text/csv"
    pub content_type: String,
    /// e.g. "gzip", "zstd", "gzip, identity" or empty
    pub content_encoding: String,
    /// just the key/filename (used for extension fallback)
    pub name_hint: String,
    /// Which character encoding to expect (defaults to UTF-8)
    pub charset: &'static encoding_rs::Encoding,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            content_type: String::new(),
            content_encoding: String::new(),
            name_hint: String::new(),
            charset: encoding_rs::UTF_8,
        }
    }
}

impl SourceMeta {
    /// Lightweight meta from the file extension only.
    pub fn from_path(path: &Path, charset: &'static encoding_rs::Encoding) -> Self {
        let name_hint = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let (content_type, content_encoding) =
            match path.extension().and_then(|s| s.to_str()).unwrap_or_default() {
                "gz" => ("application/gzip", "gzip"),
                "zst" => ("application/zstd", "zstd"),
                _ => ("text/csv", ""),
            };
        Self {
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
            name_hint,
            charset,
        }
    }

    /// Meta for an in-memory payload, sniffing compression from magic bytes.
    pub fn sniff(payload: &[u8], charset: &'static encoding_rs::Encoding) -> Self {
        let content_encoding = if payload.starts_with(GZIP_MAGIC) {
            "gzip"
        } else if payload.starts_with(ZSTD_MAGIC) {
            "zstd"
        } else {
            ""
        };
        Self {
            content_type: "text/csv".into(),
            content_encoding: content_encoding.into(),
            charset,
            ..Default::default()
        }
    }

    /// Decompression choice: encoding -> type -> extension.
    pub fn compression(&self) -> Compression {
        let ce = self.content_encoding.to_ascii_lowercase();
        let ct = self.content_type.to_ascii_lowercase();

        let is_gzip = ce.split(',').any(|s| s.trim() == "gzip")
            || matches!(ct.as_str(), "application/gzip" | "application/x-gzip")
            || self.name_hint.ends_with(".gz");
        let is_zstd = ce.split(',').any(|s| s.trim() == "zstd")
            || ct == "application/zstd"
            || self.name_hint.ends_with(".zst");

        if is_gzip {
            Compression::Gzip
        } else if is_zstd {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// True when byte offsets in the raw source equal byte offsets seen by the parser.
    pub fn is_byte_addressable(&self) -> bool {
        self.compression() == Compression::None && self.charset == encoding_rs::UTF_8
    }
}

/// From a generic AsyncRead, wrap with optional decompression and UTF-8 transcoding.
pub fn build_csv_reader<R>(raw: R, meta: &SourceMeta) -> SourceReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    decode_stack(raw, meta, None)
}

fn decode_stack<R>(raw: R, meta: &SourceMeta, tally: Option<&DecodeTally>) -> SourceReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // Use a larger buffer for fewer syscalls (1 MiB)
    let buf = Tallied::new(
        BufReader::with_capacity(1 << 20, raw),
        tally.map(|t| t.raw.clone()),
    );
    let decompressed: SourceReader = match meta.compression() {
        Compression::Gzip => Box::new(GzipDecoder::new(buf)),
        Compression::Zstd => Box::new(ZstdDecoder::new(buf)),
        Compression::None => Box::new(buf),
    };

    // transcode only when charset != UTF-8 to avoid extra copies
    let decoded: SourceReader = if meta.charset == encoding_rs::UTF_8 {
        decompressed
    } else {
        let framed = FramedRead::new(decompressed, Utf8Transcoder::new(meta.charset));
        Box::new(StreamReader::new(framed))
    };

    match tally {
        Some(tally) => Box::new(Tallied::new(decoded, Some(tally.decoded.clone()))),
        None => decoded,
    }
}

/// Raw bytes consumed by the decode stack against the bytes it produced.
#[derive(Debug, Clone, Default)]
pub struct DecodeTally {
    raw: Arc<AtomicU64>,
    decoded: Arc<AtomicU64>,
}

impl DecodeTally {
    pub fn raw(&self) -> u64 {
        self.raw.load(Ordering::Relaxed)
    }

    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    /// Decoded size of a source whose stored size is `raw_total`,
    /// extrapolated from the ratio seen so far.
    pub fn decoded_total(&self, raw_total: u64) -> u64 {
        let (raw, decoded) = (self.raw(), self.decoded());
        if raw == 0 {
            return raw_total;
        }
        (raw_total as f64 * decoded as f64 / raw as f64).round() as u64
    }
}

/// Counts bytes handed out by `poll_read` or released by `consume`.
struct Tallied<R> {
    inner: R,
    count: Option<Arc<AtomicU64>>,
}

impl<R> Tallied<R> {
    fn new(inner: R, count: Option<Arc<AtomicU64>>) -> Self {
        Self { inner, count }
    }

    fn add(&self, n: usize) {
        if let Some(count) = &self.count {
            count.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Tallied<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.add(buf.filled().len() - before);
        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncBufRead + Unpin> AsyncBufRead for Tallied<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.add(amt);
        Pin::new(&mut this.inner).consume(amt);
    }
}

/// End of input inside a quoted field.
#[derive(Debug, Error)]
#[error("unterminated quoted field starting at {0}")]
pub(crate) struct UnterminatedQuote(pub SourcePosition);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Start,
    Unquoted,
    Quoted,
    /// A quote seen inside a quoted field: either its end or half of `""`.
    QuoteInQuoted,
}

/// Follows field quoting over the decoded stream and fails the read that
/// hits end of input inside an open quoted field.
///
/// The CSV parser accepts that case as one long last field, so without
/// this a broken quote in the last column reads as a valid row.
pub(crate) struct QuoteGuard<R> {
    inner: R,
    delimiter: u8,
    state: FieldState,
    line: u64,
    byte: u64,
    opened_at: SourcePosition,
}

impl<R> QuoteGuard<R> {
    pub(crate) fn new(inner: R, delimiter: u8) -> Self {
        Self {
            inner,
            delimiter,
            state: FieldState::Start,
            line: 1,
            byte: 0,
            opened_at: SourcePosition::default(),
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        use FieldState::*;
        for &b in chunk {
            let boundary = b == self.delimiter || b == b'\n' || b == b'\r';
            self.state = match (self.state, b) {
                (Start, b'"') => {
                    self.opened_at = SourcePosition::at(self.line, self.byte);
                    Quoted
                }
                (Quoted, b'"') => QuoteInQuoted,
                (Quoted, _) => Quoted,
                (QuoteInQuoted, b'"') => Quoted,
                _ if boundary => Start,
                _ => Unquoted,
            };
            if b == b'\n' {
                self.line += 1;
            }
            self.byte += 1;
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for QuoteGuard<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        if !fresh.is_empty() {
            this.feed(fresh);
        } else if buf.remaining() > 0 && this.state == FieldState::Quoted {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                UnterminatedQuote(this.opened_at),
            )));
        }
        Poll::Ready(Ok(()))
    }
}

/// Where a file's bytes live: stable storage or a buffer held by the caller.
#[derive(Debug, Clone)]
pub enum ByteSource {
    Path(PathBuf),
    Memory(Bytes),
}

impl ByteSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ByteSource::Path(path.into())
    }

    pub fn memory(payload: impl Into<Bytes>) -> Self {
        ByteSource::Memory(payload.into())
    }

    pub fn meta(&self, charset: &'static encoding_rs::Encoding) -> SourceMeta {
        match self {
            ByteSource::Path(path) => SourceMeta::from_path(path, charset),
            ByteSource::Memory(payload) => SourceMeta::sniff(payload, charset),
        }
    }

    /// Opens a fresh cursor at the start of the source.
    pub async fn open(&self, charset: &'static encoding_rs::Encoding) -> CsvResult<SourceReader> {
        let meta = self.meta(charset);
        Ok(match self {
            ByteSource::Path(path) => build_csv_reader(File::open(path).await?, &meta),
            ByteSource::Memory(payload) => build_csv_reader(Cursor::new(payload.clone()), &meta),
        })
    }

    /// Like [`ByteSource::open`], also counting bytes on both sides of decoding.
    pub async fn open_tallied(
        &self,
        charset: &'static encoding_rs::Encoding,
    ) -> CsvResult<(SourceReader, DecodeTally)> {
        let meta = self.meta(charset);
        let tally = DecodeTally::default();
        let reader = match self {
            ByteSource::Path(path) => decode_stack(File::open(path).await?, &meta, Some(&tally)),
            ByteSource::Memory(payload) => {
                decode_stack(Cursor::new(payload.clone()), &meta, Some(&tally))
            }
        };
        Ok((reader, tally))
    }

    /// Stored size in bytes (compressed size for compressed sources).
    pub async fn len(&self) -> CsvResult<u64> {
        match self {
            ByteSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
            ByteSource::Memory(payload) => Ok(payload.len() as u64),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ByteSource::Path(path) => Some(path),
            ByteSource::Memory(_) => None,
        }
    }
}
