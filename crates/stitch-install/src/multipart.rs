//! Forward-only reader for ranged HTTP responses.
//!
//! A 206 response carries either a single range (`Content-Range` on the
//! response itself) or a `multipart/byteranges` body where each part has
//! its own `Content-Range`. Both shapes are exposed uniformly: call
//! [`MultipartReader::next_part`] to advance to the next range, then read
//! the part's bytes through the reader (it is an `AsyncRead` bounded to
//! the current part). Skipping forward is allowed within a part; there is
//! no way back.

use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::header;
use stitch_index::SourceRead;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::Result;
use crate::ranges::ByteRange;

pub(crate) type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

pub struct MultipartReader {
    body: BodyStream,
    buf: BytesMut,
    kind: Kind,
    current: Option<Cursor>,
    finished: bool,
}

enum Kind {
    Multipart { boundary: String },
    Single { range: ByteRange, served: bool },
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    range: ByteRange,
    pos: u64,
}

impl MultipartReader {
    /// Wrap a ranged HTTP response. Non-success statuses and responses
    /// that are neither multipart nor a single range are rejected.
    pub fn from_response(response: reqwest::Response) -> Result<Self> {
        let response = response.error_for_status()?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let kind = if content_type
            .trim_start()
            .get(..20)
            .is_some_and(|p| p.eq_ignore_ascii_case("multipart/byteranges"))
        {
            let boundary = parse_boundary(content_type).ok_or_else(|| {
                io::Error::new(ErrorKind::InvalidData, "multipart response without boundary")
            })?;
            Kind::Multipart { boundary }
        } else {
            let range = response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
                .ok_or_else(|| {
                    io::Error::new(
                        ErrorKind::InvalidData,
                        "response is neither multipart nor a single range",
                    )
                })?;
            Kind::Single {
                range,
                served: false,
            }
        };

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        Ok(Self::new(kind, body))
    }

    fn new(kind: Kind, body: BodyStream) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
            kind,
            current: None,
            finished: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn multipart(boundary: impl Into<String>, body: BodyStream) -> Self {
        Self::new(
            Kind::Multipart {
                boundary: boundary.into(),
            },
            body,
        )
    }

    #[cfg(test)]
    pub(crate) fn single(range: ByteRange, body: BodyStream) -> Self {
        Self::new(
            Kind::Single {
                range,
                served: false,
            },
            body,
        )
    }

    /// Advance to the next range of the response. Unread bytes of the
    /// current part are drained. Returns `None` once the response is
    /// exhausted.
    pub async fn next_part(&mut self) -> io::Result<Option<ByteRange>> {
        if self.finished {
            return Ok(None);
        }
        let boundary = match &mut self.kind {
            Kind::Single { range, served } => {
                if *served {
                    self.finished = true;
                    return Ok(None);
                }
                *served = true;
                let range = *range;
                self.current = Some(Cursor {
                    range,
                    pos: range.start,
                });
                return Ok(Some(range));
            }
            Kind::Multipart { boundary } => boundary.clone(),
        };
        self.next_multipart_part(&boundary).await
    }

    /// Original-resource offset just past the last byte readable from the
    /// current part.
    pub fn available_to_offset(&self) -> u64 {
        self.current.map_or(0, |c| c.range.end)
    }

    /// Absolute offset of the next byte to be read from the current part.
    pub fn position(&self) -> u64 {
        self.current.map_or(0, |c| c.pos)
    }

    pub fn current_range(&self) -> Option<ByteRange> {
        self.current.map(|c| c.range)
    }

    /// Advance within the current part, discarding intermediate bytes.
    pub async fn skip_to(&mut self, offset: u64) -> io::Result<()> {
        let Some(cursor) = self.current else {
            return Err(io::Error::other("no ranged part is active"));
        };
        if offset < cursor.pos {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "cannot seek backwards in a ranged response",
            ));
        }
        SourceRead::skip(self, offset - cursor.pos).await
    }

    async fn next_multipart_part(&mut self, boundary: &str) -> io::Result<Option<ByteRange>> {
        if let Some(cursor) = self.current {
            SourceRead::skip(self, cursor.range.end - cursor.pos).await?;
            self.current = None;
        }

        let delimiter = format!("--{boundary}");
        let terminator = format!("--{boundary}--");
        loop {
            let Some(line) = self.read_line().await? else {
                // Body ended without a terminal boundary; treat as
                // exhausted.
                self.finished = true;
                return Ok(None);
            };
            if line.is_empty() {
                continue;
            }
            if line == terminator.as_bytes() {
                self.finished = true;
                return Ok(None);
            }
            if line == delimiter.as_bytes() {
                break;
            }
            // Anything else is preamble; skip it.
        }

        let mut content_range = None;
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "response ended inside part headers",
                ));
            };
            if line.is_empty() {
                break;
            }
            if let Some(value) = header_value(&line, "content-range") {
                content_range = parse_content_range(value);
            }
        }

        let range = content_range.ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidData, "body part without content-range")
        })?;
        self.current = Some(Cursor {
            range,
            pos: range.start,
        });
        Ok(Some(range))
    }

    /// Read one CRLF-terminated line, stripped. `None` on a clean end of
    /// body.
    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(idx + 1).to_vec();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.buf.split().to_vec()));
            }
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        loop {
            match self.body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.buf.extend_from_slice(&chunk);
                    return Ok(chunk.len());
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
    }
}

/// Reads are bounded to the current part: the part's end reads as EOF, so
/// `read_exact` past it fails with `UnexpectedEof` and the caller retries
/// with a fresh request.
impl AsyncRead for MultipartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(cursor) = this.current else {
            return Poll::Ready(Ok(()));
        };
        let part_remaining = (cursor.range.end - cursor.pos) as usize;
        if part_remaining == 0 {
            return Poll::Ready(Ok(()));
        }

        while this.buf.is_empty() {
            match this.body.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => this.buf.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => {
                    return Poll::Ready(Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "response body ended mid-part",
                    )));
                }
            }
        }

        let take = this.buf.len().min(part_remaining).min(buf.remaining());
        let bytes = this.buf.split_to(take);
        buf.put_slice(&bytes);
        if let Some(c) = this.current.as_mut() {
            c.pos += take as u64;
        }
        Poll::Ready(Ok(()))
    }
}

fn parse_boundary(content_type: &str) -> Option<String> {
    for param in content_type.split(';') {
        let param = param.trim();
        if let Some(value) = param
            .get(..9)
            .filter(|p| p.eq_ignore_ascii_case("boundary="))
            .map(|_| &param[9..])
        {
            let value = value.trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Parse a `Content-Range` value like `bytes 0-599/1234` into a half-open
/// range.
fn parse_content_range(value: &str) -> Option<ByteRange> {
    let value = value.trim();
    let rest = value
        .get(..5)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes"))
        .map(|_| value[5..].trim_start())?;
    let (range, _total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (end >= start).then(|| ByteRange::new(start, end + 1))
}

fn header_value<'a>(line: &'a [u8], name: &str) -> Option<&'a str> {
    let line = std::str::from_utf8(line).ok()?;
    let (key, value) = line.split_once(':')?;
    key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
}
