//! Stream assembler: accumulates socket reads until one full message is buffered

use crate::codec::{find_header_end, CRLFCRLF};
use crate::error::ParseError;
use bytes::{Bytes, BytesMut};
use std::num::IntErrorKind;

/// Per-connection message buffer.
///
/// Holds zero or more bytes of the next message; extracted messages are
/// removed from the front immediately.
#[derive(Debug)]
pub struct MessageAssembler {
    buf: BytesMut,
    /// Bytes already searched for CRLFCRLF without a hit
    scanned: usize,
    /// Largest message (headers plus body) accepted
    limit: usize,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            scanned: 0,
            limit: usize::MAX,
        }
    }

    /// Cap on the size of one message
    pub fn limit(mut self, max_message_bytes: usize) -> Self {
        self.limit = max_message_bytes;
        self
    }

    /// Append a chunk read from the socket
    pub fn append(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Direct access for `read_buf`-style reads
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Slice out one complete message, or `Ok(None)` if more data is needed.
    ///
    /// A message is the header block through CRLFCRLF plus `Content-Length`
    /// body bytes. A missing or non-numeric length counts as zero. Fails with
    /// [`ParseError::TooLarge`] as soon as the message is known to exceed the
    /// limit: the header block alone is over it, or the declared length is.
    pub fn try_extract(&mut self) -> Result<Option<Bytes>, ParseError> {
        // Resume a few bytes back so a terminator split across reads is found
        let from = self.scanned.saturating_sub(CRLFCRLF.len() - 1);
        let header_end = match find_header_end(&self.buf, from) {
            Some(pos) => pos + CRLFCRLF.len(),
            None => {
                self.scanned = self.buf.len();
                if self.buf.len() > self.limit {
                    return Err(ParseError::TooLarge(self.limit));
                }
                return Ok(None);
            }
        };

        let total = content_length(&self.buf[..header_end])
            .and_then(|len| header_end.checked_add(len))
            .filter(|total| *total <= self.limit)
            .ok_or(ParseError::TooLarge(self.limit))?;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.scanned = 0;
        Ok(Some(self.buf.split_to(total).freeze()))
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}

/// `Content-Length` from a raw header block; the last occurrence wins.
///
/// `None` when the value is numeric but does not fit in `usize`.
fn content_length(head: &[u8]) -> Option<usize> {
    let head = String::from_utf8_lossy(head);
    let value = head
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .last()
        .map(|(_, value)| value.trim().to_string());

    match value.map(|v| v.parse::<usize>()) {
        None => Some(0),
        Some(Ok(len)) => Some(len),
        Some(Err(e)) if *e.kind() == IntErrorKind::PosOverflow => None,
        Some(Err(_)) => Some(0),
    }
}
