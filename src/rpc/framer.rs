//! Incremental request framing.
//!
//! Requests look like a minimal HTTP/1.x message:
//! ```text
//! POST / HTTP/1.1\r\n
//! Content-Length: <length>\r\n
//! \r\n
//! <body>
//! ```
//! [`try_parse`] frames a complete buffer in one go. Connections feed a
//! growing buffer through a [`FrameScanner`] instead, which remembers how far
//! it has searched so each byte is scanned once. Either way the result is one
//! complete request or a report that more bytes are needed. Malformed header
//! lines degrade to `None` values instead of failing.

use std::collections::HashMap;

const SEPARATOR: &[u8] = b"\r\n\r\n";
const LINE_BREAK: &[u8] = b"\r\n";
const HEADER_DELIMITER: &[u8] = b": ";

/// A framed request, before any JSON interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    /// Upper-cased first word of the request line, if any.
    pub method: Option<String>,
    /// Lower-cased header names mapped to their raw values.
    pub headers: HashMap<String, Option<Vec<u8>>>,
    pub body: Vec<u8>,
}

impl RawRequest {
    /// Raw bytes of a header, `None` when absent or value-less.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).and_then(|value| value.as_deref())
    }

    /// Header value decoded as UTF-8 (lossily).
    pub fn header_str(&self, name: &str) -> Option<String> {
        self.header(name)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    pub fn is_preflight(&self) -> bool {
        self.method.as_deref() == Some("OPTIONS")
    }
}

/// Try to frame one request from the start of `buffer`.
///
/// Returns the request and the number of bytes it occupies, or `None` when
/// the buffer does not yet hold a complete request.
pub fn try_parse(buffer: &[u8]) -> Option<(RawRequest, usize)> {
    FrameScanner::default().advance(buffer)
}

/// Framing progress over a buffer that only ever grows between calls.
#[derive(Debug, Default)]
pub struct FrameScanner {
    /// Bytes already searched for the separator.
    scanned: usize,
    header_end: Option<usize>,
    /// Length of the whole request, once the headers are parsed.
    total_length: Option<usize>,
}

impl FrameScanner {
    /// Whether the blank line ending the header block has been seen.
    pub fn headers_complete(&self) -> bool {
        self.header_end.is_some()
    }

    /// Try to frame one request from the start of `buffer`, which must extend
    /// the buffer passed on the previous call.
    pub fn advance(&mut self, buffer: &[u8]) -> Option<(RawRequest, usize)> {
        let header_end = match self.header_end {
            Some(end) => end,
            None => {
                // The separator may straddle the previous end of the buffer.
                let from = self.scanned.saturating_sub(SEPARATOR.len() - 1);
                self.scanned = buffer.len();
                let end = from + find(buffer.get(from..)?, SEPARATOR)?;
                self.header_end = Some(end);
                end
            }
        };

        if let Some(total) = self.total_length {
            if buffer.len() < total {
                return None;
            }
        }

        let (method, headers) = parse_header_block(&buffer[..header_end]);
        let body_start = header_end + SEPARATOR.len();
        let total_length = body_start.checked_add(content_length(&headers))?;
        self.total_length = Some(total_length);
        if buffer.len() < total_length {
            return None;
        }

        let request = RawRequest {
            method,
            headers,
            body: buffer[body_start..total_length].to_vec(),
        };
        Some((request, total_length))
    }
}

type Headers = HashMap<String, Option<Vec<u8>>>;

fn parse_header_block(block: &[u8]) -> (Option<String>, Headers) {
    let mut lines = split(block, LINE_BREAK);
    let method = lines.next().and_then(parse_method);

    let mut headers = HashMap::new();
    for line in lines {
        let (name, value) = match find(line, HEADER_DELIMITER) {
            Some(at) => (&line[..at], Some(line[at + HEADER_DELIMITER.len()..].to_vec())),
            None => (line, None),
        };
        headers.insert(String::from_utf8_lossy(name).to_lowercase(), value);
    }
    (method, headers)
}

fn parse_method(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    text.split_whitespace().next().map(str::to_uppercase)
}

/// Declared body length; absent or unparseable values count as zero.
fn content_length(headers: &Headers) -> usize {
    headers
        .get("content-length")
        .and_then(|value| value.as_deref())
        .and_then(|value| std::str::from_utf8(value).ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split<'a>(mut bytes: &'a [u8], delimiter: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        match find(bytes, delimiter) {
            Some(at) => {
                let line = &bytes[..at];
                bytes = &bytes[at + delimiter.len()..];
                Some(line)
            }
            None => {
                done = true;
                Some(bytes)
            }
        }
    })
}
