//! Incremental HTTP/1.x request reader.
//!
//! Bytes read past the end of one message stay in the buffer and are
//! parsed as the start of the next, so pipelined requests are served in
//! order.

use crate::{
    errors::ErrorKind,
    http::{
        multidict::MultiDict,
        query::parse_query,
        types::{header_tokens, slice_to_usize, Method, Version},
    },
    limits::ReqLimits,
};
use memchr::{memchr, memmem};
use std::{io, mem, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::sleep,
};

const READ_CHUNK: usize = 4096;

/// Request line and headers of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) path: String,
    pub(crate) query: MultiDict,
    pub(crate) version: Version,
    pub(crate) headers: MultiDict,
    pub(crate) keep_alive: bool,
    pub(crate) content_length: Option<usize>,
}

impl RequestHead {
    /// Whether a body is expected: always with `content-length`, and with an
    /// empty body for methods that normally carry one.
    #[inline]
    pub(crate) fn has_body(&self) -> bool {
        self.content_length.is_some() || !self.method.is_bodiless()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Parser {
    buffer: Vec<u8>,
}

impl Parser {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Reads the next request head.
    ///
    /// Returns `Ok(None)` when the peer closes, or stays silent for
    /// `idle`, before sending any byte of a new request.
    pub(crate) async fn read_head<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        limits: &ReqLimits,
        idle: Duration,
    ) -> Result<Option<RequestHead>, ErrorKind> {
        loop {
            // Blank lines between pipelined messages are ignored.
            while self.buffer.starts_with(b"\r\n") {
                self.buffer.drain(..2);
            }

            if let Some(end) = memmem::find(&self.buffer, b"\r\n\r\n") {
                if end + 4 > limits.head_size {
                    return Err(ErrorKind::HeadTooLarge);
                }

                let head = parse_head(&self.buffer[..end], limits);
                self.buffer.drain(..end + 4);
                return head.map(Some);
            }

            if self.buffer.len() >= limits.head_size {
                return Err(ErrorKind::HeadTooLarge);
            }

            match self.fill_buffer(stream, idle).await {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut && self.buffer.is_empty() => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Accumulates exactly `length` body bytes.
    pub(crate) async fn read_body<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        length: usize,
        idle: Duration,
    ) -> Result<Vec<u8>, ErrorKind> {
        while self.buffer.len() < length {
            if self.fill_buffer(stream, idle).await? == 0 {
                return Err(ErrorKind::IncompleteBody {
                    expected: length,
                    received: self.buffer.len(),
                });
            }
        }

        let rest = self.buffer.split_off(length);
        Ok(mem::replace(&mut self.buffer, rest))
    }

    async fn fill_buffer<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        time: Duration,
    ) -> Result<usize, io::Error> {
        self.buffer.reserve(READ_CHUNK);

        tokio::select! {
            biased;

            read_result = stream.read_buf(&mut self.buffer) => read_result,
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }
}

/// Parses `head`, the bytes before the blank line.
pub(crate) fn parse_head(head: &[u8], limits: &ReqLimits) -> Result<RequestHead, ErrorKind> {
    let head = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::InvalidEncoding)?;
    let mut lines = head.split("\r\n");

    let first_line = lines.next().unwrap_or_default();
    let (method, target, version) = parse_first_line(first_line)?;
    let (version, mut keep_alive) = version;

    let mut headers = MultiDict::headers();
    for line in lines {
        if headers.len() >= limits.header_count {
            return Err(ErrorKind::TooManyHeaders);
        }

        let (name, value) = parse_header_line(line)?;
        headers.add(name, value);
    }

    if let Some(connection) = headers.get("connection") {
        for token in header_tokens(connection) {
            match token.as_str() {
                "close" => keep_alive = false,
                "keep-alive" => keep_alive = true,
                _ => {}
            }
        }
    }

    if headers.contains("transfer-encoding") {
        return Err(ErrorKind::UnsupportedTransferEncoding);
    }

    let content_length = parse_content_length(&headers, limits)?;

    let (path, query) = match memchr(b'?', target.as_bytes()) {
        Some(pos) => (&target[..pos], parse_query(&target[pos + 1..])),
        None => (target, MultiDict::new()),
    };

    Ok(RequestHead {
        method,
        target: target.to_owned(),
        path: path.to_owned(),
        query,
        version,
        headers,
        keep_alive,
        content_length,
    })
}

#[inline]
fn parse_first_line(line: &str) -> Result<(Method, &str, (Version, bool)), ErrorKind> {
    let mut parts = line.splitn(3, ' ');

    let method = Method::from_bytes(parts.next().unwrap_or_default().as_bytes())?;

    let target = parts.next().ok_or(ErrorKind::InvalidUrl)?;
    let valid_target = target.starts_with('/') || (method == Method::Options && target == "*");
    if !valid_target || target.bytes().any(|b| b.is_ascii_control() || b == b' ') {
        return Err(ErrorKind::InvalidUrl);
    }

    let version = parts.next().ok_or(ErrorKind::InvalidVersion)?;
    if !version.starts_with("HTTP/") {
        return Err(ErrorKind::InvalidVersion);
    }

    Ok((method, target, Version::from_bytes(version.as_bytes())?))
}

#[inline]
fn parse_header_line(line: &str) -> Result<(&str, &str), ErrorKind> {
    let colon = memchr(b':', line.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;
    let name = &line[..colon];

    let valid_name = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'"' | b'/' | b'[' | b']'));
    if !valid_name {
        return Err(ErrorKind::InvalidHeader);
    }

    Ok((name, line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t')))
}

#[inline]
fn parse_content_length(headers: &MultiDict, limits: &ReqLimits) -> Result<Option<usize>, ErrorKind> {
    let mut length = None;

    for value in headers.get_all("content-length") {
        let parsed = slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?;

        match length {
            Some(previous) if previous != parsed => return Err(ErrorKind::InvalidContentLength),
            _ => length = Some(parsed),
        }
    }

    match length {
        Some(length) if length > limits.body_size => Err(ErrorKind::BodyTooLarge),
        _ => Ok(length),
    }
}
