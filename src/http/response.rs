//! Wire-level HTTP/1.x response writer.

use crate::{
    http::{
        encoding::ContentEncoding,
        multidict::MultiDict,
        types::{header_tokens, StatusCode, Version},
    },
    limits::RespLimits,
};
use std::io;

/// Builds one response into a reusable buffer.
///
/// Calls must follow the order `status` -> `header`/`headers` -> `body`
/// (or `encoded_body`). The framing headers (`connection`,
/// `content-length`, `transfer-encoding`, `content-encoding`) are written
/// by the body methods and must not be added by hand.
///
/// # Panics
/// Ordering violations panic in `debug` builds.
#[derive(Debug)]
pub(crate) struct ResponseWriter {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    /// Set for `HEAD` requests: headers are written, the body is not.
    pub(crate) head_only: bool,
    state: WriterState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriterState {
    Clean,
    Headers,
    Complete,
}

impl ResponseWriter {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            head_only: false,
            state: WriterState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.head_only = false;
        self.state = WriterState::Clean;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    #[inline]
    #[track_caller]
    pub(crate) fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == WriterState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.to_first_line(self.version));
        self.state = WriterState::Headers;
        self
    }

    /// Writes one header line. Lines containing CR or LF are dropped.
    #[inline]
    #[track_caller]
    pub(crate) fn header(&mut self, name: &str, value: &str) -> &mut Self {
        debug_assert!(
            self.state == WriterState::Headers,
            "Must be called after status() and before any body method"
        );

        if !is_header_safe(name) || !is_header_safe(value) {
            tracing::warn!(header = name, "dropping response header with line break");
            return self;
        }

        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(b": ");
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Writes every pair, repeated names included, in insertion order.
    ///
    /// Framing headers are skipped; a `connection: close` among them
    /// still closes the connection after this response.
    #[track_caller]
    pub(crate) fn headers(&mut self, headers: &MultiDict) -> &mut Self {
        for (name, value) in headers.iter() {
            if !is_framing_header(name) {
                self.header(name, value);
                continue;
            }

            if name.eq_ignore_ascii_case("connection") && header_tokens(value).any(|t| t == "close") {
                self.keep_alive = false;
            } else {
                tracing::warn!(header = name, "dropping framing header set by the application");
            }
        }
        self
    }

    /// Finishes the head with `content-length` and appends `data`.
    #[track_caller]
    pub(crate) fn body(&mut self, data: &[u8]) {
        debug_assert!(
            self.state == WriterState::Headers,
            "Must be called after status() and any header methods"
        );

        self.connection();
        self.content_length(data.len());
        self.end_head(data);
    }

    /// Like [`body`](Self::body), but `content-length` directly follows the
    /// headers written so far and `trailing` comes after it.
    #[track_caller]
    pub(crate) fn body_after_length(&mut self, data: &[u8], trailing: &MultiDict) {
        debug_assert!(
            self.state == WriterState::Headers,
            "Must be called after status() and any header methods"
        );

        self.content_length(data.len());
        self.headers(trailing);
        self.connection();
        self.end_head(data);
    }

    /// Finishes the head for `encoding` and appends the body.
    ///
    /// Compressed codings are framed with `transfer-encoding: chunked`;
    /// [`ContentEncoding::Identity`] falls back to [`body`](Self::body).
    #[track_caller]
    pub(crate) fn encoded_body(
        &mut self,
        data: &[u8],
        encoding: ContentEncoding,
        limits: &RespLimits,
    ) -> io::Result<()> {
        let Some(coding) = encoding.as_str() else {
            self.body(data);
            return Ok(());
        };

        debug_assert!(
            self.state == WriterState::Headers,
            "Must be called after status() and any header methods"
        );

        self.connection();
        self.header("transfer-encoding", "chunked");
        self.header("content-encoding", coding);
        self.buffer.extend_from_slice(b"\r\n");

        if !self.head_only {
            encoding.write_chunked(data, limits, &mut self.buffer)?;
        }
        self.state = WriterState::Complete;

        Ok(())
    }

    #[inline(always)]
    fn content_length(&mut self, length: usize) {
        self.buffer.extend_from_slice(b"content-length: ");
        self.buffer
            .extend_from_slice(length.to_string().as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
    }

    #[inline(always)]
    fn end_head(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(b"\r\n");
        if !self.head_only {
            self.buffer.extend_from_slice(data);
        }
        self.state = WriterState::Complete;
    }

    #[inline(always)]
    fn connection(&mut self) {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static str> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some("close"),
            (Version::Http10, true) => Some("keep-alive"),
            (Version::Http10, false) => Some("close"),
        }
    }
}

/// Headers written by the body methods only.
const FRAMING_HEADERS: [&str; 4] = [
    "connection",
    "content-length",
    "transfer-encoding",
    "content-encoding",
];

#[inline]
fn is_framing_header(name: &str) -> bool {
    FRAMING_HEADERS
        .iter()
        .any(|framing| framing.eq_ignore_ascii_case(name))
}

#[inline]
fn is_header_safe(text: &str) -> bool {
    !text.bytes().any(|b| b == b'\r' || b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::encoding::dechunk;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn text(writer: &ResponseWriter) -> &str {
        std::str::from_utf8(writer.buffer()).unwrap()
    }

    #[test]
    fn connection_header() {
        #[rustfmt::skip]
        let cases = [
            (Version::Http11, true,  ""),
            (Version::Http11, false, "connection: close\r\n"),
            (Version::Http10, true,  "connection: keep-alive\r\n"),
            (Version::Http10, false, "connection: close\r\n"),
        ];

        for (version, keep_alive, expected) in cases {
            let mut writer = ResponseWriter::new(&RespLimits::default());
            writer.version = version;
            writer.keep_alive = keep_alive;
            writer.status(StatusCode::Ok).body(b"{}");

            let head = format!("{} 200 OK\r\n{expected}content-length: 2\r\n\r\n{{}}", version.as_str());
            assert_eq!(text(&writer), head);
        }
    }

    #[test]
    fn multi_valued_headers() {
        let mut headers = MultiDict::headers();
        headers.add("set-cookie", "a=1");
        headers.add("x-id", "7");
        headers.add("set-cookie", "b=2");

        let mut writer = ResponseWriter::new(&RespLimits::default());
        writer.status(StatusCode::Created).headers(&headers).body(b"");

        assert_eq!(
            text(&writer),
            "HTTP/1.1 201 Created\r\nset-cookie: a=1\r\nx-id: 7\r\nset-cookie: b=2\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[test]
    fn framing_headers_from_the_application() {
        #[rustfmt::skip]
        let cases = [
            (("Content-Length",    "999"),        true,  "content-length: 3\r\n\r\n\"x\""),
            (("Transfer-Encoding", "chunked"),    true,  "content-length: 3\r\n\r\n\"x\""),
            (("content-encoding",  "gzip"),       true,  "content-length: 3\r\n\r\n\"x\""),
            (("Connection",        "keep-alive"), true,  "content-length: 3\r\n\r\n\"x\""),
            (("Connection",        "Close"),      false, "connection: close\r\ncontent-length: 3\r\n\r\n\"x\""),
        ];

        for ((name, value), keep_alive, tail) in cases {
            let mut headers = MultiDict::headers();
            headers.add("x-id", "1");
            headers.add(name, value);

            let mut writer = ResponseWriter::new(&RespLimits::default());
            writer.status(StatusCode::Ok).headers(&headers).body(br#""x""#);

            assert_eq!(writer.keep_alive, keep_alive, "{name}: {value}");
            assert_eq!(text(&writer), format!("HTTP/1.1 200 OK\r\nx-id: 1\r\n{tail}"), "{name}: {value}");
        }
    }

    #[test]
    fn header_injection_dropped() {
        let mut writer = ResponseWriter::new(&RespLimits::default());
        writer
            .status(StatusCode::Ok)
            .header("x-evil", "a\r\nset-cookie: pwned=1")
            .body(b"");

        assert_eq!(text(&writer), "HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn head_only_keeps_length() {
        let mut writer = ResponseWriter::new(&RespLimits::default());
        writer.head_only = true;
        writer.status(StatusCode::Ok).body(b"[1,2,3]");

        assert_eq!(text(&writer), "HTTP/1.1 200 OK\r\ncontent-length: 7\r\n\r\n");
    }

    #[test]
    fn gzip_body() {
        let limits = RespLimits::default();
        let mut writer = ResponseWriter::new(&limits);
        writer.status(StatusCode::Ok);
        writer
            .encoded_body(br#"{"hello":"world"}"#, ContentEncoding::Gzip, &limits)
            .unwrap();

        let head = "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\ncontent-encoding: gzip\r\n\r\n";
        let buffer = writer.buffer();
        assert!(buffer.starts_with(head.as_bytes()));

        let (chunks, rest) = dechunk(&buffer[head.len()..]);
        assert!(rest.is_empty());

        let mut decoded = String::new();
        GzDecoder::new(&chunks.concat()[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, r#"{"hello":"world"}"#);
    }

    #[test]
    fn identity_falls_back_to_length() {
        let limits = RespLimits::default();
        let mut writer = ResponseWriter::new(&limits);
        writer.status(StatusCode::Ok);
        writer
            .encoded_body(b"true", ContentEncoding::Identity, &limits)
            .unwrap();

        assert_eq!(text(&writer), "HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\ntrue");
    }

    #[test]
    fn reset_reuses_buffer() {
        let limits = RespLimits::default();
        let mut writer = ResponseWriter::new(&limits);
        writer.keep_alive = false;
        writer.status(StatusCode::Ok).body(b"1");

        writer.reset(&limits);
        assert!(writer.buffer().is_empty());
        assert!(writer.keep_alive);
        writer.status(StatusCode::NoContent).body(b"");
        assert_eq!(text(&writer), "HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    #[cfg(debug_assertions)]
    fn double_status() {
        let mut writer = ResponseWriter::new(&RespLimits::default());
        writer.status(StatusCode::Ok).status(StatusCode::Ok);
    }
}
