//! Core HTTP protocol types shared by the parser, the dispatcher and the writer

use crate::errors::ErrorKind;
use std::fmt;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

/// Splits a comma separated header value into lower-cased, trimmed tokens.
///
/// Empty tokens are skipped, so `"gzip, , deflate"` yields `gzip` and `deflate`.
#[inline]
pub(crate) fn header_tokens(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
}

// METHOD

/// HTTP request methods
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
///
/// # Disabled methods
///
/// * `TRACE` - disabled for security reasons
/// * `CONNECT` - disabled because a JSON service never tunnels
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET method - transfer a current representation of the target resource
    Get,
    /// PUT method - replace all current representations of the target resource
    Put,
    /// POST method - perform resource-specific processing on the request payload
    Post,
    /// HEAD method - same as GET but without response body
    Head,
    /// PATCH method - apply partial modifications to a resource
    Patch,
    /// DELETE method - remove all current representations of the target resource
    Delete,
    /// OPTIONS method - describe the communication options, used by CORS preflight
    Options,
}

impl Method {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"GET" => Ok(Method::Get),
            b"PUT" => Ok(Method::Put),
            b"POST" => Ok(Method::Post),
            b"HEAD" => Ok(Method::Head),
            b"PATCH" => Ok(Method::Patch),
            b"DELETE" => Ok(Method::Delete),
            b"OPTIONS" => Ok(Method::Options),
            _ => Err(ErrorKind::InvalidMethod),
        }
    }

    /// Returns the upper-case method token, e.g. `"GET"`.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// Methods whose requests are not expected to carry a body.
    #[inline]
    pub const fn is_bodiless(&self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Options | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - connections close after each response unless
    /// `Connection: keep-alive` is sent.
    ///
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,

    /// HTTP/1.1 - persistent connections by default
    ///
    /// [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

impl Version {
    /// Returns the version together with its default keep-alive flag.
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<(Self, bool), ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok((Self::Http11, true)),
            b"HTTP/1.0" => Ok((Self::Http10, false)),
            _ => Err(ErrorKind::UnsupportedVersion),
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $name:ident = ($num:literal, $str:literal);
    )+) => {
        /// HTTP status codes
        ///
        /// Represents valid HTTP status codes as defined in
        /// [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-15).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Returns the HTTP first line as bytes (e.g., `b"HTTP/1.1 200 OK\r\n"`).
            #[inline]
            pub(crate) const fn to_first_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// Returns the canonical reason phrase, e.g. `"Not Found"`.
            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            /// Looks up a status code by its numeric value.
            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code { $(
                    $num => Some(StatusCode::$name),
                )+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    PaymentRequired = (402, "Payment Required");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    UnprocessableEntity = (422, "Unprocessable Entity");
    Locked = (423, "Locked");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    #[inline]
    pub const fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// `true` for the `5xx` range.
    #[inline]
    pub const fn is_server_error(&self) -> bool {
        self.as_u16() >= 500
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_from_bytes() {
        #[rustfmt::skip]
        let cases = [
            ("GET",     Ok(Method::Get)),
            ("PUT",     Ok(Method::Put)),
            ("POST",    Ok(Method::Post)),
            ("HEAD",    Ok(Method::Head)),
            ("PATCH",   Ok(Method::Patch)),
            ("DELETE",  Ok(Method::Delete)),
            ("OPTIONS", Ok(Method::Options)),

            ("get",     Err(ErrorKind::InvalidMethod)),
            ("TRACE",   Err(ErrorKind::InvalidMethod)),
            ("CONNECT", Err(ErrorKind::InvalidMethod)),
            ("",        Err(ErrorKind::InvalidMethod)),
        ];

        for (src, expected) in cases {
            assert_eq!(Method::from_bytes(src.as_bytes()), expected);
        }
    }

    #[test]
    fn status_line() {
        #[rustfmt::skip]
        let cases = [
            (StatusCode::Ok,                  Version::Http11, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound,            Version::Http11, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::BadRequest,          Version::Http10, "HTTP/1.0 400 Bad Request\r\n"),
            (StatusCode::InternalServerError, Version::Http10, "HTTP/1.0 500 Internal Server Error\r\n"),
        ];

        for (status, version, line) in cases {
            assert_eq!(status.to_first_line(version), line.as_bytes());
        }
    }

    #[test]
    fn status_from_u16() {
        assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
        assert_eq!(StatusCode::from_u16(200), Some(StatusCode::Ok));
        assert_eq!(StatusCode::from_u16(299), None);
        assert_eq!(StatusCode::NotFound.as_u16(), 404);
        assert!(StatusCode::BadGateway.is_server_error());
        assert!(!StatusCode::NotFound.is_server_error());
    }

    #[test]
    fn tokens() {
        let tokens: Vec<_> = header_tokens(" GZip ,, Deflate,br ").collect();
        assert_eq!(tokens, ["gzip", "deflate", "br"]);
    }

    #[test]
    fn parse_usize() {
        assert_eq!(slice_to_usize(b"0"), Some(0));
        assert_eq!(slice_to_usize(b"1025"), Some(1025));
        assert_eq!(slice_to_usize(b""), None);
        assert_eq!(slice_to_usize(b"12a"), None);
        assert_eq!(slice_to_usize(b"99999999999999999999999"), None);
    }
}
