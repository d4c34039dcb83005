use crate::{rest::RestError, StatusCode};
use std::io;

/// Failures raised below the dispatch core: while reading and framing the
/// inbound message, before any handler runs.
#[derive(Debug, PartialEq, thiserror::Error)]
pub(crate) enum ErrorKind {
    #[error("invalid HTTP method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,
    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid character encoding in request head")]
    InvalidEncoding,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("request head too large")]
    HeadTooLarge,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,

    #[error("request body too large")]
    BodyTooLarge,
    #[error("connection closed before the body was complete ({received} of {expected} bytes)")]
    IncompleteBody { expected: usize, received: usize },

    #[error("service temporarily unavailable")]
    ServiceUnavailable,
    #[error("I/O error: {0}")]
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $code:literal, $reason:literal;)*) => {
        /// Converts the failure into the JSON error taxonomy so it is
        /// written the same way a handler failure is.
        pub(crate) fn into_rest_error(self) -> RestError {
            match self { $(
                Self::$name { .. } => RestError::new(StatusCode::$status, $reason)
                    .with_body(serde_json::Value::from($code)),
            )* }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: BadRequest => "INVALID_METHOD", "Invalid HTTP method";
        InvalidUrl: BadRequest => "INVALID_URL", "Invalid URL format";
        InvalidVersion: BadRequest => "INVALID_VERSION", "Invalid HTTP version";
        UnsupportedVersion: HttpVersionNotSupported
            => "UNSUPPORTED_VERSION", "HTTP version not supported";

        InvalidHeader: BadRequest => "INVALID_HEADER", "Invalid header format";
        InvalidEncoding: BadRequest => "INVALID_ENCODING", "Request head is not valid UTF-8";
        TooManyHeaders: RequestHeaderFieldsTooLarge => "TOO_MANY_HEADERS", "Too many headers";
        HeadTooLarge: RequestHeaderFieldsTooLarge => "HEAD_TOO_LARGE", "Request head too large";
        InvalidContentLength: BadRequest => "INVALID_CONTENT_LENGTH", "Invalid Content-Length";
        UnsupportedTransferEncoding: LengthRequired
            => "LENGTH_REQUIRED", "Only Content-Length framed bodies are accepted";

        BodyTooLarge: PayloadTooLarge => "BODY_TOO_LARGE", "Request body too large";
        IncompleteBody: BadRequest => "BODY_MISMATCH", "Body length mismatch";

        ServiceUnavailable: ServiceUnavailable
            => "SERVICE_UNAVAILABLE", "Service temporarily unavailable";
        Io: ServiceUnavailable => "IO_ERROR", "I/O error occurred";
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_as_rest_errors() {
        #[rustfmt::skip]
        let cases = [
            (ErrorKind::InvalidMethod,               400, "INVALID_METHOD"),
            (ErrorKind::UnsupportedVersion,          505, "UNSUPPORTED_VERSION"),
            (ErrorKind::TooManyHeaders,              431, "TOO_MANY_HEADERS"),
            (ErrorKind::UnsupportedTransferEncoding, 411, "LENGTH_REQUIRED"),
            (ErrorKind::BodyTooLarge,                413, "BODY_TOO_LARGE"),
            (ErrorKind::ServiceUnavailable,          503, "SERVICE_UNAVAILABLE"),
            (
                ErrorKind::IncompleteBody { expected: 10, received: 3 },
                400, "BODY_MISMATCH",
            ),
        ];

        for (kind, status, code) in cases {
            let err = kind.into_rest_error();

            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.body(), Some(&serde_json::Value::from(code)));
        }
    }

    #[test]
    fn io_errors_compare_by_kind() {
        let a = ErrorKind::from(io::Error::new(io::ErrorKind::TimedOut, "a"));
        let b = ErrorKind::from(io::Error::new(io::ErrorKind::TimedOut, "b"));

        assert_eq!(a, b);
        assert_ne!(a, ErrorKind::from(io::Error::from(io::ErrorKind::BrokenPipe)));
    }
}
