//! Typed failures and their wire rendering.

use crate::{
    http::{multidict::MultiDict, multidict::MultiDictError, response::ResponseWriter},
    StatusCode,
};
use serde_json::{json, Value};
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Classification carried by a [`RestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestErrorKind {
    /// Raised by a handler (or the server) with an explicit status.
    Protocol,
    /// No route matched the request.
    NotFound,
    /// A route matched the path but not the method.
    MethodNotAllowed,
    /// The request body could not be decoded or loaded.
    BadRequest,
    /// An unclassified handler failure; the cause stays server-side.
    Internal,
    /// A CORS preflight answered without reaching a handler.
    Preflight,
}

/// A client-visible failure: status, human message, machine body and
/// optional extra headers.
///
/// Rendered on the wire as
/// `{"error": <body>, "error_code": <status>, "error_reason": <message>}`
/// with `content-type: application/json; charset=utf-8`. An error built
/// with [`without_body`](RestError::without_body) is written as an empty
/// `text/plain` response instead.
///
/// # Examples
/// ```
/// use maker_rest::{RestError, StatusCode};
/// use serde_json::json;
///
/// let err = RestError::new(StatusCode::Conflict, "User already exists")
///     .with_body(json!({"field": "email"}))
///     .with_header("x-request-id", "42");
///
/// assert_eq!(err.status(), StatusCode::Conflict);
/// assert_eq!(err.message(), "User already exists");
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct RestError {
    status: StatusCode,
    message: String,
    body: Option<Value>,
    headers: MultiDict,
    kind: RestErrorKind,
    #[source]
    cause: Option<BoxError>,
}

impl RestError {
    /// Creates a protocol failure with an empty JSON object as its body.
    pub fn new<M: Into<String>>(status: StatusCode, message: M) -> Self {
        Self {
            status,
            message: message.into(),
            body: Some(Value::Object(Default::default())),
            headers: MultiDict::headers(),
            kind: RestErrorKind::Protocol,
            cause: None,
        }
    }

    /// `400 Bad Request` with `message` as the reason.
    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self::new(StatusCode::BadRequest, message).kind(RestErrorKind::BadRequest)
    }

    /// `404 Not Found`.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound, "Not Found").kind(RestErrorKind::NotFound)
    }

    /// `405 Method Not Allowed` listing the methods the path accepts.
    pub fn method_not_allowed<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allow = allowed
            .into_iter()
            .map(|m| m.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join(", ");

        Self::new(StatusCode::MethodNotAllowed, "Method Not Allowed")
            .kind(RestErrorKind::MethodNotAllowed)
            .with_header("allow", allow)
    }

    /// `403 Forbidden`.
    pub fn forbidden() -> Self {
        Self::new(StatusCode::Forbidden, "Forbidden")
    }

    /// `500 Internal Server Error` wrapping `cause`.
    ///
    /// The cause is reachable through [`std::error::Error::source`] for
    /// logging and is never written to the client.
    pub fn internal<E: Into<BoxError>>(cause: E) -> Self {
        let mut err = Self::new(StatusCode::InternalServerError, "Internal Server Error")
            .kind(RestErrorKind::Internal);
        err.cause = Some(cause.into());
        err
    }

    /// The CORS preflight short-circuit: `200 OK`, no body, only `headers`.
    pub fn preflight(headers: MultiDict) -> Self {
        Self::new(StatusCode::Ok, "OK")
            .kind(RestErrorKind::Preflight)
            .without_body()
            .with_headers(headers)
    }

    #[inline]
    fn kind(mut self, kind: RestErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Replaces the machine-readable body.
    pub fn with_body<B: Into<Value>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Marks the body as absent: the error renders as empty `text/plain`.
    pub fn without_body(mut self) -> Self {
        self.body = None;
        self
    }

    /// Appends one extra response header.
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Appends every pair of `headers`, keeping repeated names.
    pub fn with_headers(mut self, headers: MultiDict) -> Self {
        self.headers.extend(headers.iter());
        self
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `None` when the body was explicitly removed.
    #[inline]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    #[inline]
    pub fn headers(&self) -> &MultiDict {
        &self.headers
    }

    #[inline]
    pub fn error_kind(&self) -> RestErrorKind {
        self.kind
    }

    /// Serialized JSON payload, or `None` for a body-less error.
    pub fn payload(&self) -> Option<Vec<u8>> {
        let body = self.body.as_ref()?;
        let payload = json!({
            "error": body,
            "error_code": self.status.as_u16(),
            "error_reason": self.message,
        });

        Some(payload.to_string().into_bytes())
    }

    /// Writes the complete response: status line, `host` (when given),
    /// `content-type` and `content-length`, extra headers, then the body.
    ///
    /// Both the JSON and the body-less branch finish through the same
    /// framing call, so the message is always complete on the wire.
    pub(crate) fn write_response(&self, writer: &mut ResponseWriter, host: Option<&str>) {
        writer.status(self.status);
        if let Some(host) = host {
            writer.header("host", host);
        }

        let payload = self.payload();
        match payload {
            Some(_) => writer.header("content-type", "application/json; charset=utf-8"),
            None => writer.header("content-type", "text/plain"),
        };

        writer.body_after_length(payload.as_deref().unwrap_or_default(), &self.headers);
    }
}

/// Outcome of a failed handler, classified by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The body is not valid text in the expected encoding. Becomes `400`.
    #[error("{0}")]
    Decode(String),
    /// The body is not a valid structured payload. Becomes `400`.
    #[error("{0}")]
    Load(String),
    /// Already typed; passed to the client unchanged.
    #[error(transparent)]
    Rest(#[from] RestError),
    /// Anything else. Becomes `500` with the cause logged, not sent.
    #[error(transparent)]
    Other(#[from] BoxError),
}

impl HandlerError {
    /// Wraps an arbitrary error as an unclassified failure.
    pub fn other<E: Into<BoxError>>(err: E) -> Self {
        HandlerError::Other(err.into())
    }
}

impl From<MultiDictError> for HandlerError {
    fn from(err: MultiDictError) -> Self {
        HandlerError::Rest(RestError::bad_request(err.to_string()))
    }
}
