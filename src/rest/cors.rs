//! Cross-origin resource sharing: preflight answers and response headers.

use crate::{http::multidict::MultiDict, Method, Request};
use std::time::Duration;

/// CORS settings for a [`Dispatcher`](crate::Dispatcher).
///
/// Without a `CorsConfig` the dispatcher treats `OPTIONS` like any other
/// method and adds no `Access-Control-*` headers.
///
/// # Examples
/// ```
/// use maker_rest::CorsConfig;
/// use std::time::Duration;
///
/// let cors = CorsConfig {
///     allow_origins: vec!["https://app.example".into()],
///     allow_credentials: true,
///     max_age: Some(Duration::from_secs(3600)),
///     ..CorsConfig::default()
/// };
///
/// assert_eq!(cors.allowed_origin("https://app.example").as_deref(), Some("https://app.example"));
/// assert_eq!(cors.allowed_origin("https://evil.example"), None);
/// ```
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Origins allowed to call the API; `"*"` allows any (default: `["*"]`).
    pub allow_origins: Vec<String>,
    /// Methods announced in preflight answers (default: every routable method).
    pub allow_methods: Vec<Method>,
    /// Request headers announced in preflight answers.
    ///
    /// Empty (the default) echoes `Access-Control-Request-Headers`.
    pub allow_headers: Vec<String>,
    /// Response headers scripts may read (default: none).
    pub expose_headers: Vec<String>,
    /// How long a preflight answer may be cached (default: `10 minutes`).
    pub max_age: Option<Duration>,
    /// Whether cookies and credentials are allowed (default: `false`).
    ///
    /// With credentials a `"*"` origin is answered with the caller's origin,
    /// since browsers refuse the wildcard then.
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec![String::from("*")],
            allow_methods: vec![
                Method::Get,
                Method::Head,
                Method::Post,
                Method::Put,
                Method::Patch,
                Method::Delete,
            ],
            allow_headers: Vec::new(),
            expose_headers: Vec::new(),
            max_age: Some(Duration::from_secs(600)),
            allow_credentials: false,
        }
    }
}

impl CorsConfig {
    /// Value of `Access-Control-Allow-Origin` for `origin`, or `None` when
    /// the origin is not allowed.
    pub fn allowed_origin(&self, origin: &str) -> Option<String> {
        if self.allow_origins.iter().any(|o| o == origin) {
            return Some(origin.to_owned());
        }

        match self.allow_origins.iter().any(|o| o == "*") {
            true if self.allow_credentials => Some(origin.to_owned()),
            true => Some(String::from("*")),
            false => None,
        }
    }

    /// Headers answering a preflight, or `None` when `request` is not one.
    ///
    /// A preflight is an `OPTIONS` request carrying both `Origin` and
    /// `Access-Control-Request-Method`. When the origin or the requested
    /// method is refused the answer carries no `Access-Control-Allow-*`
    /// headers, which makes the browser block the actual request.
    pub(crate) fn preflight(&self, request: &Request) -> Option<MultiDict> {
        if request.method() != Method::Options {
            return None;
        }
        let origin = request.header("origin")?;
        let requested = request.header("access-control-request-method")?;

        let mut headers = MultiDict::headers();
        headers.add("vary", "Origin");

        let method_allowed = self.allow_methods.iter().any(|m| m.as_str() == requested.trim());
        let Some(allow_origin) = self.allowed_origin(origin).filter(|_| method_allowed) else {
            return Some(headers);
        };

        headers.add("access-control-allow-origin", allow_origin);
        if self.allow_credentials {
            headers.add("access-control-allow-credentials", "true");
        }
        headers.add("access-control-allow-methods", join(self.allow_methods.iter().map(Method::as_str)));

        match self.allow_headers.is_empty() {
            true => {
                if let Some(requested) = request.header("access-control-request-headers") {
                    headers.add("access-control-allow-headers", requested);
                }
            }
            false => headers.add("access-control-allow-headers", join(&self.allow_headers)),
        }

        if let Some(max_age) = self.max_age {
            headers.add("access-control-max-age", max_age.as_secs().to_string());
        }

        Some(headers)
    }

    /// Headers added to the answer of an actual cross-origin request.
    ///
    /// Empty for same-origin requests and refused origins.
    pub fn response_headers(&self, request: &Request) -> MultiDict {
        let mut headers = MultiDict::headers();
        let Some(origin) = request.header("origin") else {
            return headers;
        };
        let Some(allow_origin) = self.allowed_origin(origin) else {
            return headers;
        };

        if allow_origin != "*" {
            headers.add("vary", "Origin");
        }
        headers.add("access-control-allow-origin", allow_origin);
        if self.allow_credentials {
            headers.add("access-control-allow-credentials", "true");
        }
        if !self.expose_headers.is_empty() {
            headers.add("access-control-expose-headers", join(&self.expose_headers));
        }

        headers
    }
}

fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join(", ")
}
