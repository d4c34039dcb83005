//! Request routing: the [`Resolver`] contract and the [`Router`] implementation.

use crate::{
    http::multidict::MultiDict,
    rest::{Handler, RestError},
    Method, Request,
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::{fmt, sync::Arc};

/// Characters left unescaped in generated path segments and query values.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A handler chosen for a request, with the parameters its route captured.
#[derive(Clone)]
pub struct Resolved {
    pub handler: Arc<dyn Handler>,
    pub params: MultiDict,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Why [`Resolver::resolve`] found no handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no route matches the request")]
    NotFound,
    /// The path matched, but only for other methods.
    #[error("method not allowed, expected one of {allowed:?}")]
    MethodNotAllowed { allowed: Vec<Method> },
}

impl From<ResolveError> for RestError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => RestError::not_found(),
            ResolveError::MethodNotAllowed { allowed } => {
                RestError::method_not_allowed(allowed.iter().map(Method::as_str))
            }
        }
    }
}

/// Why a route could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route {method} {pattern} is already registered")]
    Duplicate { method: Method, pattern: String },
    #[error("route name {0:?} is already in use")]
    DuplicateName(String),
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
}

/// Why [`Resolver::url_for`] could not build a URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlForError {
    #[error("route {route:?} needs parameter {param:?}")]
    MissingParam { route: String, param: String },
    #[error("reverse URL construction is not supported by this resolver")]
    Unsupported,
}

/// Maps requests to handlers; the seam where application routing plugs in.
///
/// `resolve` must be a pure, deterministic lookup. Routes are registered
/// before the server starts and only read afterwards.
pub trait Resolver: Send + Sync + 'static {
    /// Registers `handler` for `method` requests matching `pattern`,
    /// optionally under `name` for [`url_for`](Resolver::url_for).
    fn add_route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        name: Option<&str>,
    ) -> Result<(), RouteError>;

    fn resolve(&self, request: &Request) -> Result<Resolved, ResolveError>;

    /// Builds the URL of route `name` from `params`.
    ///
    /// Returns `Ok(None)` when no route has this name. Resolvers without
    /// reverse lookup keep this default and answer
    /// [`UrlForError::Unsupported`].
    fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<Option<String>, UrlForError> {
        let _ = (name, params);
        Err(UrlForError::Unsupported)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    #[inline]
    fn same_shape(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            (Segment::Param(_), Segment::Param(_)) => true,
            _ => false,
        }
    }
}

struct Route {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    name: Option<String>,
    handler: Arc<dyn Handler>,
}

impl Route {
    /// Captured parameters when `path` (already split and decoded) fits.
    fn capture(&self, path: &[String]) -> Option<MultiDict> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut params = MultiDict::new();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if value.is_empty() => return None,
                Segment::Param(name) => params.add(name.as_str(), value.as_str()),
            }
        }

        Some(params)
    }

    #[inline]
    fn accepts(&self, method: Method) -> bool {
        self.method == method || (method == Method::Head && self.method == Method::Get)
    }
}

/// Pattern router: literal segments and `{name}` placeholders, each
/// matching exactly one path segment.
///
/// Routes are tried in registration order and the first match wins.
/// `HEAD` requests fall back to `GET` routes.
///
/// # Examples
/// ```
/// use maker_rest::{handler, Resolver, Router};
///
/// let mut router = Router::new();
/// router
///     .named_route(maker_rest::Method::Get, "/users/{id}", "user", handler::sync(|_| Ok(())))
///     .unwrap();
///
/// assert_eq!(
///     router.url_for("user", &[("id", "42"), ("tab", "posts")]).unwrap().as_deref(),
///     Some("/users/42?tab=posts")
/// );
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` without a name.
    pub fn route<H: Handler>(&mut self, method: Method, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.add_route(method, pattern, Arc::new(handler), None)?;
        Ok(self)
    }

    /// Registers `handler` under `name` for reverse lookup.
    pub fn named_route<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        name: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.add_route(method, pattern, Arc::new(handler), Some(name))?;
        Ok(self)
    }

    #[inline]
    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::Get, pattern, handler)
    }

    #[inline]
    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::Post, pattern, handler)
    }

    #[inline]
    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::Put, pattern, handler)
    }

    #[inline]
    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::Patch, pattern, handler)
    }

    #[inline]
    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::Delete, pattern, handler)
    }

    /// Number of registered routes.
    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Resolver for Router {
    fn add_route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        name: Option<&str>,
    ) -> Result<(), RouteError> {
        let segments = parse_pattern(pattern)?;

        let duplicate = self.routes.iter().any(|route| {
            route.method == method
                && route.segments.len() == segments.len()
                && route.segments.iter().zip(&segments).all(|(a, b)| a.same_shape(b))
        });
        if duplicate {
            return Err(RouteError::Duplicate {
                method,
                pattern: pattern.to_owned(),
            });
        }

        if let Some(name) = name {
            if self.routes.iter().any(|route| route.name.as_deref() == Some(name)) {
                return Err(RouteError::DuplicateName(name.to_owned()));
            }
        }

        tracing::debug!(%method, pattern, name, "route registered");
        self.routes.push(Route {
            method,
            pattern: pattern.to_owned(),
            segments,
            name: name.map(str::to_owned),
            handler,
        });

        Ok(())
    }

    fn resolve(&self, request: &Request) -> Result<Resolved, ResolveError> {
        let path = split_path(request.path());
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(params) = route.capture(&path) else {
                continue;
            };

            if route.accepts(request.method()) {
                return Ok(Resolved {
                    handler: Arc::clone(&route.handler),
                    params,
                });
            }

            if !allowed.contains(&route.method) {
                allowed.push(route.method);
            }
        }

        match allowed.is_empty() {
            true => Err(ResolveError::NotFound),
            false => Err(ResolveError::MethodNotAllowed { allowed }),
        }
    }

    fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<Option<String>, UrlForError> {
        let Some(route) = self.routes.iter().find(|r| r.name.as_deref() == Some(name)) else {
            return Ok(None);
        };

        let mut url = String::new();
        let mut used = Vec::new();

        for segment in &route.segments {
            url.push('/');
            match segment {
                Segment::Literal(literal) => url.extend(utf8_percent_encode(literal, UNRESERVED)),
                Segment::Param(param) => {
                    let value = params
                        .iter()
                        .find(|(key, _)| key == param)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| UrlForError::MissingParam {
                            route: route.pattern.clone(),
                            param: param.clone(),
                        })?;

                    url.extend(utf8_percent_encode(value, UNRESERVED));
                    used.push(param.as_str());
                }
            }
        }

        let query: Vec<String> = params
            .iter()
            .filter(|(key, _)| !used.contains(key))
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, UNRESERVED),
                    utf8_percent_encode(value, UNRESERVED)
                )
            })
            .collect();

        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }

        Ok(Some(url))
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    let invalid = |reason| RouteError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason,
    };

    let rest = pattern.strip_prefix('/').ok_or_else(|| invalid("must start with '/'"))?;
    let mut segments = Vec::new();

    for part in rest.split('/') {
        let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) => {
                let valid = !name.is_empty()
                    && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
                if !valid {
                    return Err(invalid("placeholder names are non-empty [A-Za-z0-9_]"));
                }
                if segments.contains(&Segment::Param(name.to_owned())) {
                    return Err(invalid("placeholder used twice"));
                }
                Segment::Param(name.to_owned())
            }
            None if part.contains(['{', '}']) => {
                return Err(invalid("a placeholder must span a whole segment"))
            }
            None => Segment::Literal(part.to_owned()),
        };

        segments.push(segment);
    }

    Ok(segments)
}

/// Splits a raw path after its leading `/` and percent-decodes each segment.
fn split_path(path: &str) -> Vec<String> {
    let path = path.strip_prefix('/').unwrap_or(path);

    path.split('/')
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::handler;

    fn router() -> Router {
        let mut router = Router::new();
        router
            .get("/", handler::sync(|_| Ok("root")))
            .unwrap()
            .get("/users", handler::sync(|_| Ok("list")))
            .unwrap()
            .post("/users", handler::sync(|_| Ok("create")))
            .unwrap()
            .named_route(Method::Get, "/users/{id}", "user", handler::sync(|_| Ok("one")))
            .unwrap()
            .named_route(
                Method::Get,
                "/users/{id}/posts/{post}",
                "post",
                handler::sync(|_| Ok("post")),
            )
            .unwrap()
            .get("/users/me", handler::sync(|_| Ok("shadowed")))
            .unwrap();
        router
    }

    async fn call(router: &Router, method: Method, target: &str) -> Result<(String, MultiDict), ResolveError> {
        let mut req = Request::new(method, target);
        let Resolved { handler, params } = router.resolve(&req)?;
        let value = handler.call(&mut req).await.unwrap();

        Ok((value.as_str().unwrap().to_owned(), params))
    }

    #[tokio::test]
    async fn resolution() {
        let router = router();

        #[rustfmt::skip]
        let cases = [
            (Method::Get,  "/",                    Ok("root")),
            (Method::Get,  "/users",               Ok("list")),
            (Method::Head, "/users",               Ok("list")),
            (Method::Post, "/users",               Ok("create")),
            (Method::Get,  "/users/7",             Ok("one")),
            (Method::Get,  "/users/me",            Ok("one")),
            (Method::Get,  "/users/7/posts/9",     Ok("post")),
            (Method::Get,  "/users/",              Err(ResolveError::NotFound)),
            (Method::Get,  "/nope",                Err(ResolveError::NotFound)),
            (Method::Get,  "/users/7/posts",       Err(ResolveError::NotFound)),
            (
                Method::Delete, "/users",
                Err(ResolveError::MethodNotAllowed { allowed: vec![Method::Get, Method::Post] }),
            ),
        ];

        for (method, target, expected) in cases {
            let got = call(&router, method, target).await.map(|(value, _)| value);
            assert_eq!(got, expected.map(str::to_owned), "{method} {target}");
        }
    }

    #[tokio::test]
    async fn captured_params_are_decoded() {
        let router = router();
        let (_, params) = call(&router, Method::Get, "/users/j%C3%BCrgen%2Fx/posts/1?x=1").await.unwrap();

        assert_eq!(params.get("id"), Some("jürgen/x"));
        assert_eq!(params.get("post"), Some("1"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn registration_errors() {
        let mut router = router();

        #[rustfmt::skip]
        let cases = [
            (Method::Get,  "/users/{user_id}", None,         RouteError::Duplicate { method: Method::Get, pattern: "/users/{user_id}".into() }),
            (Method::Post, "/other",           Some("user"), RouteError::DuplicateName("user".into())),
            (Method::Get,  "users",            None,         RouteError::InvalidPattern { pattern: "users".into(), reason: "must start with '/'" }),
            (Method::Get,  "/a/{}",            None,         RouteError::InvalidPattern { pattern: "/a/{}".into(), reason: "placeholder names are non-empty [A-Za-z0-9_]" }),
            (Method::Get,  "/a/{x}/{x}",       None,         RouteError::InvalidPattern { pattern: "/a/{x}/{x}".into(), reason: "placeholder used twice" }),
            (Method::Get,  "/a/x{y}",          None,         RouteError::InvalidPattern { pattern: "/a/x{y}".into(), reason: "a placeholder must span a whole segment" }),
        ];

        for (method, pattern, name, expected) in cases {
            let handler: Arc<dyn Handler> = Arc::new(handler::sync(|_| Ok(())));
            assert_eq!(router.add_route(method, pattern, handler, name), Err(expected));
        }

        assert_eq!(router.len(), 6);
    }

    #[test]
    fn reverse_urls() {
        let router = router();

        #[rustfmt::skip]
        let cases: [(&str, &[(&str, &str)], Result<Option<&str>, UrlForError>); 5] = [
            ("user",    &[("id", "42")],                          Ok(Some("/users/42"))),
            ("user",    &[("id", "a b/c")],                       Ok(Some("/users/a%20b%2Fc"))),
            ("post",    &[("post", "9"), ("id", "1"), ("q", "x y")], Ok(Some("/users/1/posts/9?q=x%20y"))),
            ("missing", &[],                                      Ok(None)),
            ("post",    &[("id", "1")],                           Err(UrlForError::MissingParam { route: "/users/{id}/posts/{post}".into(), param: "post".into() })),
        ];

        for (name, params, expected) in cases {
            let got = router.url_for(name, params);
            assert_eq!(got, expected.map(|url| url.map(str::to_owned)), "{name}");
        }
    }

    #[test]
    fn reverse_lookup_is_optional() {
        struct Fixed;

        impl Resolver for Fixed {
            fn add_route(&mut self, _: Method, _: &str, _: Arc<dyn Handler>, _: Option<&str>) -> Result<(), RouteError> {
                Ok(())
            }

            fn resolve(&self, _: &Request) -> Result<Resolved, ResolveError> {
                Err(ResolveError::NotFound)
            }
        }

        assert_eq!(Fixed.url_for("any", &[]), Err(UrlForError::Unsupported));
    }

    #[test]
    fn resolve_errors_map_to_rest_errors() {
        let err = RestError::from(ResolveError::MethodNotAllowed {
            allowed: vec![Method::Get, Method::Put],
        });
        assert_eq!(err.status(), crate::StatusCode::MethodNotAllowed);
        assert_eq!(err.headers().get("allow"), Some("GET, PUT"));

        assert_eq!(RestError::from(ResolveError::NotFound).status(), crate::StatusCode::NotFound);
    }
}
