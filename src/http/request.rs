use crate::{
    http::{
        multidict::MultiDict,
        parser::RequestHead,
        query::{parse_cookies, parse_query},
        types::{Method, StatusCode, Version},
    },
    rest::{HandlerError, Policies, RestError, Session},
    BoxFuture,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{fmt, future::Future, mem, sync::Arc};

/// One inbound HTTP message, plus the response state a handler fills in.
///
/// Created by the connection for every request and dropped once the
/// response has been written. Handlers receive it mutably: reading the
/// message is free, and [`response`](Request::response) collects the
/// status, headers and completion callbacks for the reply.
///
/// # Examples
/// ```
/// use maker_rest::{Method, Request, StatusCode};
///
/// let mut req = Request::new(Method::Post, "/users?notify=yes")
///     .with_header("content-type", "application/json")
///     .with_body(r#"{"name": "Ann"}"#);
///
/// assert_eq!(req.path(), "/users");
/// assert_eq!(req.query().get("notify"), Some("yes"));
/// assert_eq!(req.json_body().unwrap()["name"], "Ann");
///
/// req.response.set_status(StatusCode::Created);
/// ```
pub struct Request {
    host: String,
    method: Method,
    version: Version,
    target: String,
    path: String,
    query: MultiDict,
    headers: MultiDict,
    body: Option<Vec<u8>>,
    pub(crate) keep_alive: bool,

    match_info: MultiDict,
    policies: Policies,
    session: Option<Session>,
    identity: Option<Option<String>>,

    /// Status, headers and callbacks for the response to this request.
    pub response: ResponseState,
}

impl Request {
    /// Builds a request by hand, mainly for exercising handlers in tests.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, MultiDict::new()),
        };

        Self {
            host: String::from("localhost"),
            method,
            version: Version::Http11,
            target: target.to_owned(),
            path: path.to_owned(),
            query,
            headers: MultiDict::headers(),
            body: None,
            keep_alive: true,

            match_info: MultiDict::new(),
            policies: Policies::default(),
            session: None,
            identity: None,

            response: ResponseState::new(),
        }
    }

    pub(crate) fn from_head(
        host: &str,
        head: RequestHead,
        body: Option<Vec<u8>>,
        policies: Policies,
    ) -> Self {
        Self {
            host: host.to_owned(),
            method: head.method,
            version: head.version,
            target: head.target,
            path: head.path,
            query: head.query,
            headers: head.headers,
            body,
            keep_alive: head.keep_alive,

            match_info: MultiDict::new(),
            policies,
            session: None,
            identity: None,

            response: ResponseState::new(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }
}

/// Message accessors
impl Request {
    /// Host name the server answers as.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Raw request target, query string included.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Path part of the target, still percent-encoded.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters.
    #[inline]
    pub fn query(&self) -> &MultiDict {
        &self.query
    }

    /// Request headers; names compare case-insensitively.
    #[inline]
    pub fn headers(&self) -> &MultiDict {
        &self.headers
    }

    /// First value of header `name`.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Cookies from every `Cookie` header.
    pub fn cookies(&self) -> MultiDict {
        let mut cookies = MultiDict::new();
        for header in self.headers.get_all("cookie") {
            cookies.extend(parse_cookies(header).iter());
        }
        cookies
    }

    /// Parameters captured by the route that matched this request.
    #[inline]
    pub fn match_info(&self) -> &MultiDict {
        &self.match_info
    }

    #[inline]
    pub(crate) fn set_match_info(&mut self, params: MultiDict) {
        self.match_info = params;
    }

    /// Raw body, or `None` when the message had none.
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Body as UTF-8 text; a missing body reads as `""`.
    ///
    /// # Errors
    /// [`HandlerError::Decode`] describing the first invalid byte.
    pub fn text(&self) -> Result<&str, HandlerError> {
        simdutf8::compat::from_utf8(self.body().unwrap_or_default())
            .map_err(|e| HandlerError::Decode(e.to_string()))
    }

    /// Body deserialized from JSON.
    ///
    /// # Errors
    /// [`HandlerError::Decode`] for invalid UTF-8 and [`HandlerError::Load`]
    /// for malformed or mismatching JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_str(self.text()?).map_err(|e| HandlerError::Load(e.to_string()))
    }

    /// Body as an untyped JSON value.
    #[inline]
    pub fn json_body(&self) -> Result<Value, HandlerError> {
        self.json()
    }
}

/// Injected capabilities
impl Request {
    /// The session for this request, opened on first use.
    pub async fn session(&mut self) -> Result<Session, HandlerError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        let factory = Arc::clone(&self.policies.session_factory);
        let session = factory.open(self).await?;
        self.session = Some(session.clone());

        Ok(session)
    }

    /// Identity of the client, looked up once and then cached.
    pub async fn identity(&mut self) -> Result<Option<String>, HandlerError> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }

        let policy = Arc::clone(&self.policies.identity_policy);
        let identity = policy.identify(self).await?;
        self.identity = Some(identity.clone());

        Ok(identity)
    }

    pub async fn remember(&mut self, identity: &str) -> Result<(), HandlerError> {
        let policy = Arc::clone(&self.policies.identity_policy);
        policy.remember(self, identity).await?;
        self.identity = Some(Some(identity.to_owned()));

        Ok(())
    }

    pub async fn forget(&mut self) -> Result<(), HandlerError> {
        let policy = Arc::clone(&self.policies.identity_policy);
        policy.forget(self).await?;
        self.identity = Some(None);

        Ok(())
    }

    /// Asks the auth policy whether the current identity holds `permission`.
    pub async fn permits(&mut self, permission: &str) -> Result<bool, HandlerError> {
        let identity = self.identity().await?;
        let policy = Arc::clone(&self.policies.auth_policy);

        policy.permits(identity.as_deref(), permission, self).await
    }

    /// Like [`permits`](Request::permits), failing with `403 Forbidden` on refusal.
    pub async fn require(&mut self, permission: &str) -> Result<(), HandlerError> {
        match self.permits(permission).await? {
            true => Ok(()),
            false => Err(RestError::forbidden().into()),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("match_info", &self.match_info)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

type SyncCallback = Box<dyn FnOnce() + Send + Sync>;
type AsyncCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;

enum Callback {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

/// Mutable response state attached to a [`Request`].
///
/// The status defaults to `200 OK`. Headers added here are written after
/// the server's own (`host`, `content-type`), repeated names included.
pub struct ResponseState {
    status: StatusCode,
    headers: MultiDict,
    callbacks: Vec<Callback>,
}

impl ResponseState {
    pub(crate) fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: MultiDict::headers(),
            callbacks: Vec::new(),
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn headers(&self) -> &MultiDict {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut MultiDict {
        &mut self.headers
    }

    /// Adds a header line, keeping earlier ones with the same name.
    pub fn add_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers.add(name, value);
        self
    }

    /// Replaces every header line named `name` with a single one.
    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Adds `set-cookie: name=value; Path=/`.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> &mut Self {
        self.add_header("set-cookie", format!("{name}={value}; Path=/"))
    }

    /// Tells the client to drop cookie `name`.
    pub fn del_cookie(&mut self, name: &str) -> &mut Self {
        self.add_header(
            "set-cookie",
            format!("{name}=; Max-Age=0; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT"),
        )
    }

    /// Registers `callback` to run after the handler succeeds and before
    /// the response is written.
    pub fn on_complete<F: FnOnce() + Send + Sync + 'static>(&mut self, callback: F) -> &mut Self {
        self.callbacks.push(Callback::Sync(Box::new(callback)));
        self
    }

    /// Async variant of [`on_complete`](ResponseState::on_complete); the
    /// returned future is awaited in turn with the other callbacks.
    pub fn on_complete_async<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.push(Callback::Async(Box::new(move || {
            Box::pin(callback()) as BoxFuture<'static, ()>
        })));
        self
    }

    /// Number of callbacks waiting to run.
    #[inline]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// Runs and drops every registered callback in registration order.
    pub(crate) async fn run_callbacks(&mut self) {
        for callback in mem::take(&mut self.callbacks) {
            match callback {
                Callback::Sync(callback) => callback(),
                Callback::Async(callback) => callback().await,
            }
        }
    }
}

impl fmt::Debug for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseState")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::{AuthPolicy, IdentityPolicy, SessionFactory};
    use serde::Deserialize;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[test]
    fn accessors() {
        let req = Request::new(Method::Get, "/search?q=rust+lang&page=2")
            .with_host("api.local")
            .with_header("Cookie", "theme=dark; session=s1")
            .with_header("cookie", "lang=en");

        assert_eq!(req.host(), "api.local");
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.target(), "/search?q=rust+lang&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query().get("q"), Some("rust lang"));
        assert_eq!(req.header("COOKIE"), Some("theme=dark; session=s1"));
        assert_eq!(req.body(), None);

        let cookies = req.cookies();
        assert_eq!(cookies.keys(), ["theme", "session", "lang"]);
        assert_eq!(cookies.get("session"), Some("s1"));
    }

    #[test]
    fn body_helpers() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            name: String,
        }

        let req = Request::new(Method::Post, "/").with_body(r#"{"name":"Ann"}"#);
        assert_eq!(req.text().unwrap(), r#"{"name":"Ann"}"#);
        assert_eq!(req.json::<User>().unwrap(), User { name: "Ann".into() });

        let req = Request::new(Method::Post, "/").with_body(&b"{\"name\":\"\xff\"}"[..]);
        assert!(matches!(req.text(), Err(HandlerError::Decode(_))));
        assert!(matches!(req.json_body(), Err(HandlerError::Decode(_))));

        let req = Request::new(Method::Post, "/").with_body("{not json");
        assert!(matches!(req.json_body(), Err(HandlerError::Load(_))));

        let req = Request::new(Method::Post, "/").with_body(r#"{"age":3}"#);
        assert!(matches!(req.json::<User>(), Err(HandlerError::Load(_))));

        let req = Request::new(Method::Get, "/");
        assert_eq!(req.text().unwrap(), "");
    }

    #[tokio::test]
    async fn callbacks_run_once_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = ResponseState::new();

        for i in 1..=3 {
            let log = Arc::clone(&log);
            if i == 2 {
                state.on_complete_async(move || async move {
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(i);
                });
            } else {
                state.on_complete(move || log.lock().unwrap().push(i));
            }
        }

        assert_eq!(state.pending_callbacks(), 3);
        state.run_callbacks().await;
        state.run_callbacks().await;

        assert_eq!(*log.lock().unwrap(), [1, 2, 3]);
        assert_eq!(state.pending_callbacks(), 0);
    }

    #[test]
    fn response_headers() {
        let mut state = ResponseState::new();
        state
            .set_status(StatusCode::Created)
            .add_header("x-a", "1")
            .add_header("X-A", "2")
            .set_cookie("sid", "abc")
            .del_cookie("old");

        assert_eq!(state.status(), StatusCode::Created);
        assert_eq!(state.headers().get_all("x-a").collect::<Vec<_>>(), ["1", "2"]);

        state.set_header("x-a", "3");
        assert_eq!(state.headers().get_one("x-a"), Ok("3"));
        assert_eq!(
            state.headers().get_all("set-cookie").collect::<Vec<_>>(),
            [
                "sid=abc; Path=/",
                "old=; Max-Age=0; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
            ]
        );
    }

    struct CountingSessions(AtomicUsize);

    impl SessionFactory for CountingSessions {
        fn open<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<Session, HandlerError>> {
            Box::pin(async move {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                req.response.on_complete(|| ());
                Ok(Session::new().with_id(format!("s{n}")))
            })
        }
    }

    struct HeaderIdentity;

    impl IdentityPolicy for HeaderIdentity {
        fn identify<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, Result<Option<String>, HandlerError>> {
            Box::pin(async move { Ok(req.header("x-user").map(str::to_owned)) })
        }

        fn remember<'a>(&'a self, req: &'a mut Request, id: &'a str) -> BoxFuture<'a, Result<(), HandlerError>> {
            Box::pin(async move {
                req.response.set_header("x-remembered", id);
                Ok(())
            })
        }

        fn forget<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<(), HandlerError>> {
            Box::pin(async move {
                req.response.set_header("x-forgotten", "1");
                Ok(())
            })
        }
    }

    struct AdminOnly;

    impl AuthPolicy for AdminOnly {
        fn permits<'a>(
            &'a self,
            identity: Option<&'a str>,
            permission: &'a str,
            _: &'a Request,
        ) -> BoxFuture<'a, Result<bool, HandlerError>> {
            Box::pin(async move { Ok(permission == "read" || identity == Some("admin")) })
        }
    }

    fn policies() -> Policies {
        Policies {
            session_factory: Arc::new(CountingSessions(AtomicUsize::new(0))),
            identity_policy: Arc::new(HeaderIdentity),
            auth_policy: Arc::new(AdminOnly),
        }
    }

    #[tokio::test]
    async fn session_opened_once() {
        let mut req = Request::new(Method::Get, "/").with_policies(policies());

        let first = req.session().await.unwrap();
        first.insert("k", 1).unwrap();
        let second = req.session().await.unwrap();

        assert_eq!(first.id(), Some("s0"));
        assert_eq!(second.id(), Some("s0"));
        assert_eq!(second.get::<i32>("k"), Some(1));
        assert_eq!(req.response.pending_callbacks(), 1);
    }

    #[tokio::test]
    async fn default_policies() {
        let mut req = Request::new(Method::Get, "/");

        assert!(req.session().await.unwrap().is_new());
        assert_eq!(req.identity().await.unwrap(), None);
        assert!(req.permits("anything").await.unwrap());
        req.remember("someone").await.unwrap();
        assert_eq!(req.identity().await.unwrap().as_deref(), Some("someone"));
    }

    #[tokio::test]
    async fn identity_and_auth() {
        let mut req = Request::new(Method::Get, "/")
            .with_header("x-user", "guest")
            .with_policies(policies());

        assert_eq!(req.identity().await.unwrap().as_deref(), Some("guest"));
        assert!(req.permits("read").await.unwrap());
        assert!(req.require("read").await.is_ok());

        match req.require("write").await {
            Err(HandlerError::Rest(err)) => assert_eq!(err.status(), StatusCode::Forbidden),
            other => panic!("unexpected {other:?}"),
        }

        req.remember("admin").await.unwrap();
        assert_eq!(req.response.headers().get("x-remembered"), Some("admin"));
        assert!(req.permits("write").await.unwrap());

        req.forget().await.unwrap();
        assert_eq!(req.identity().await.unwrap(), None);
        assert!(!req.permits("write").await.unwrap());
    }
}
