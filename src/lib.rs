//! maker_rest - JSON request-dispatch core for async HTTP/1.x REST services
//!
//! Parses HTTP/1.0 and HTTP/1.1 requests, resolves them to handlers through
//! a pluggable [`Resolver`], and writes the handler's value back as JSON.
//! Every failure on the way, malformed request or handler error, leaves as
//! a structured JSON error with a proper status code.
//!
//! # Features
//!
//! - **Uniform handlers** - sync and async handlers are driven the same way, see [`Handler`]
//! - **Typed errors** - [`RestError`] carries status, message, body and headers
//! - **Ordered multi-value maps** - for query strings, headers and route parameters, see [`MultiDict`]
//! - **Compression** - `deflate` or `gzip` chunked bodies, negotiated from `Accept-Encoding`
//! - **Capabilities** - pluggable sessions, identity and authorization, see [`Policies`]
//! - **Bounded resources** - worker pool, request limits and timeouts, see [`limits`]
//!
//! # Examples
//!
//! ```no_run
//! use maker_rest::{handler, HandlerError, RestError, Router, Server, StatusCode};
//! use serde::{Deserialize, Serialize};
//! use tokio::net::TcpListener;
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut router = Router::new();
//!     router
//!         .get("/users/{name}", handler::sync(|req| {
//!             let name = req.match_info().get_one("name")?;
//!             match name {
//!                 "root" => Err(RestError::new(StatusCode::Forbidden, "Reserved name").into()),
//!                 name => Ok(User { name: name.to_owned() }),
//!             }
//!         }))
//!         .unwrap()
//!         .post("/users", handler::sync(|req| {
//!             let user: User = req.json()?;
//!             req.response.set_status(StatusCode::Created);
//!             Ok::<_, HandlerError>(user)
//!         }))
//!         .unwrap();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .resolver(router)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! # Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber.
//! Each handled request produces one `info` event on the
//! `maker_rest::access` target; internal errors are logged at `error`
//! level with their hidden cause.

pub(crate) mod http {
    pub(crate) mod encoding;
    pub(crate) mod multidict;
    pub(crate) mod parser;
    pub(crate) mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod rest {
    pub(crate) mod cors;
    pub(crate) mod dispatcher;
    pub(crate) mod error;
    pub mod handler;
    pub(crate) mod policy;
    pub(crate) mod resolver;

    pub use self::{
        cors::CorsConfig,
        dispatcher::Dispatcher,
        error::{HandlerError, RestError, RestErrorKind},
        handler::Handler,
        policy::{
            Anonymous, AuthPolicy, IdentityPolicy, NoSessions, PermitAll, Policies, Session,
            SessionFactory,
        },
        resolver::{ResolveError, Resolved, Resolver, RouteError, Router, UrlForError},
    };
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use futures_util::future::BoxFuture;

pub use crate::{
    http::{
        encoding::ContentEncoding,
        multidict::{MultiDict, MultiDictError},
        request::{Request, ResponseState},
        types::{Method, StatusCode, Version},
    },
    rest::{
        handler, Anonymous, AuthPolicy, CorsConfig, Dispatcher, Handler, HandlerError,
        IdentityPolicy, NoSessions, PermitAll, Policies, ResolveError, Resolved, Resolver,
        RestError, RestErrorKind, RouteError, Router, Session, SessionFactory, UrlForError,
    },
    server::server_impl::{Server, ServerBuilder},
};
