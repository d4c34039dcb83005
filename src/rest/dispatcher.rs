use crate::{
    rest::{CorsConfig, HandlerError, Resolver, RestError},
    Request,
};
use futures_util::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe};

/// Resolves a request to a handler, invokes it and classifies the outcome.
///
/// Success is the handler's value serialized to JSON bytes. Every failure
/// leaves as a [`RestError`]:
///
/// | Handler outcome | Result |
/// |-----------------|--------|
/// | [`HandlerError::Decode`], [`HandlerError::Load`] | `400` with the failure text as reason |
/// | [`HandlerError::Rest`] | passed through unchanged |
/// | [`HandlerError::Other`] | `500 Internal Server Error`, cause logged only |
///
/// # Examples
/// ```
/// use maker_rest::{handler, Dispatcher, Method, Request, Router, StatusCode};
///
/// # tokio_test();
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn tokio_test() {
/// let mut router = Router::new();
/// router.get("/ping", handler::sync(|_| Ok("pong"))).unwrap();
/// let dispatcher = Dispatcher::new(router);
///
/// let mut req = Request::new(Method::Get, "/ping");
/// assert_eq!(dispatcher.dispatch(&mut req).await.unwrap(), br#""pong""#);
///
/// let mut req = Request::new(Method::Get, "/missing");
/// let err = dispatcher.dispatch(&mut req).await.unwrap_err();
/// assert_eq!(err.status(), StatusCode::NotFound);
/// # }
/// ```
pub struct Dispatcher<R: Resolver> {
    resolver: R,
    cors: Option<CorsConfig>,
}

impl<R: Resolver> Dispatcher<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            cors: None,
        }
    }

    /// Enables CORS: preflights are answered without reaching a handler and
    /// cross-origin answers get `Access-Control-*` headers.
    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    #[inline]
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    #[inline]
    pub fn cors(&self) -> Option<&CorsConfig> {
        self.cors.as_ref()
    }

    /// Runs the handler for `request` and returns the JSON response body.
    ///
    /// Response status, headers and completion callbacks stay on
    /// `request.response`; running the callbacks is left to the caller.
    pub async fn dispatch(&self, request: &mut Request) -> Result<Vec<u8>, RestError> {
        if let Some(headers) = self.cors.as_ref().and_then(|cors| cors.preflight(request)) {
            return Err(RestError::preflight(headers));
        }

        let result = self.invoke(request).await;

        let Some(cors) = &self.cors else {
            return result;
        };
        let headers = cors.response_headers(request);
        match result {
            Ok(body) => {
                request.response.headers_mut().extend(headers.iter());
                Ok(body)
            }
            Err(err) => Err(err.with_headers(headers)),
        }
    }

    async fn invoke(&self, request: &mut Request) -> Result<Vec<u8>, RestError> {
        let resolved = self.resolver.resolve(request)?;
        request.set_match_info(resolved.params);

        let handler = resolved.handler;
        let outcome = AssertUnwindSafe(async { handler.call(request).await })
            .catch_unwind()
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                let cause = panic_message(&*panic);
                tracing::error!(
                    method = %request.method(),
                    path = request.path(),
                    error = cause,
                    "handler panicked"
                );
                return Err(RestError::internal(format!("handler panicked: {cause}")));
            }
        };

        let value = match outcome {
            Ok(value) => value,
            Err(HandlerError::Decode(reason) | HandlerError::Load(reason)) => {
                return Err(RestError::bad_request(reason))
            }
            Err(HandlerError::Rest(err)) => {
                if err.status().is_server_error() {
                    tracing::error!(
                        method = %request.method(),
                        path = request.path(),
                        error = %err,
                        "handler failed"
                    );
                }
                return Err(err);
            }
            Err(HandlerError::Other(cause)) => {
                tracing::error!(
                    method = %request.method(),
                    path = request.path(),
                    error = %cause,
                    "unhandled handler error"
                );
                return Err(RestError::internal(cause));
            }
        };

        serde_json::to_vec(&value).map_err(RestError::internal)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    match panic.downcast_ref::<&'static str>() {
        Some(message) => message,
        None => panic
            .downcast_ref::<String>()
            .map(String::as_str)
            .unwrap_or("non-string panic payload"),
    }
}
