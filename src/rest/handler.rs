//! The handler capability and its adapters.
//!
//! Every handler is driven the same way: [`Handler::call`] returns a boxed
//! future which the dispatcher awaits. Plain functions are lifted into
//! that shape by [`sync`], functions already returning a boxed future by
//! [`from_fn`].

use crate::{rest::HandlerError, BoxFuture, Request};
use serde::Serialize;
use serde_json::Value;
use std::future::ready;

/// Application code invoked for a resolved request.
///
/// # Examples
/// ```
/// use maker_rest::{BoxFuture, Handler, HandlerError, Request};
/// use serde_json::{json, Value};
///
/// struct Greeter {
///     greeting: String,
/// }
///
/// impl Handler for Greeter {
///     fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>> {
///         Box::pin(async move {
///             let name = req.match_info().get("name").unwrap_or("stranger");
///             Ok(json!({ "message": format!("{}, {name}!", self.greeting) }))
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>>;
}

/// Converts a handler result into JSON.
///
/// Values the serializer rejects (such as maps with non-string keys) are
/// unclassified failures and end up as `500`.
#[inline]
pub fn to_json<T: Serialize>(value: T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(HandlerError::other)
}

/// Handler built by [`sync`].
#[derive(Debug, Clone, Copy)]
pub struct SyncHandler<F>(F);

/// Wraps a function that completes without suspending.
///
/// # Examples
/// ```
/// use maker_rest::{handler, Router};
///
/// let mut router = Router::new();
/// router
///     .get("/users/{id}", handler::sync(|req| {
///         let id: u64 = req.match_info().get_one("id")?.parse().unwrap_or(0);
///         Ok(vec![id, id + 1])
///     }))
///     .unwrap();
/// ```
pub fn sync<F, T>(f: F) -> SyncHandler<F>
where
    F: Fn(&mut Request) -> Result<T, HandlerError> + Send + Sync + 'static,
    T: Serialize,
{
    SyncHandler(f)
}

impl<F, T> Handler for SyncHandler<F>
where
    F: Fn(&mut Request) -> Result<T, HandlerError> + Send + Sync + 'static,
    T: Serialize,
{
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>> {
        let result = (self.0)(request).and_then(to_json);
        Box::pin(ready(result))
    }
}

/// Handler built by [`from_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnHandler<F>(F);

/// Wraps a function returning a boxed future, typically an `fn` item:
///
/// ```
/// use maker_rest::{handler, BoxFuture, HandlerError, Request, Router};
/// use serde_json::Value;
///
/// fn whoami(req: &mut Request) -> BoxFuture<'_, Result<Value, HandlerError>> {
///     Box::pin(async move { handler::to_json(req.identity().await?) })
/// }
///
/// let mut router = Router::new();
/// router.get("/whoami", handler::from_fn(whoami)).unwrap();
/// ```
pub fn from_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    FnHandler(f)
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    #[inline]
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>> {
        (self.0)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn sync_results_become_json() {
        let handler = sync(|req| Ok(json!({ "path": req.path() })));
        let mut req = Request::new(Method::Get, "/x");

        assert_eq!(handler.call(&mut req).await.unwrap(), json!({"path": "/x"}));
    }

    #[tokio::test]
    async fn unserializable_result_is_other() {
        let handler = sync(|_| {
            let mut map = HashMap::new();
            map.insert((1, 2), "tuple keys");
            Ok(map)
        });
        let mut req = Request::new(Method::Get, "/");

        assert!(matches!(handler.call(&mut req).await, Err(HandlerError::Other(_))));
    }

    fn suspend(req: &mut Request) -> BoxFuture<'_, Result<Value, HandlerError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            req.response.add_header("x-suspended", "yes");
            to_json(req.method().as_str())
        })
    }

    #[tokio::test]
    async fn async_functions() {
        let handler = from_fn(suspend);
        let mut req = Request::new(Method::Delete, "/");

        assert_eq!(handler.call(&mut req).await.unwrap(), json!("DELETE"));
        assert_eq!(req.response.headers().get("x-suspended"), Some("yes"));
    }
}
