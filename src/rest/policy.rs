//! Session, identity and authorization capabilities injected into requests.
//!
//! The dispatch core never interprets these; handlers reach them through
//! [`Request::session`], [`Request::identity`] and [`Request::permits`].
//! Every capability has a no-op default, collected in [`Policies::default`].

use crate::{rest::HandlerError, BoxFuture, Request};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-request key/value state backed by a [`SessionFactory`].
///
/// Clones share the same data, so a factory can keep a clone and persist
/// it from a completion callback.
#[derive(Debug, Clone)]
pub struct Session {
    id: Option<String>,
    is_new: bool,
    state: Arc<Mutex<SessionState>>,
}

#[derive(Debug, Default)]
struct SessionState {
    data: Map<String, Value>,
    changed: bool,
}

impl Session {
    /// An empty session that has never been stored.
    pub fn new() -> Self {
        Self {
            id: None,
            is_new: true,
            state: Default::default(),
        }
    }

    /// A session loaded from a store under `id`.
    pub fn load<I: Into<String>>(id: I, data: Map<String, Value>) -> Self {
        Self {
            id: Some(id.into()),
            is_new: false,
            state: Arc::new(Mutex::new(SessionState {
                data,
                changed: false,
            })),
        }
    }

    /// Assigns the identifier under which a new session gets stored.
    pub fn with_id<I: Into<String>>(mut self, id: I) -> Self {
        self.id = Some(id.into());
        self
    }

    #[inline]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// `true` once any value was inserted, removed or cleared.
    pub fn is_changed(&self) -> bool {
        self.lock().changed
    }

    /// Reads `key`, or `None` when it is missing or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().data.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), HandlerError> {
        let value = serde_json::to_value(value).map_err(HandlerError::other)?;

        let mut state = self.lock();
        state.data.insert(key.to_owned(), value);
        state.changed = true;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let removed = state.data.remove(key);
        state.changed |= removed.is_some();
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        let had_data = !state.data.is_empty();
        state.data.clear();
        state.changed |= had_data;
    }

    /// Copy of the current data, e.g. for writing it back to a store.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().data.clone()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens the session for a request, at most once per request.
///
/// Receives the request mutably so it can read cookies and register a
/// completion callback that persists the session.
pub trait SessionFactory: Send + Sync + 'static {
    fn open<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Session, HandlerError>>;
}

/// Establishes who sent a request.
pub trait IdentityPolicy: Send + Sync + 'static {
    /// Returns the identity carried by the request, if any.
    fn identify<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Option<String>, HandlerError>>;

    /// Makes later requests carry `identity`, typically through a response header.
    fn remember<'a>(
        &'a self,
        request: &'a mut Request,
        identity: &'a str,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;

    /// Drops the identity from later requests.
    fn forget<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Decides whether an identity holds a permission.
pub trait AuthPolicy: Send + Sync + 'static {
    fn permits<'a>(
        &'a self,
        identity: Option<&'a str>,
        permission: &'a str,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<bool, HandlerError>>;
}

/// Hands every request a fresh, unstored [`Session`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSessions;

impl SessionFactory for NoSessions {
    fn open<'a>(&'a self, _: &'a mut Request) -> BoxFuture<'a, Result<Session, HandlerError>> {
        Box::pin(async { Ok(Session::new()) })
    }
}

/// Treats every request as anonymous; `remember` and `forget` do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl IdentityPolicy for Anonymous {
    fn identify<'a>(&'a self, _: &'a Request) -> BoxFuture<'a, Result<Option<String>, HandlerError>> {
        Box::pin(async { Ok(None) })
    }

    fn remember<'a>(&'a self, _: &'a mut Request, _: &'a str) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async { Ok(()) })
    }

    fn forget<'a>(&'a self, _: &'a mut Request) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Grants every permission.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

impl AuthPolicy for PermitAll {
    fn permits<'a>(
        &'a self,
        _: Option<&'a str>,
        _: &'a str,
        _: &'a Request,
    ) -> BoxFuture<'a, Result<bool, HandlerError>> {
        Box::pin(async { Ok(true) })
    }
}

/// The capabilities handed to every request built by a server.
#[derive(Clone)]
pub struct Policies {
    pub session_factory: Arc<dyn SessionFactory>,
    pub identity_policy: Arc<dyn IdentityPolicy>,
    pub auth_policy: Arc<dyn AuthPolicy>,
}

impl Default for Policies {
    /// [`NoSessions`], [`Anonymous`] and [`PermitAll`].
    fn default() -> Self {
        Self {
            session_factory: Arc::new(NoSessions),
            identity_policy: Arc::new(Anonymous),
            auth_policy: Arc::new(PermitAll),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_data() {
        let session = Session::new();
        assert!(session.is_new());
        assert!(!session.is_changed());
        assert_eq!(session.get::<u32>("visits"), None);

        session.insert("visits", 3).unwrap();
        session.insert("name", "ann").unwrap();
        assert_eq!(session.get::<u32>("visits"), Some(3));
        assert_eq!(session.get::<u32>("name"), None);
        assert!(session.is_changed());

        let shared = session.clone();
        shared.remove("name");
        assert_eq!(session.snapshot(), json!({"visits": 3}).as_object().unwrap().clone());
    }

    #[test]
    fn loaded_session() {
        let mut data = Map::new();
        data.insert("user".into(), json!("bob"));

        let session = Session::load("s-1", data);
        assert_eq!(session.id(), Some("s-1"));
        assert!(!session.is_new());
        assert_eq!(session.get::<String>("user").as_deref(), Some("bob"));

        assert_eq!(session.remove("missing"), None);
        assert!(!session.is_changed());
        session.clear();
        assert!(session.is_changed());
    }
}
