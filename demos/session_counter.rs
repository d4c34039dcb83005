use maker_rest::{
    handler, AuthPolicy, BoxFuture, HandlerError, IdentityPolicy, Request, Router, Server,
    Session, SessionFactory,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

type Store = Arc<Mutex<HashMap<String, Map<String, Value>>>>;

/// Keeps sessions in memory, keyed by the `sid` cookie.
#[derive(Default)]
struct MemorySessions {
    store: Store,
    next_id: AtomicU64,
}

impl SessionFactory for MemorySessions {
    fn open<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<Session, HandlerError>> {
        Box::pin(async move {
            let sid = req.cookies().get("sid").map(str::to_owned);
            let stored = match &sid {
                Some(sid) => self.lock()?.get(sid).cloned(),
                None => None,
            };

            let session = match (sid, stored) {
                (Some(sid), Some(data)) => Session::load(sid, data),
                _ => {
                    let sid = format!("{:016x}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                    req.response.set_cookie("sid", &sid);
                    Session::new().with_id(sid)
                }
            };

            // Persist once the handler has succeeded.
            let store = Arc::clone(&self.store);
            let saved = session.clone();
            req.response.on_complete(move || {
                if !saved.is_changed() {
                    return;
                }
                if let (Some(sid), Ok(mut store)) = (saved.id(), store.lock()) {
                    store.insert(sid.to_owned(), saved.snapshot());
                }
            });

            Ok(session)
        })
    }
}

impl MemorySessions {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Map<String, Value>>>, HandlerError> {
        self.store.lock().map_err(|_| HandlerError::other("session store poisoned"))
    }
}

/// Identity carried in a plain `user` cookie and mirrored into the session.
///
/// The cookie is not signed: fine for a demo, not for production.
struct SessionIdentity;

impl IdentityPolicy for SessionIdentity {
    fn identify<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, Result<Option<String>, HandlerError>> {
        Box::pin(async move { Ok(req.cookies().get("user").map(str::to_owned)) })
    }

    fn remember<'a>(&'a self, req: &'a mut Request, identity: &'a str) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            req.session().await?.insert("user", identity)?;
            req.response.set_cookie("user", identity);
            Ok(())
        })
    }

    fn forget<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            req.session().await?.remove("user");
            req.response.del_cookie("user");
            Ok(())
        })
    }
}

/// `admin` may do anything, everyone else may only `read`.
struct AdminPolicy;

impl AuthPolicy for AdminPolicy {
    fn permits<'a>(
        &'a self,
        identity: Option<&'a str>,
        permission: &'a str,
        _: &'a Request,
    ) -> BoxFuture<'a, Result<bool, HandlerError>> {
        Box::pin(async move { Ok(permission == "read" || identity == Some("admin")) })
    }
}

fn counter(req: &mut Request) -> BoxFuture<'_, Result<Value, HandlerError>> {
    Box::pin(async move {
        let session = req.session().await?;
        let visits = session.get::<u64>("visits").unwrap_or(0) + 1;
        session.insert("visits", visits)?;

        let user = req.identity().await?;
        tracing::debug!(visits, ?user, "counter bumped");

        Ok(json!({ "visits": visits, "user": user }))
    })
}

fn login(req: &mut Request) -> BoxFuture<'_, Result<Value, HandlerError>> {
    #[derive(Deserialize)]
    struct Login {
        user: String,
    }

    Box::pin(async move {
        let Login { user } = req.json()?;
        req.remember(&user).await?;

        Ok(json!({ "user": user }))
    })
}

fn logout(req: &mut Request) -> BoxFuture<'_, Result<Value, HandlerError>> {
    Box::pin(async move {
        req.forget().await?;
        Ok(Value::Null)
    })
}

fn reset(req: &mut Request) -> BoxFuture<'_, Result<Value, HandlerError>> {
    Box::pin(async move {
        req.require("reset").await?;
        req.session().await?.remove("visits");

        Ok(json!({ "visits": 0 }))
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maker_rest=info")),
        )
        .init();

    let mut router = Router::new();
    router
        .get("/counter", handler::from_fn(counter))
        .unwrap()
        .post("/counter/reset", handler::from_fn(reset))
        .unwrap()
        .post("/login", handler::from_fn(login))
        .unwrap()
        .post("/logout", handler::from_fn(logout))
        .unwrap();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .resolver(router)
        .session_factory(MemorySessions::default())
        .identity_policy(SessionIdentity)
        .auth_policy(AdminPolicy)
        .build()
        .launch()
        .await;
}
