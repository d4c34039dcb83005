use maker_rest::{
    handler, BoxFuture, Handler, HandlerError, Method, Request, Resolver, RestError, Router,
    Server, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize)]
struct User {
    id: u64,
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

#[derive(Default)]
struct Users {
    next_id: u64,
    by_id: BTreeMap<u64, User>,
}

type Store = Arc<Mutex<Users>>;

fn user_id(req: &Request) -> Result<u64, HandlerError> {
    req.match_info()
        .get_one("id")?
        .parse()
        .map_err(|_| RestError::bad_request("id must be a number").into())
}

fn not_found(id: u64) -> HandlerError {
    RestError::new(StatusCode::NotFound, "User not found")
        .with_body(json!({ "id": id }))
        .into()
}

/// `POST /users`, answering `201` with a `location` header.
struct CreateUser(Store);

impl Handler for CreateUser {
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<Value, HandlerError>> {
        Box::pin(async move {
            let new: NewUser = req.json()?;
            if !new.email.contains('@') {
                return Err(RestError::new(StatusCode::BadRequest, "Invalid email")
                    .with_body(json!({ "field": "email" }))
                    .into());
            }

            let user = {
                let mut users = self.0.lock().map_err(|_| HandlerError::other("store poisoned"))?;
                if users.by_id.values().any(|u| u.email == new.email) {
                    return Err(RestError::new(StatusCode::Conflict, "User already exists").into());
                }

                users.next_id += 1;
                let user = User {
                    id: users.next_id,
                    name: new.name,
                    email: new.email,
                };
                users.by_id.insert(user.id, user.clone());
                user
            };

            req.response
                .set_status(StatusCode::Created)
                .set_header("location", format!("/users/{}", user.id));
            handler::to_json(user)
        })
    }
}

fn routes(store: &Store) -> Router {
    let mut router = Router::new();

    let users = Arc::clone(store);
    router
        .get("/users", handler::sync(move |_| {
            let users = users.lock().map_err(|_| HandlerError::other("store poisoned"))?;
            let list: Vec<User> = users.by_id.values().cloned().collect();
            Ok(list)
        }))
        .unwrap();

    router.post("/users", CreateUser(Arc::clone(store))).unwrap();

    let users = Arc::clone(store);
    router
        .named_route(Method::Get, "/users/{id}", "user", handler::sync(move |req| {
            let id = user_id(req)?;
            let users = users.lock().map_err(|_| HandlerError::other("store poisoned"))?;
            let user = users.by_id.get(&id).cloned();
            user.ok_or_else(|| not_found(id))
        }))
        .unwrap();

    let users = Arc::clone(store);
    router
        .delete("/users/{id}", handler::sync(move |req| {
            let id = user_id(req)?;
            let mut users = users.lock().map_err(|_| HandlerError::other("store poisoned"))?;
            users.by_id.remove(&id).ok_or_else(|| not_found(id))?;

            req.response.set_status(StatusCode::NoContent);
            Ok(())
        }))
        .unwrap();

    router
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maker_rest=info")),
        )
        .init();

    let store = Store::default();
    let router = routes(&store);
    tracing::info!(
        example = ?router.url_for("user", &[("id", "1")]),
        "user URLs look like"
    );

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .resolver(router)
        .hostname("localhost:8080")
        .build()
        .launch()
        .await;
}
