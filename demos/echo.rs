use maker_rest::{handler, HandlerError, Method, Request, Router, Server};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn echo(req: &mut Request) -> Result<Value, HandlerError> {
    let body = match req.body() {
        Some(body) if !body.is_empty() => Some(req.json_body()?),
        _ => None,
    };

    Ok(json!({
        "method": req.method().as_str(),
        "path": req.path(),
        "query": req.query().to_lists(),
        "headers": req.headers().to_lists(),
        "cookies": req.cookies().to_lists(),
        "params": req.match_info().to_lists(),
        "body": body,
    }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maker_rest=info")),
        )
        .init();

    let mut router = Router::new();
    for method in [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete] {
        router.route(method, "/echo", handler::sync(echo)).unwrap();
        router.route(method, "/echo/{tail}", handler::sync(echo)).unwrap();
    }

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .resolver(router)
        .build()
        .launch()
        .await;
}
