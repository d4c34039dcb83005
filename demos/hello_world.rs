use maker_rest::{handler, Router, Server};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maker_rest=info")),
        )
        .init();

    let mut router = Router::new();
    router
        .get("/", handler::sync(|_| Ok(json!({ "message": "Hello, world!" }))))
        .unwrap();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .resolver(router)
        .build()
        .launch()
        .await;
}
