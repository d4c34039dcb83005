use crate::{
    errors::ErrorKind,
    http::response::ResponseWriter,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    rest::{AuthPolicy, CorsConfig, Dispatcher, IdentityPolicy, Policies, Resolver, SessionFactory},
    server::connection::{write_bytes, HttpConnection, Service},
};
use crossbeam::queue::SegQueue;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};

/// A JSON REST server.
///
/// Accepted connections go to a bounded queue served by a fixed pool of
/// worker tasks; see [`ServerLimits`] for the admission rules.
///
/// # Examples
/// ```no_run
/// use maker_rest::{handler, Router, Server};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     let mut router = Router::new();
///     router
///         .get("/health", handler::sync(|_| Ok(serde_json::json!({ "status": "ok" }))))
///         .unwrap();
///
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .resolver(router)
///         .hostname("api.example.com")
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    #[inline]
    pub fn builder<R: Resolver>() -> ServerBuilder<R> {
        ServerBuilder {
            listener: None,
            resolver: None,
            hostname: None,
            policies: Policies::default(),
            cors: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
            response_limits: None,
        }
    }

    /// Accepts connections forever, queueing each one for a worker.
    ///
    /// When the queue already holds `max_pending_connections` streams the
    /// new one is handed to the `503` tasks instead.
    pub async fn launch(self) {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push((stream, addr)),
                false => self.error_queue.push((stream, addr)),
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

/// Builder for [`Server`].
///
/// Only [`listener`](Self::listener) and [`resolver`](Self::resolver) are
/// required; everything else has a default.
pub struct ServerBuilder<R: Resolver> {
    listener: Option<TcpListener>,
    resolver: Option<R>,
    hostname: Option<String>,
    policies: Policies,
    cors: Option<CorsConfig>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
}

impl<R: Resolver> ServerBuilder<R> {
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the routing for every request, usually a [`Router`](crate::Router).
    #[inline(always)]
    pub fn resolver(mut self, resolver: R) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Value of the `host` header on every response (default: the
    /// listener's local address).
    #[inline(always)]
    pub fn hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[inline(always)]
    pub fn session_factory<F: SessionFactory>(mut self, factory: F) -> Self {
        self.policies.session_factory = Arc::new(factory);
        self
    }

    #[inline(always)]
    pub fn identity_policy<P: IdentityPolicy>(mut self, policy: P) -> Self {
        self.policies.identity_policy = Arc::new(policy);
        self
    }

    #[inline(always)]
    pub fn auth_policy<P: AuthPolicy>(mut self, policy: P) -> Self {
        self.policies.auth_policy = Arc::new(policy);
        self
    }

    /// Replaces all three policies at once.
    #[inline(always)]
    pub fn policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    /// Enables CORS handling, see [`CorsConfig`].
    #[inline(always)]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Spawns the workers and returns the server, ready to
    /// [`launch`](Server::launch).
    ///
    /// # Panics
    /// - When `listener` or `resolver` was not set
    /// - When called outside a Tokio runtime
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, service, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &service);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits, &service.hostname);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        tracing::info!(
            hostname = %service.hostname,
            workers = limits.0.max_connections,
            "server ready"
        );

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
        }
    }

    fn spawn_worker(queue: &TcpQueue, limits: &AllLimits, service: &Arc<Service<R>>) {
        let queue = queue.clone();
        let wait = limits.0.wait_strategy.clone();
        let mut conn = HttpConnection::new(service.clone(), limits);

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) = Server::get_stream(&queue, &wait).await;

                if let Err(err) = conn.run(&mut stream).await {
                    tracing::debug!(%addr, error = %err, "connection abandoned");
                }
            }
        });
    }

    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits, hostname: &str) {
        let queue = queue.clone();
        let (server_limits, conn_limits, _, resp_limits) = limits.clone();

        let mut writer = ResponseWriter::new(&resp_limits);
        writer.keep_alive = false;
        ErrorKind::ServiceUnavailable
            .into_rest_error()
            .write_response(&mut writer, Some(hostname));
        let response = writer.buffer().to_vec();

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) = Server::get_stream(&queue, &server_limits.wait_strategy).await;
                tracing::warn!(%addr, "connection queue full, answering 503");

                let _ = write_bytes(&mut stream, &response, conn_limits.socket_write_timeout).await;
            }
        });
    }

    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let wait = limits.0.wait_strategy.clone();

        tokio::spawn(async move {
            loop {
                let (stream, addr) = Server::get_stream(&queue, &wait).await;
                tracing::warn!(%addr, "connection queue full, dropping connection");

                drop(stream);
            }
        });
    }

    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<Service<R>>, AllLimits) {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let resolver = self
            .resolver
            .expect("The `resolver` method must be called to create");

        let hostname = self.hostname.unwrap_or_else(|| {
            listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| String::from("localhost"))
        });

        let mut dispatcher = Dispatcher::new(resolver);
        if let Some(cors) = self.cors {
            dispatcher = dispatcher.with_cors(cors);
        }

        let service = Service {
            dispatcher,
            policies: self.policies,
            hostname,
        };
        let limits = (
            self.server_limits.unwrap_or_default(),
            self.connection_limits.unwrap_or_default(),
            self.request_limits.unwrap_or_default(),
            self.response_limits.unwrap_or_default(),
        );

        (listener, Arc::new(service), limits)
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);
