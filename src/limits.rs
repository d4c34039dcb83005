//! Server configuration: concurrency, timeouts and message size limits
//!
//! Every struct here implements [`Default`] with values suited to a small
//! JSON API; override individual fields with struct update syntax.
//!
//! # Examples
//!
//! ```no_run
//! use maker_rest::{handler, limits::{ConnLimits, ReqLimits, ServerLimits}, Router, Server};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut router = Router::new();
//!     router.get("/ping", handler::sync(|_req| Ok("pong"))).unwrap();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .resolver(router)
//!         .server_limits(ServerLimits {
//!             max_connections: 500,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 64 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls connection admission and the worker pool.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [--------------]   No    /----------------\   Yes  [-------------]
/// [ Add to queue ] <====== | Is queue full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [--------]    Yes   /-------------------------\   No    [------]
/// [ Worker ] <======= | Is there a free worker? | ======> [ Wait ]
/// [--------]          \-------------------------/         [------]
/// ```
///
/// Workers are spawned once at launch and loop forever, taking accepted
/// connections from a shared queue. Each worker serves one connection at
/// a time, request after request, until the connection closes.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, and therefore of connections served at once (default: `100`).
    pub max_connections: usize,

    /// Capacity of the admission queue (default: `250`).
    ///
    /// Connections accepted while the queue is full are answered with
    /// `503 Service Unavailable` and closed.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue to fill (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Tasks dedicated to writing `503` answers on overflow (default: `1`).
    ///
    /// With `0` rejected connections are dropped without a response.
    pub count_503_handlers: usize,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
        }
    }
}

/// Strategy for worker tasks waiting on an empty queue
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Calls [`tokio::task::yield_now()`] between polls.
    ///
    /// Lowest latency, but keeps a core busy while idle.
    Yield,

    /// Calls [`tokio::time::sleep()`] between polls.
    Sleep(Duration),
}

/// Per-connection timeouts and reuse limits
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum wait for the next bytes from the peer (default: `2 seconds`).
    ///
    /// Applies both to an idle keep-alive connection and to a slow body.
    pub socket_read_timeout: Duration,

    /// Maximum time a single write to the peer may take (default: `3 seconds`).
    pub socket_write_timeout: Duration,

    /// Requests served on one connection before it is closed (default: `100`).
    ///
    /// The last permitted response carries `Connection: close`.
    pub max_requests_per_connection: usize,

    /// Upper bound on the age of a connection (default: `2 minutes`).
    ///
    /// Checked between requests; a request in flight is always completed.
    pub connection_lifetime: Duration,
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),
        }
    }
}

/// Limits applied while reading a request
///
/// Requests that exceed them are answered with a JSON error and the
/// connection is closed:
///
/// | Limit | Status |
/// |-------|--------|
/// | `head_size` | `431 Request Header Fields Too Large` |
/// | `header_count` | `431 Request Header Fields Too Large` |
/// | `body_size` | `413 Payload Too Large` |
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of the request line plus headers, in bytes (default: `8 KB`).
    pub head_size: usize,

    /// Maximum number of header lines (default: `64`).
    pub header_count: usize,

    /// Maximum declared `Content-Length` (default: `1 MB`).
    pub body_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            head_size: 8 * 1024,
            header_count: 64,
            body_size: 1024 * 1024,
        }
    }
}

/// Response buffering and compression settings
///
/// # Buffer Management
///
/// Each connection owns one output buffer, reused between responses:
/// ```rust
/// # use maker_rest::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<u8> = Vec::with_capacity(limits.default_capacity);
/// #
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial capacity of the output buffer (default: `1024 B`).
    pub default_capacity: usize,
    /// Capacity above which the buffer is reallocated after use (default: `64 KB`).
    pub max_capacity: usize,

    /// Largest chunk emitted for a compressed, chunked body (default: `1025 B`).
    pub chunk_size: usize,
    /// Compression level for `deflate` and `gzip`, `0..=9` (default: `6`).
    pub compression_level: u32,
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 64 * 1024,

            chunk_size: 1025,
            compression_level: 6,
        }
    }
}
