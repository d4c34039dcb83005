use crate::{
    errors::ErrorKind,
    http::{
        encoding::ContentEncoding,
        parser::Parser,
        request::Request,
        response::ResponseWriter,
        types::{Method, StatusCode, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits},
    rest::{Dispatcher, Policies, Resolver, RestError},
    server::server_impl::AllLimits,
};
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::timeout,
};

/// Everything a connection shares with the other workers of a server.
pub(crate) struct Service<R: Resolver> {
    pub(crate) dispatcher: Dispatcher<R>,
    pub(crate) policies: Policies,
    /// Value of the `host` response header.
    pub(crate) hostname: String,
}

/// Serves requests from one peer after another.
///
/// A worker owns one `HttpConnection` for its whole life and reuses its
/// buffers for every stream it is handed.
pub(crate) struct HttpConnection<R: Resolver> {
    service: Arc<Service<R>>,

    connection: Connection,
    parser: Parser,
    writer: ResponseWriter,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl<R: Resolver> HttpConnection<R> {
    #[inline]
    pub(crate) fn new(service: Arc<Service<R>>, limits: &AllLimits) -> Self {
        let (_, conn_limits, req_limits, resp_limits) = limits.clone();

        Self {
            service,

            connection: Connection::new(),
            parser: Parser::new(),
            writer: ResponseWriter::new(&resp_limits),

            conn_limits,
            req_limits,
            resp_limits,
        }
    }

    /// Serves `stream` until the peer leaves or the connection must close.
    ///
    /// Malformed requests are answered with a JSON error before closing;
    /// I/O failures abandon the stream and are returned.
    pub(crate) async fn run<S>(&mut self, stream: &mut S) -> Result<(), io::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(err) => {
                tracing::debug!(error = %err, "rejecting request");
                self.send_error(stream, &err.into_rest_error()).await
            }
        }
    }

    async fn impl_run<S>(&mut self, stream: &mut S) -> Result<(), ErrorKind>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.connection.reset();
        self.parser = Parser::new();
        let read_timeout = self.conn_limits.socket_read_timeout;

        loop {
            self.writer.reset(&self.resp_limits);

            let Some(head) = self
                .parser
                .read_head(stream, &self.req_limits, read_timeout)
                .await?
            else {
                return Ok(());
            };
            let started = Instant::now();

            let body = match head.has_body() {
                true => {
                    let length = head.content_length.unwrap_or(0);
                    Some(self.parser.read_body(stream, length, read_timeout).await?)
                }
                false => None,
            };

            self.connection.request_count += 1;
            let mut request = Request::from_head(
                &self.service.hostname,
                head,
                body,
                self.service.policies.clone(),
            );

            self.writer.version = request.version();
            self.writer.keep_alive =
                request.keep_alive && !self.connection.is_expired(&self.conn_limits);
            self.writer.head_only = request.method() == Method::Head;

            let status = self.respond(&mut request).await?;

            tracing::info!(
                target: "maker_rest::access",
                method = %request.method(),
                path = request.path(),
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            );

            write_bytes(stream, self.writer.buffer(), self.conn_limits.socket_write_timeout).await?;

            if !self.writer.keep_alive {
                return Ok(());
            }
        }
    }

    /// Dispatches `request` and writes its response into the buffer.
    async fn respond(&mut self, request: &mut Request) -> Result<StatusCode, ErrorKind> {
        let service = Arc::clone(&self.service);

        let body = match service.dispatcher.dispatch(request).await {
            Ok(body) => body,
            Err(err) => {
                self.writer.keep_alive = false;
                err.write_response(&mut self.writer, Some(&service.hostname));
                return Ok(err.status());
            }
        };

        request.response.run_callbacks().await;
        let status = request.response.status();

        let (body, encoding) = match (status, request.version()) {
            (StatusCode::NoContent | StatusCode::NotModified, _) => {
                (&[][..], ContentEncoding::Identity)
            }
            (_, Version::Http10) => (&body[..], ContentEncoding::Identity),
            (_, Version::Http11) => (
                &body[..],
                ContentEncoding::negotiate(request.header("accept-encoding")),
            ),
        };

        self.writer
            .status(status)
            .header("host", &service.hostname)
            .header("content-type", "application/json")
            .headers(request.response.headers());
        self.writer.encoded_body(body, encoding, &self.resp_limits)?;

        Ok(status)
    }

    async fn send_error<S>(&mut self, stream: &mut S, error: &RestError) -> Result<(), io::Error>
    where
        S: AsyncWrite + Unpin,
    {
        self.writer.reset(&self.resp_limits);
        self.writer.keep_alive = false;
        error.write_response(&mut self.writer, Some(&self.service.hostname));

        write_bytes(stream, self.writer.buffer(), self.conn_limits.socket_write_timeout).await
    }
}

#[inline]
pub(crate) async fn write_bytes<S>(stream: &mut S, bytes: &[u8], time: Duration) -> Result<(), io::Error>
where
    S: AsyncWrite + Unpin,
{
    timeout(time, stream.write_all(bytes)).await?
}

/// Age and usage of the current peer connection.
#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }

    /// Whether the connection may serve no request after the current one.
    #[inline(always)]
    fn is_expired(&self, limits: &ConnLimits) -> bool {
        self.request_count >= limits.max_requests_per_connection
            || self.created.elapsed() > limits.connection_lifetime
    }
}
