//! Development TCP transport.
//!
//! Accepts connections on a Tokio listener and feeds parsed HTTP/1.1
//! requests into an application's dispatcher, one spawned task per
//! connection, with keep-alive support. This transport exists for
//! development and tests; production deployments are expected to put
//! the dispatcher behind their own transport.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::http::{
    request::{Request, RequestError},
    response::Response,
    StatusCode,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

// A buffered request may not exceed this many bytes (8 MiB).
const REQUEST_SIZE_LIMIT: usize = 8 * 1024 * 1024;

// Starting capacity of each connection's read buffer.
const READ_BUF_SIZE: usize = 4096;

/// The development server: a bound TCP listener that dispatches every
/// request through one [`App`].
///
/// # Examples
///
/// ```rust,no_run
/// use carafe::{App, Payload};
/// use carafe::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut builder = App::builder();
///     builder.route("/", "index", &[], |_p| async {
///         Ok(Payload::text("Hello, World!"))
///     })?;
///     let app = builder.build();
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     println!("Listening on http://127.0.0.1:8080");
///     server.run(app).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to `addr`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address is unavailable, e.g. the
    /// port is taken.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, dispatching through `app`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Io`] only for unrecoverable listener failures;
    /// per-connection errors are logged and do not stop the server.
    pub async fn run(self, app: Arc<App>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "carafe listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };

            debug!(%peer, "connection accepted");
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                if let Err(e) = Connection::new(stream, peer, app).serve().await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

impl App {
    /// Binds the development server to `addr` and serves this
    /// application until the process ends.
    ///
    /// Shorthand for [`Server::bind`] followed by [`Server::run`].
    pub async fn serve(self: Arc<Self>, addr: impl AsRef<str>) -> Result<(), ServerError> {
        Server::bind(addr).await?.run(self).await
    }
}

// One accepted connection: its stream, read buffer, and the app it
// dispatches into.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    app: Arc<App>,
    buf: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, app: Arc<App>) -> Self {
        Self {
            stream,
            peer,
            app,
            buf: BytesMut::with_capacity(READ_BUF_SIZE),
        }
    }

    // Request loop: HTTP/1.1 connections are persistent, so keep
    // serving until the peer hangs up or asks to close.
    async fn serve(mut self) -> Result<(), std::io::Error> {
        loop {
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                debug!(peer = %self.peer, "peer closed the connection");
                return Ok(());
            }

            if self.buf.len() > REQUEST_SIZE_LIMIT {
                warn!(peer = %self.peer, "request exceeds size limit");
                return self
                    .reject(StatusCode::PayloadTooLarge, "Request entity too large")
                    .await;
            }

            let (request, body_offset) = match Request::parse(&self.buf) {
                Ok(parsed) => parsed,
                // Keep reading until the header section is complete.
                Err(RequestError::Incomplete) => continue,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "unparseable request");
                    return self
                        .reject(StatusCode::BadRequest, format!("Bad Request: {e}"))
                        .await;
                }
            };

            // The body may still be in flight; wait for all of it.
            let frame_len = body_offset + request.content_length().unwrap_or(0);
            if self.buf.len() < frame_len {
                continue;
            }

            let keep_alive = request.is_keep_alive();
            let response = self.dispatch(request).await.keep_alive(keep_alive);
            self.stream.write_all(&response.into_bytes()).await?;
            self.stream.flush().await?;

            let _ = self.buf.split_to(frame_len);

            if !keep_alive {
                debug!(peer = %self.peer, "closing after Connection: close");
                return Ok(());
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        match Arc::clone(&self.app).handle_request(request).await {
            Ok(response) => response,
            // Reachable only for debug-mode propagation and handler
            // contract violations.
            Err(e) if self.app.debug() => Response::new(StatusCode::InternalServerError)
                .body(format!("Internal Server Error\n\n{e:?}")),
            Err(e) => {
                error!(error = %e, "dispatch failed");
                Response::new(StatusCode::InternalServerError).body("Internal Server Error")
            }
        }
    }

    // Writes a final error response and ends the connection.
    async fn reject(
        mut self,
        status: StatusCode,
        body: impl Into<String>,
    ) -> Result<(), std::io::Error> {
        let response = Response::new(status).body(body).keep_alive(false);
        self.stream.write_all(&response.into_bytes()).await
    }
}
