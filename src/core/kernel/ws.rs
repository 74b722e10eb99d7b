use crate::core::errors::{AseError, CloseReason, ConnectError};
use crate::core::kernel::auth::{RequestAuthorizer, SignedMethod};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the close frame to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Timeouts for the streaming transport. `None` means block indefinitely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    pub handshake_timeout: Option<Duration>,
    /// Applied to every read, reset on each call
    pub read_timeout: Option<Duration>,
    /// Applied to every write, reset on each call
    pub write_timeout: Option<Duration>,
    /// Hard cap on the life of a connection, counted from handshake success.
    /// Not an idle timeout.
    pub connection_lifetime: Option<Duration>,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = Some(lifetime);
        self
    }
}

struct Connection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    expires_at: Option<Instant>,
}

/// Owns at most one WebSocket connection for a client.
///
/// The handshake runs at most once, on the first read or write; every caller
/// racing on that first use waits for the same outcome. A failed handshake is
/// cached for good. After the connection is torn down (I/O error, explicit
/// close, lifetime cap, or end of stream) every later operation fails with
/// the reason it was torn down.
///
/// One reader and one writer may use the connection concurrently.
pub struct ConnectionManager {
    authorizer: RequestAuthorizer,
    config: StreamConfig,
    connection: OnceCell<Result<Connection, ConnectError>>,
    closed: watch::Sender<Option<CloseReason>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", self.authorizer.endpoint())
            .field("config", &self.config)
            .field("initialized", &self.connection.initialized())
            .field("closed", &*self.closed.borrow())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(authorizer: RequestAuthorizer, config: StreamConfig) -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            authorizer,
            config,
            connection: OnceCell::new(),
            closed,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Perform the handshake if it has not run yet and return its outcome.
    pub async fn connect(&self) -> Result<(), AseError> {
        self.ensure_connected().await.map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection.get(), Some(Ok(_))) && self.closed.borrow().is_none()
    }

    /// Why the connection was torn down, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.borrow().clone()
    }

    /// Resolves once the connection has been torn down.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.closed.subscribe();
        wait_closed(&mut rx).await
    }

    /// When the lifetime cap fires, if a connection exists and a cap is set.
    pub fn expires_at(&self) -> Option<Instant> {
        match self.connection.get() {
            Some(Ok(conn)) => conn.expires_at,
            _ => None,
        }
    }

    async fn ensure_connected(&self) -> Result<&Connection, AseError> {
        if self.connection.get().is_none() && self.closed.borrow().is_some() {
            return Err(ConnectError::Closed.into());
        }

        let mut dialed = false;
        let conn = match self
            .connection
            .get_or_init(|| {
                dialed = true;
                self.handshake()
            })
            .await
        {
            Ok(conn) => conn,
            Err(e) => return Err(AseError::Connect(e.clone())),
        };

        // A close that landed mid-handshake found nothing to shut down
        if dialed {
            if let Some(reason) = self.close_reason() {
                debug!(%reason, "closed during handshake");
                shutdown(conn).await;
                return Err(closed_error(reason));
            }
        }
        Ok(conn)
    }

    #[instrument(skip(self), fields(host = %self.authorizer.endpoint().host, path = %self.authorizer.endpoint().path))]
    async fn handshake(&self) -> Result<Connection, ConnectError> {
        let signed = self.authorizer.signed_url(SignedMethod::Get, Utc::now());
        let dial = connect_async(signed.url.as_str());

        let dialed = match self.config.handshake_timeout {
            Some(limit) => timeout(limit, dial)
                .await
                .map_err(|_| ConnectError::HandshakeTimeout(limit))?,
            None => dial.await,
        };

        let (ws, _response) = dialed.map_err(|e| {
            let err = handshake_error(e);
            warn!(error = %err, "WebSocket handshake failed");
            err
        })?;

        let expires_at = self.config.connection_lifetime.map(|d| Instant::now() + d);
        let (sink, stream) = ws.split();
        debug!(lifetime = ?self.config.connection_lifetime, "WebSocket connected");

        Ok(Connection {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            expires_at,
        })
    }

    /// Read the next data frame (text or binary) as raw bytes.
    pub async fn read(&self) -> Result<Vec<u8>, AseError> {
        let conn = self.ensure_connected().await?;

        let next = self
            .guarded(conn, "read", self.config.read_timeout, async {
                let mut stream = conn.stream.lock().await;
                loop {
                    match stream.next().await {
                        Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                        Some(Ok(Message::Binary(data))) => return Ok(data),
                        // Control frames are answered by tungstenite itself
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            return Err(match frame {
                                Some(frame) => format!(
                                    "peer closed the connection: {} {}",
                                    u16::from(frame.code),
                                    frame.reason
                                ),
                                None => "peer closed the connection".to_string(),
                            })
                        }
                        Some(Err(e)) => return Err(e.to_string()),
                        None => return Err("connection closed by peer".to_string()),
                    }
                }
            })
            .await?;

        match next {
            Ok(raw) => {
                debug!(bytes = raw.len(), "frame received");
                Ok(raw)
            }
            Err(cause) => Err(self.fail(cause).await),
        }
    }

    /// Serialize `value` and write it as one text frame.
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), AseError> {
        let text = serde_json::to_string(value)?;
        self.write_text(text).await
    }

    pub async fn write_text(&self, text: String) -> Result<(), AseError> {
        let conn = self.ensure_connected().await?;
        let bytes = text.len();

        let sent = self
            .guarded(conn, "write", self.config.write_timeout, async {
                let mut sink = conn.sink.lock().await;
                sink.send(Message::Text(text)).await
            })
            .await?;

        match sent {
            Ok(()) => {
                debug!(bytes, "frame written");
                Ok(())
            }
            Err(e) => Err(self.fail(e.to_string()).await),
        }
    }

    /// Close the connection at the caller's request. Idempotent.
    pub async fn close(&self) {
        self.close_with(CloseReason::Requested).await;
    }

    /// Tear the connection down, recording `reason` if it is the first.
    /// Later calls are no-ops.
    pub async fn close_with(&self, reason: CloseReason) {
        let first = self.closed.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if !first {
            return;
        }

        debug!(%reason, "closing connection");
        if let Some(Ok(conn)) = self.connection.get() {
            shutdown(conn).await;
        }
    }

    /// Run one I/O operation bounded by the per-call timeout, and abandon it
    /// as soon as the connection is torn down from elsewhere or its lifetime
    /// cap passes. Once the cap has passed no I/O is attempted at all, even
    /// if it could complete at once.
    async fn guarded<T>(
        &self,
        conn: &Connection,
        operation: &'static str,
        per_call: Option<Duration>,
        io: impl Future<Output = T>,
    ) -> Result<T, AseError> {
        if conn.expires_at.is_some_and(|at| Instant::now() >= at) {
            return Err(self.deadlined(operation).await);
        }

        let mut closed = self.closed.subscribe();
        let lifetime = async {
            match conn.expires_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let bounded = async move {
            match per_call {
                Some(limit) => timeout_at(Instant::now() + limit, io).await.ok(),
                None => Some(io.await),
            }
        };

        tokio::select! {
            biased;
            reason = wait_closed(&mut closed) => Err(closed_error(reason)),
            () = lifetime => Err(self.deadlined(operation).await),
            outcome = bounded => match outcome {
                Some(value) => Ok(value),
                None => Err(self.timed_out(operation, per_call).await),
            },
        }
    }

    async fn deadlined(&self, operation: &'static str) -> AseError {
        warn!(operation, "connection lifetime elapsed");
        self.close_with(CloseReason::Deadlined).await;
        AseError::ConnectionDeadlined
    }

    async fn timed_out(&self, operation: &'static str, per_call: Option<Duration>) -> AseError {
        let err = AseError::Timeout {
            operation,
            after: per_call.unwrap_or_default(),
        };
        self.close_with(CloseReason::Failed(err.to_string())).await;
        err
    }

    async fn fail(&self, cause: String) -> AseError {
        warn!(%cause, "WebSocket I/O failed");
        self.close_with(CloseReason::Failed(cause.clone())).await;
        AseError::Transport(cause)
    }
}

/// Send a close frame, giving up after [`CLOSE_GRACE`].
async fn shutdown(conn: &Connection) {
    let mut sink = conn.sink.lock().await;
    match timeout(CLOSE_GRACE, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
        Err(_) => debug!("close frame timed out"),
    }
}

fn closed_error(reason: CloseReason) -> AseError {
    match reason {
        CloseReason::Deadlined => AseError::ConnectionDeadlined,
        other => AseError::ConnectionClosed(other),
    }
}

async fn wait_closed(rx: &mut watch::Receiver<Option<CloseReason>>) -> CloseReason {
    let reason = rx
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|current| (*current).clone());

    match reason {
        Some(reason) => reason,
        // The sender lives as long as the manager
        None => std::future::pending().await,
    }
}

fn handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default()
                .into_owned();
            ConnectError::Handshake {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            }
        }
        other => ConnectError::Dial(other.to_string()),
    }
}
