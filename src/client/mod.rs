mod builder;

pub use builder::AseClientBuilder;

use crate::core::config::{Credentials, Endpoint};
use crate::core::errors::{AseError, CloseReason};
use crate::core::kernel::{
    spawn_stream, ConnectionManager, Decoder, JsonDecoder, RequestAuthorizer, ResponseHandler,
    StreamConfig, StreamHandle, UnaryCaller, UnaryConfig,
};
use crate::core::types::{Request, Resp};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument};

/// Client for one ASE service endpoint.
///
/// Offers a unary call (`call`) and a streaming session over a single
/// WebSocket (`stream`, or frame by frame with `send` / `recv`). The
/// streaming connection is opened lazily on first use and is single-use:
/// once it has been closed, for whatever reason, every later streaming
/// operation fails with that reason until [`AseClient::reset_connection`]
/// is called.
pub struct AseClient<D: Decoder = JsonDecoder> {
    app_id: String,
    decoder: Arc<D>,
    connection: Arc<ConnectionManager>,
    authorizer: RequestAuthorizer,
    unary: UnaryCaller,
}

impl<D: Decoder> std::fmt::Debug for AseClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AseClient")
            .field("app_id", &self.app_id)
            .field("connection", &self.connection)
            .field("unary", &self.unary)
            .finish_non_exhaustive()
    }
}

impl AseClient<JsonDecoder> {
    pub fn builder(credentials: Credentials, endpoint: Endpoint) -> AseClientBuilder {
        AseClientBuilder::new(credentials, endpoint)
    }
}

impl<D: Decoder> AseClient<D> {
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.authorizer.endpoint()
    }

    pub fn stream_config(&self) -> &StreamConfig {
        self.connection.config()
    }

    pub fn unary_config(&self) -> &UnaryConfig {
        self.unary.config()
    }

    /// Unary call: sign, POST `body` as JSON and decode the 200 response.
    #[instrument(skip(self, body), fields(app_id = %self.app_id))]
    pub async fn call<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<Resp<D::Payload>, AseError> {
        let raw = self.unary.post_json(body).await?;
        self.decoder.decode(&raw)
    }

    /// Unary call returning the undecoded response body.
    pub async fn call_raw(&self, body: &[u8]) -> Result<Vec<u8>, AseError> {
        self.unary.post_raw(body).await
    }

    /// Start a full-duplex exchange.
    ///
    /// Frames from `frames` are written in order until one with
    /// `LastFrame` has gone out. Every response is decoded and passed to
    /// `handler` until the server answers with `LastFrame`. The first
    /// failure on either side closes the connection and is reported on the
    /// returned handle.
    #[instrument(skip_all, fields(app_id = %self.app_id, path = %self.endpoint().path))]
    pub fn stream<H>(&self, frames: mpsc::Receiver<Request>, handler: H) -> StreamHandle
    where
        H: ResponseHandler<D::Payload>,
    {
        info!("starting stream");
        spawn_stream(self.connection.clone(), self.decoder.clone(), frames, handler)
    }

    /// Open the streaming connection now instead of on first use.
    pub async fn connect(&self) -> Result<(), AseError> {
        self.connection.connect().await
    }

    /// Write a single frame. Frames without `header.status` are rejected.
    pub async fn send(&self, frame: &Request) -> Result<(), AseError> {
        if frame.status().is_none() {
            return Err(AseError::MissingStatus);
        }
        self.connection.write_json(frame).await
    }

    /// Read and decode a single response. A message that fails to decode
    /// closes the connection.
    pub async fn recv(&self) -> Result<Resp<D::Payload>, AseError> {
        let raw = self.connection.read().await?;
        match self.decoder.decode(&raw) {
            Ok(resp) => {
                if resp.header.is_last() {
                    self.connection.close_with(CloseReason::Completed).await;
                }
                Ok(resp)
            }
            Err(e) => {
                self.connection
                    .close_with(CloseReason::Failed(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Close the streaming connection. Idempotent; a stream in progress
    /// ends promptly.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.connection.close_reason()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the current streaming connection and start over with a fresh,
    /// not yet connected one. Streams still running on the old connection
    /// end with [`CloseReason::Requested`].
    pub async fn reset_connection(&mut self) {
        self.connection.close().await;
        self.connection = Arc::new(ConnectionManager::new(
            self.authorizer.clone(),
            self.connection.config().clone(),
        ));
    }
}
