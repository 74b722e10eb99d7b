/// ASE kernel - signed transport for unary and streaming calls
///
/// The kernel knows how to sign a request, open and guard a WebSocket, drive
/// a full-duplex exchange over it, and issue a signed POST. It never looks
/// inside a payload: only `header.status` is inspected, to detect the end of
/// a stream.
///
/// # Architecture
///
/// ## Authentication
/// - `Signer` / `HmacSigner`: HMAC over the canonical request, SHA-256 by default
/// - `RequestAuthorizer`: header form (with body digest) and query form
///
/// ## Transport
/// - `ConnectionManager`: one-shot handshake, per-call deadlines, lifetime cap,
///   first-error-wins close
/// - `spawn_stream`: send and receive loops over one connection
/// - `UnaryCaller`: signed POST with retries
///
/// ## Message Handling
/// - `Decoder`: raw bytes to `Resp<Payload>`, pluggable per service
///
/// # Streaming example
/// ```rust,no_run
/// use ase_sdk::core::config::{Credentials, Endpoint};
/// use ase_sdk::core::kernel::*;
/// use ase_sdk::core::types::{FrameStatus, Request, Resp};
/// use secrecy::Secret;
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = Credentials::from_env("ASE")?;
/// let signer = Arc::new(HmacSigner::new(
///     Secret::new(credentials.api_secret().to_string()),
///     SignAlgorithm::default(),
/// ));
/// let authorizer = RequestAuthorizer::new(
///     Endpoint::parse("wss://ws.example.com", "/v1/private/s501d1f86")?,
///     credentials.api_key().to_string(),
///     signer,
/// );
/// let conn = Arc::new(ConnectionManager::new(authorizer, StreamConfig::default()));
///
/// let (tx, rx) = mpsc::channel(16);
/// let decoder = Arc::new(JsonDecoder::<serde_json::Value>::new());
/// let handle = spawn_stream(conn, decoder, rx, |resp: Resp| -> anyhow::Result<()> {
///     println!("{:?}", resp.payload);
///     Ok(())
/// });
/// tx.send(Request::new(FrameStatus::FirstFrame)).await?;
/// tx.send(Request::new(FrameStatus::LastFrame)).await?;
/// handle.wait().await?;
/// # Ok(())
/// # }
/// ```
pub mod auth;
pub mod codec;
pub mod rest;
pub mod signer;
pub mod stream;
pub mod ws;

// Re-export key types for convenience
pub use auth::{RequestAuthorizer, SignedMethod, SignedUrl};
pub use codec::{Decoder, JsonDecoder};
pub use rest::{AuthMode, UnaryCaller, UnaryConfig};
pub use signer::{body_digest, rfc1123, sign, CanonicalRequest, HmacSigner, SignAlgorithm, Signer};
pub use stream::{spawn_stream, ResponseHandler, StreamHandle};
pub use ws::{ConnectionManager, StreamConfig};
