use crate::client::AseClient;
use crate::core::config::{ConfigError, Credentials, Endpoint};
use crate::core::errors::AseError;
use crate::core::kernel::{
    AuthMode, ConnectionManager, Decoder, HmacSigner, JsonDecoder, RequestAuthorizer,
    SignAlgorithm, Signer, StreamConfig, UnaryCaller, UnaryConfig,
};
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`AseClient`]
///
/// Credentials and endpoint are required; everything else has a default:
/// HMAC-SHA256 signing, [`JsonDecoder`] over `serde_json::Value`, no
/// streaming timeouts and a 30 second unary timeout without retries.
pub struct AseClientBuilder<D = JsonDecoder> {
    credentials: Credentials,
    endpoint: Endpoint,
    algorithm: SignAlgorithm,
    signer: Option<Arc<dyn Signer>>,
    decoder: D,
    stream: StreamConfig,
    unary: UnaryConfig,
}

impl AseClientBuilder<JsonDecoder> {
    pub fn new(credentials: Credentials, endpoint: Endpoint) -> Self {
        Self {
            credentials,
            endpoint,
            algorithm: SignAlgorithm::default(),
            signer: None,
            decoder: JsonDecoder::new(),
            stream: StreamConfig::default(),
            unary: UnaryConfig::default(),
        }
    }
}

impl<D: Decoder> AseClientBuilder<D> {
    pub fn with_sign_algorithm(mut self, algorithm: SignAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Replace the HMAC signer altogether. Overrides `with_sign_algorithm`.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Swap the response decoder, changing the client's payload type.
    pub fn with_decoder<D2: Decoder>(self, decoder: D2) -> AseClientBuilder<D2> {
        AseClientBuilder {
            credentials: self.credentials,
            endpoint: self.endpoint,
            algorithm: self.algorithm,
            signer: self.signer,
            decoder,
            stream: self.stream,
            unary: self.unary,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.endpoint.use_tls = use_tls;
        self
    }

    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream = config;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.stream.handshake_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.stream.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.stream.write_timeout = Some(timeout);
        self
    }

    /// Hard cap on how long a streaming connection may live.
    pub fn with_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.stream.connection_lifetime = Some(lifetime);
        self
    }

    pub fn with_unary_config(mut self, config: UnaryConfig) -> Self {
        self.unary = config;
        self
    }

    pub fn with_unary_timeout(mut self, timeout: Duration) -> Self {
        self.unary.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.unary.retry_count = retry_count;
        self
    }

    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.unary.auth_mode = auth_mode;
        self
    }

    pub fn build(self) -> Result<AseClient<D>, AseError> {
        self.endpoint.validate()?;
        if self.credentials.api_key().is_empty() {
            return Err(ConfigError::InvalidConfiguration("api_key is empty".to_string()).into());
        }

        let signer = self.signer.unwrap_or_else(|| {
            Arc::new(HmacSigner::new(
                Secret::new(self.credentials.api_secret().to_string()),
                self.algorithm,
            ))
        });
        let authorizer = RequestAuthorizer::new(
            self.endpoint,
            self.credentials.api_key().to_string(),
            signer,
        );

        let unary = UnaryCaller::new(authorizer.clone(), self.unary)?;

        Ok(AseClient {
            app_id: self.credentials.app_id.clone(),
            decoder: Arc::new(self.decoder),
            connection: Arc::new(ConnectionManager::new(authorizer.clone(), self.stream)),
            authorizer,
            unary,
        })
    }
}
