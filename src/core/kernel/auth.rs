use crate::core::config::Endpoint;
use crate::core::kernel::signer::{body_digest, rfc1123, CanonicalRequest, Signer};
use base64::engine::general_purpose;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::form_urlencoded;

/// HTTP method baked into the signed request line.
///
/// The method also fixes the URL scheme family, so the two can never
/// disagree: `GET` is a WebSocket upgrade (`ws`/`wss`), `POST` is a plain
/// HTTP call (`http`/`https`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMethod {
    Get,
    Post,
}

impl SignedMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    pub const fn scheme(self, use_tls: bool) -> &'static str {
        match (self, use_tls) {
            (Self::Get, false) => "ws",
            (Self::Get, true) => "wss",
            (Self::Post, false) => "http",
            (Self::Post, true) => "https",
        }
    }
}

/// A time-stamped, signed URL (query form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub host: String,
    pub date: String,
    /// base64 of the quoted-field authorization string.
    pub authorization: String,
}

/// Builds signed headers and signed URLs for one endpoint.
#[derive(Clone)]
pub struct RequestAuthorizer {
    endpoint: Endpoint,
    api_key: String,
    signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for RequestAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuthorizer")
            .field("endpoint", &self.endpoint)
            .field("algorithm", &self.signer.algorithm())
            .finish_non_exhaustive()
    }
}

impl RequestAuthorizer {
    pub fn new(endpoint: Endpoint, api_key: String, signer: Arc<dyn Signer>) -> Self {
        Self {
            endpoint,
            api_key,
            signer,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn authorization_fields(&self, canonical: &CanonicalRequest<'_>) -> String {
        let signature = self.signer.sign(&canonical.to_canonical_string());
        format!(
            r#"api_key="{}", algorithm="{}", headers="{}", signature="{}""#,
            self.api_key,
            self.signer.algorithm(),
            canonical.signed_header_names(),
            signature
        )
    }

    /// Header form for a body-bearing `POST`: `Content-Type`, `Host`,
    /// `Date`, `Digest`, `Authorization`, in that order.
    pub fn signed_headers(&self, body: &[u8], at: DateTime<Utc>) -> Vec<(String, String)> {
        let date = rfc1123(at);
        let digest = body_digest(body);
        let canonical = CanonicalRequest {
            host: &self.endpoint.host,
            date: &date,
            method: SignedMethod::Post.as_str(),
            path: &self.endpoint.path,
            digest: Some(&digest),
        };
        let authorization = format!("hmac {}", self.authorization_fields(&canonical));

        vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Host".to_string(), self.endpoint.host.clone()),
            ("Date".to_string(), date),
            ("Digest".to_string(), digest),
            ("Authorization".to_string(), authorization),
        ]
    }

    /// Query form: `scheme://host/path?host=…&date=…&authorization=…`.
    /// No body is digested.
    pub fn signed_url(&self, method: SignedMethod, at: DateTime<Utc>) -> SignedUrl {
        let date = rfc1123(at);
        let canonical = CanonicalRequest {
            host: &self.endpoint.host,
            date: &date,
            method: method.as_str(),
            path: &self.endpoint.path,
            digest: None,
        };
        let authorization =
            general_purpose::STANDARD.encode(self.authorization_fields(&canonical));

        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("host", &self.endpoint.host)
            .append_pair("date", &date)
            .append_pair("authorization", &authorization)
            .finish();

        SignedUrl {
            url: format!(
                "{}://{}{}?{}",
                method.scheme(self.endpoint.use_tls),
                self.endpoint.host,
                self.endpoint.path,
                query
            ),
            host: self.endpoint.host.clone(),
            date,
            authorization,
        }
    }
}
