use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;

/// Identity and shared secret used to sign every request.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_id: String,
    pub api_key: Secret<String>,
    pub api_secret: Secret<String>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for Credentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credentials", 3)?;
        state.serialize_field("app_id", &self.app_id)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("api_secret", "[REDACTED]")?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialsHelper {
            app_id: String,
            api_key: String,
            api_secret: String,
        }

        let helper = CredentialsHelper::deserialize(deserializer)?;
        Ok(Self::new(helper.app_id, helper.api_key, helper.api_secret))
    }
}

impl Credentials {
    #[must_use]
    pub fn new(app_id: String, api_key: String, api_secret: String) -> Self {
        Self {
            app_id,
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
        }
    }

    /// Create credentials from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_APP_ID` (e.g., `ASE_APP_ID`)
    /// - `{PREFIX}_API_KEY`
    /// - `{PREFIX}_API_SECRET`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let read = |suffix: &str| {
            let name = format!("{}_{}", prefix, suffix);
            env::var(&name).map_err(|_| ConfigError::MissingEnvironmentVariable(name))
        };

        Ok(Self::new(
            read("APP_ID")?,
            read("API_KEY")?,
            read("API_SECRET")?,
        ))
    }

    /// Load a .env file (if present) and then read credentials from the environment.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Same as [`Credentials::from_env_file`] with an explicit file path,
    /// e.g. `.env.production`.
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // No file: fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get API secret (use carefully - exposes secret)
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

/// Remote resource a client talks to. The scheme is derived per transport
/// (`ws`/`wss` for streaming, `http`/`https` for unary calls).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub path: String,
    pub use_tls: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            use_tls: false,
        }
    }

    #[must_use]
    pub const fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Parse a base such as `wss://iat-api.xfyun.cn` plus a path such as `/v1/private/s501d1f86`.
    pub fn parse(base: &str, path: &str) -> Result<Self, ConfigError> {
        let (scheme, host) = base
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidEndpoint(base.to_string()))?;

        let use_tls = match scheme {
            "ws" | "http" => false,
            "wss" | "https" => true,
            _ => return Err(ConfigError::InvalidEndpoint(base.to_string())),
        };

        let host = host.trim_end_matches('/');
        if host.is_empty() || host.contains('/') {
            return Err(ConfigError::InvalidEndpoint(base.to_string()));
        }

        let endpoint = Self {
            host: host.to_string(),
            path: path.to_string(),
            use_tls,
        };
        endpoint.validate()?;
        Ok(endpoint)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidEndpoint("host is empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
