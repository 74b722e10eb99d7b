pub mod client;
pub mod core;
pub mod utils;

pub use client::{AseClient, AseClientBuilder};
pub use crate::core::config::{Credentials, Endpoint};
pub use crate::core::errors::{AseError, CloseReason, ConnectError};
pub use crate::core::kernel::{
    AuthMode, Decoder, JsonDecoder, ResponseHandler, SignAlgorithm, StreamConfig, StreamHandle,
    UnaryConfig,
};
pub use crate::core::types::*;
