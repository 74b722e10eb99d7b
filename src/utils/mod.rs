pub mod framing;

pub use framing::{AudioFormat, AudioFramer};
