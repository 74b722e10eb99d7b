use crate::core::errors::AseError;
use crate::core::types::{AudioPayload, Fields, FrameStatus, Request};
use base64::engine::general_purpose;
use base64::Engine;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Shape of the audio carried in each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            encoding: "raw".to_string(),
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
        }
    }
}

/// Splits an audio buffer into a correctly sequenced list of frames.
///
/// The first chunk goes out as `FirstFrame` and carries the parameters,
/// the rest as `Continue`, the final one as `LastFrame`. A buffer that fits
/// in one chunk becomes `FirstFrame` followed by an empty `LastFrame`.
#[derive(Debug, Clone)]
pub struct AudioFramer {
    frame_size: usize,
    payload_key: String,
    format: AudioFormat,
    app_id: Option<String>,
    parameters: Option<Fields>,
}

impl AudioFramer {
    /// `frame_size` is in bytes of raw audio per frame; zero is treated as one.
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            payload_key: "audio".to_string(),
            format: AudioFormat::default(),
            app_id: None,
            parameters: None,
        }
    }

    pub fn with_payload_key(mut self, key: impl Into<String>) -> Self {
        self.payload_key = key.into();
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Service parameters, sent on the first frame only.
    pub fn with_parameters(mut self, parameters: Fields) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn frames(&self, audio: &[u8]) -> Vec<Request> {
        let mut chunks: Vec<&[u8]> = audio.chunks(self.frame_size).collect();
        if chunks.len() < 2 {
            // FirstFrame then an empty LastFrame
            chunks.resize(1, &[]);
            chunks.push(&[]);
        }

        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(seq, chunk)| {
                let status = match seq {
                    0 => FrameStatus::FirstFrame,
                    n if n == last => FrameStatus::LastFrame,
                    _ => FrameStatus::Continue,
                };
                self.frame(chunk, status, seq as u32)
            })
            .collect()
    }

    /// Build one frame around `chunk`.
    pub fn frame(&self, chunk: &[u8], status: FrameStatus, seq: u32) -> Request {
        let mut request = Request::new(status);
        request.header.app_id.clone_from(&self.app_id);
        if status == FrameStatus::FirstFrame {
            request.parameter.clone_from(&self.parameters);
        }

        request.set_audio_payload(
            self.payload_key.clone(),
            AudioPayload {
                encoding: self.format.encoding.clone(),
                sample_rate: self.format.sample_rate,
                channels: self.format.channels,
                bit_depth: self.format.bit_depth,
                status,
                seq,
                audio: general_purpose::STANDARD.encode(chunk),
                frame_size: chunk.len(),
            },
        );
        request
    }

    /// Frame `audio` and push every frame into `tx`, pausing `interval`
    /// between frames to pace the upload like a live source.
    pub async fn feed(
        &self,
        audio: &[u8],
        tx: &mpsc::Sender<Request>,
        interval: Option<Duration>,
    ) -> Result<(), AseError> {
        let frames = self.frames(audio);
        let total = frames.len();
        for (i, frame) in frames.into_iter().enumerate() {
            tx.send(frame).await.map_err(|_| AseError::StreamEnded)?;
            if let Some(pause) = interval.filter(|_| i + 1 < total) {
                tokio::time::sleep(pause).await;
            }
        }
        debug!(frames = total, "audio fed");
        Ok(())
    }
}
