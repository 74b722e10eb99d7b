//! Streams a PCM file to a speech transcription endpoint and writes every
//! decoded response to `resp.body.txt`.
//!
//! ```text
//! ASE_APP_ID=... ASE_API_KEY=... ASE_API_SECRET=... \
//!     cargo run --example ist_stream -- ./test.en.txt.pcm
//! ```

use ase_sdk::core::kernel::Decoder;
use ase_sdk::utils::AudioFramer;
use ase_sdk::{
    AseClient, AseError, Credentials, Endpoint, Fields, Resp, RespHeader, ResponseHandler,
};
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

const ENDPOINT: &str = "ws://cn-huadong-1.xf-yun.com";
const PATH: &str = "/v1/private/s501d1f86";
const FRAME_SIZE: usize = 1024;

#[derive(Debug, Serialize, Deserialize)]
struct IstPayload {
    result: IstResult,
}

#[derive(Debug, Serialize, Deserialize)]
struct IstResult {
    #[serde(default)]
    compress: String,
    #[serde(default)]
    encoding: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    seq: i64,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    text: String,
    #[serde(rename = "structuredText", default)]
    structured_text: Option<Sentence>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sentence {
    #[serde(default)]
    sn: i64,
    #[serde(default)]
    ls: bool,
    #[serde(default)]
    bg: i64,
    #[serde(default)]
    ed: i64,
    #[serde(default)]
    ws: Vec<WordSlot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WordSlot {
    #[serde(default)]
    bg: i64,
    #[serde(default)]
    cw: Vec<Candidate>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Candidate {
    #[serde(default)]
    sc: i64,
    #[serde(default)]
    w: String,
}

/// `payload.result.text` is base64 of a JSON sentence; unpack it.
struct IstDecoder;

impl Decoder for IstDecoder {
    type Payload = IstPayload;

    fn decode(&self, raw: &[u8]) -> Result<Resp<IstPayload>, AseError> {
        let mut resp: Resp<IstPayload> = Resp::from_slice(raw)?;
        if let Some(payload) = resp.payload.as_mut() {
            let text = general_purpose::STANDARD
                .decode(&payload.result.text)
                .map_err(|e| AseError::Decode(format!("failed to decode text: {}", e)))?;
            payload.result.structured_text = Some(serde_json::from_slice(&text)?);
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct Record<'a> {
    header: &'a RespHeader,
    payload: &'a Option<IstPayload>,
}

struct FileHandler {
    out: std::fs::File,
}

#[async_trait]
impl ResponseHandler<IstPayload> for FileHandler {
    async fn handle(&mut self, resp: Resp<IstPayload>) -> anyhow::Result<()> {
        let resp = resp.ensure_success()?;
        let record = Record {
            header: &resp.header,
            payload: &resp.payload,
        };
        serde_json::to_writer_pretty(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;

        if let Some(sentence) = resp.payload.and_then(|p| p.result.structured_text) {
            let words: String = sentence
                .ws
                .iter()
                .filter_map(|slot| slot.cw.first().map(|c| c.w.as_str()))
                .collect();
            info!(sn = sentence.sn, last = sentence.ls, "{}", words);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let file = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./test.en.txt.pcm".to_string());
    let audio = tokio::fs::read(&file).await?;

    let credentials = Credentials::from_env_file("ASE")?;
    let app_id = credentials.app_id.clone();
    let client = AseClient::builder(credentials, Endpoint::parse(ENDPOINT, PATH)?)
        .with_decoder(IstDecoder)
        .with_handshake_timeout(Duration::from_secs(5))
        .with_read_timeout(Duration::from_secs(15))
        .with_connection_lifetime(Duration::from_secs(60))
        .build()?;

    let parameters = Fields::new().with(
        "iat",
        json!({
            "language": "en_us",
            "result": {"encoding": "utf8", "compress": "raw", "format": "json"}
        }),
    );
    let framer = AudioFramer::new(FRAME_SIZE)
        .with_app_id(app_id)
        .with_parameters(parameters);

    let (tx, rx) = mpsc::channel(64);
    let handler = FileHandler {
        out: std::fs::File::create("./resp.body.txt")?,
    };
    let stream = client.stream(rx, handler);

    let feeder = tokio::spawn(async move {
        framer
            .feed(&audio, &tx, Some(Duration::from_millis(40)))
            .await
    });

    match stream.wait().await {
        Ok(()) => println!("stream done"),
        Err(e) => println!("stream err: {}", e),
    }
    if let Ok(Err(e)) = feeder.await {
        println!("feeder stopped early: {}", e);
    }
    Ok(())
}
