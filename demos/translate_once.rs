//! Translates a short text with one signed unary call.
//!
//! ```text
//! ASE_APP_ID=... ASE_API_KEY=... ASE_API_SECRET=... cargo run --example translate_once
//! ```

use ase_sdk::core::kernel::Decoder;
use ase_sdk::{
    AseClient, AseError, Credentials, Endpoint, Fields, FrameStatus, Request, Resp, TextPayload,
};
use base64::engine::general_purpose;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ENDPOINT: &str = "https://itrans.xf-yun.com";
const PATH: &str = "/v1/its";

#[derive(Debug, Default, Deserialize)]
struct TransResult {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    trans_result: Pair,
}

#[derive(Debug, Default, Deserialize)]
struct Pair {
    #[serde(default)]
    src: String,
    #[serde(default)]
    dst: String,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    result: RawResult,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    text: String,
}

/// `payload.result.text` is base64 of the translation JSON.
struct TransDecoder;

impl Decoder for TransDecoder {
    type Payload = TransResult;

    fn decode(&self, raw: &[u8]) -> Result<Resp<TransResult>, AseError> {
        let resp: Resp<RawPayload> = Resp::from_slice(raw)?.ensure_success()?;
        let payload = match resp.payload {
            Some(payload) => {
                let text = general_purpose::STANDARD
                    .decode(payload.result.text)
                    .map_err(|e| AseError::Decode(e.to_string()))?;
                Some(serde_json::from_slice(&text)?)
            }
            None => None,
        };
        Ok(Resp {
            header: resp.header,
            payload,
        })
    }
}

fn translation_request(app_id: &str, text: &str, from: &str, to: &str) -> Request {
    let mut request = Request::new(FrameStatus::ForOnce).with_app_id(app_id);
    request.header.res_id = Some("123".to_string());
    request.set_parameters(Fields::new().with(
        "its",
        json!({"from": from, "to": to, "result": {}, "domain": "common"}),
    ));
    request.set_text_payload(
        "input_data",
        TextPayload {
            status: FrameStatus::ForOnce,
            text: general_purpose::STANDARD.encode(text),
        },
    );
    request
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let credentials = Credentials::from_env_file("ASE")?;
    let request = translation_request(&credentials.app_id, "你好", "cn", "en");

    let client = AseClient::builder(credentials, Endpoint::parse(ENDPOINT, PATH)?)
        .with_decoder(TransDecoder)
        .with_unary_timeout(Duration::from_secs(5))
        .with_retry_count(3)
        .build()?;

    let resp = client.call(&request).await?;
    let result = resp.payload.unwrap_or_default();
    println!(
        "{} -> {}: {} => {}",
        result.from, result.to, result.trans_result.src, result.trans_result.dst
    );
    Ok(())
}
