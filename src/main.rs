use ase_sdk::{AseClient, AuthMode, Credentials, Endpoint};
use std::time::Duration;

/// Posts a JSON request body to an ASE endpoint and prints the raw response.
///
/// ```text
/// ase-sdk https://itrans.xf-yun.com /v1/its request.json [--query-auth]
/// ```
///
/// Credentials come from `ASE_APP_ID`, `ASE_API_KEY` and `ASE_API_SECRET`
/// (a `.env` file is honoured when the `env-file` feature is on).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [base, path, body_file, rest @ ..] = args.as_slice() else {
        eprintln!("usage: ase-sdk <base-url> <path> <request.json> [--query-auth]");
        std::process::exit(2);
    };
    let auth_mode = if rest.iter().any(|a| a == "--query-auth") {
        AuthMode::Query
    } else {
        AuthMode::Headers
    };

    #[cfg(feature = "env-file")]
    let credentials = Credentials::from_env_file("ASE")?;
    #[cfg(not(feature = "env-file"))]
    let credentials = Credentials::from_env("ASE")?;
    let client = AseClient::builder(credentials, Endpoint::parse(base, path)?)
        .with_auth_mode(auth_mode)
        .with_unary_timeout(Duration::from_secs(10))
        .with_retry_count(2)
        .build()?;

    let body = tokio::fs::read(body_file).await?;
    // Validate locally before signing
    let _: serde_json::Value = serde_json::from_slice(&body)?;

    let raw = client.call_raw(&body).await?;
    println!("{}", String::from_utf8_lossy(&raw));
    Ok(())
}
