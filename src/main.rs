mod binary;
mod config;
mod logging;
mod net;
mod platform;
mod proto;
mod requests;
mod runtime;

#[cfg(test)]
mod test_utils;

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use binary::BinaryInstaller;
use config::{AgentConfig, AgentConfigBuilder, DEFAULT_CLIENT_ID, DEFAULT_TIMEOUT_MS};
use logging::{LogConfig, init_logging};
use net::ResourceFetcher;
use proto::BRAND_NAME;
use requests::Requests;
use runtime::Runtime;

/// CLI arguments for the codepop agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Install root for companion binaries (overrides CODEPOP_ROOT env var)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Base URL of the version and bundle endpoints
    #[arg(long, value_name = "URL")]
    base_url: String,

    /// Client identifier reported to the companion
    #[arg(long, value_name = "ID", default_value = DEFAULT_CLIENT_ID)]
    client: String,

    /// Proxy URL for downloads (overrides HTTPS_PROXY/HTTP_PROXY env vars)
    #[arg(long, value_name = "URL")]
    proxy: Option<String>,

    /// Verify TLS certificates when downloading through a proxy
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    strict_ssl: bool,

    /// Per-request timeout in milliseconds
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides CODEPOP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<AgentConfig, config::ConfigError> {
    let mut builder = AgentConfigBuilder::new()
        .base_url(&args.base_url)
        .client_id(&args.client)
        .proxy_url(args.proxy.clone())
        .strict_ssl(args.strict_ssl)
        .timeout_ms(args.timeout_ms);
    if let Some(root) = &args.root {
        builder = builder.install_root(root);
    }
    builder.build()
}

/// Dispatch one input payload, using the typed facade for known operations
async fn dispatch(
    requests: &Requests,
    payload: serde_json::Value,
) -> Result<serde_json::Value, runtime::RuntimeError> {
    if let Some(inner) = payload.get("complete") {
        if let Ok(params) = serde_json::from_value(inner.clone()) {
            let result = requests.complete(params).await?;
            return Ok(serde_json::to_value(result).map_err(runtime::RuntimeError::Serialize)?);
        }
    }
    if payload.get("state").is_some() {
        let state = requests.state().await?;
        return Ok(serde_json::to_value(state).map_err(runtime::RuntimeError::Serialize)?);
    }
    requests.raw(payload).await
}

/// Read JSON payloads line by line, answer one response line per payload.
///
/// Line-oriented callers pair requests to responses 1:1, so a failed request
/// still produces an output line: `{"error": "<message>"}`.
async fn serve_lines<R, W>(requests: &Requests, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let payload: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "skipping malformed input line");
                continue;
            }
        };

        let response = match dispatch(requests, payload).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "request failed");
                serde_json::json!({ "error": e.to_string() })
            }
        };

        let mut out = response.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    info!(
        brand = BRAND_NAME,
        root = %config.install_root.display(),
        base_url = %config.base_url,
        client = %config.client_id,
        "starting agent"
    );

    let fetcher = ResourceFetcher::new(&config.proxy)?;
    let installer = BinaryInstaller::new(&config.install_root, &config.base_url, fetcher);
    let runtime =
        Runtime::new(installer, &config.client_id).with_request_timeout(config.request_timeout);
    let requests = Requests::new(runtime);

    requests.init().await?;

    let served = serve_lines(
        &requests,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    requests.deinit().await;
    info!("agent shut down");

    served?;
    Ok(())
}
