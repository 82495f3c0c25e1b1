//! HTTP resource fetcher
//!
//! Performs a single HTTP(S) request, following 301/302 redirects manually,
//! applying proxy configuration, and exposing the response body either as
//! accumulated text or streamed into a file sink.

use std::io;
use std::path::Path;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

// ============================================================================
// Constants
// ============================================================================

/// Fixed User-Agent sent with every request
const USER_AGENT: &str = concat!("codepop-agent/", env!("CARGO_PKG_VERSION"));

/// Maximum redirect hops per fetch
const MAX_REDIRECTS: usize = 10;

/// Proxy environment variables, checked in order; first non-empty wins
const PROXY_ENV_VARS: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"];

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the fetcher
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection-level failure (DNS, TLS handshake, reset, ...)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response status outside the accepted set (200, 403, redirects)
    #[error("failed request, status code {code}")]
    HttpStatus { code: u16 },

    /// Redirect status without a usable Location header
    #[error("invalid download location received (status {code})")]
    MissingLocation { code: u16 },

    /// Redirect chain exceeded the defensive cap
    #[error("too many redirects (more than {limit})")]
    TooManyRedirects { limit: usize },

    /// Local I/O failure while writing the response to a file sink
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Proxy configuration
// ============================================================================

/// Host-supplied proxy settings
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Explicit proxy URL; takes precedence over the environment
    pub url: Option<String>,

    /// Whether TLS certificates are verified when a proxy is active
    pub strict_ssl: bool,
}

/// Resolve the effective proxy URL: explicit setting first, then the proxy
/// environment variables in priority order. Only http/https proxy schemes are
/// honored; any other scheme disables the proxy.
fn resolve_proxy_with(
    explicit: Option<&str>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let candidate = explicit
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            PROXY_ENV_VARS
                .iter()
                .filter_map(|name| env_lookup(name))
                .find(|v| !v.is_empty())
        })?;

    match Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(candidate),
        _ => None,
    }
}

fn resolve_proxy(explicit: Option<&str>) -> Option<String> {
    resolve_proxy_with(explicit, |name| std::env::var(name).ok())
}

// ============================================================================
// Resource Fetcher
// ============================================================================

/// HTTP(S) fetcher with proxy awareness and manual redirect handling
pub struct ResourceFetcher {
    client: reqwest::Client,
}

impl ResourceFetcher {
    /// Build a fetcher for the given proxy configuration.
    ///
    /// With an active proxy, TLS verification follows `strict_ssl`. Without
    /// one, verification is disabled and a warning is logged.
    pub fn new(proxy: &ProxyConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::none())
            .no_proxy();

        let verify_tls = match resolve_proxy(proxy.url.as_deref()) {
            Some(proxy_url) => {
                debug!(proxy = %proxy_url, "using proxy for binary downloads");
                builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
                proxy.strict_ssl
            }
            None => false,
        };

        if !verify_tls {
            warn!("TLS certificate verification is disabled for binary downloads");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Fetch a URL and accumulate the response body as text
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.fetch(url).await?;
        Ok(response.text().await?)
    }

    /// Fetch a URL and stream the response body into a file at `dest`
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let response = self.fetch(url).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(())
    }

    /// Issue the request, re-issuing against the Location header on 301/302.
    ///
    /// 200 and 403 both proceed to the consumer; some CDNs answer 403 for
    /// pre-signed or restricted paths the consumer can still use.
    async fn fetch(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let mut url = url.to_string();

        for _ in 0..MAX_REDIRECTS {
            debug!(url = %url, "fetching resource");
            let response = self.client.get(&url).send().await?;
            let status = response.status();

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(FetchError::MissingLocation {
                        code: status.as_u16(),
                    })?;
                url = location.to_string();
                continue;
            }

            if status == StatusCode::OK || status == StatusCode::FORBIDDEN {
                return Ok(response);
            }

            return Err(FetchError::HttpStatus {
                code: status.as_u16(),
            });
        }

        Err(FetchError::TooManyRedirects {
            limit: MAX_REDIRECTS,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    // ─── proxy resolution ────────────────────────────────────────────────

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_explicit_proxy_beats_environment() {
        let env = env_of(&[("HTTPS_PROXY", "http://env-proxy:8080")]);
        let resolved = resolve_proxy_with(Some("http://explicit:3128"), |k| {
            env.get(k).cloned()
        });
        assert_eq!(resolved.as_deref(), Some("http://explicit:3128"));
    }

    #[test]
    fn test_env_proxy_priority_order() {
        let env = env_of(&[
            ("http_proxy", "http://lowest:1"),
            ("HTTP_PROXY", "http://third:1"),
            ("https_proxy", "http://second:1"),
            ("HTTPS_PROXY", "http://first:1"),
        ]);
        let resolved = resolve_proxy_with(None, |k| env.get(k).cloned());
        assert_eq!(resolved.as_deref(), Some("http://first:1"));

        let env = env_of(&[
            ("http_proxy", "http://lowest:1"),
            ("HTTP_PROXY", "http://third:1"),
        ]);
        let resolved = resolve_proxy_with(None, |k| env.get(k).cloned());
        assert_eq!(resolved.as_deref(), Some("http://third:1"));
    }

    #[test]
    fn test_empty_env_values_are_skipped() {
        let env = env_of(&[("HTTPS_PROXY", ""), ("HTTP_PROXY", "http://real:1")]);
        let resolved = resolve_proxy_with(None, |k| env.get(k).cloned());
        assert_eq!(resolved.as_deref(), Some("http://real:1"));
    }

    #[test]
    fn test_non_http_proxy_scheme_disables_proxy() {
        let resolved = resolve_proxy_with(Some("socks5://proxy:1080"), |_| None);
        assert_eq!(resolved, None);

        let resolved = resolve_proxy_with(Some("not a url"), |_| None);
        assert_eq!(resolved, None);
    }

    #[test]
    fn test_no_proxy_configured() {
        assert_eq!(resolve_proxy_with(None, |_| None), None);
    }

    // ─── HTTP behavior against a loopback server ─────────────────────────

    /// Spawn a loopback server answering with the scripted responses, one per
    /// request, recording each request path. Returns (base_url, paths_rx,
    /// stop_tx).
    fn start_scripted_server(
        responses: Vec<tiny_http::Response<io::Cursor<Vec<u8>>>>,
    ) -> (String, mpsc::Receiver<String>, mpsc::Sender<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("failed to start test server");
        let port = server.server_addr().to_ip().unwrap().port();
        let base = format!("http://127.0.0.1:{port}");

        let (paths_tx, paths_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        thread::spawn(move || {
            let mut responses = responses.into_iter();
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                match server.recv_timeout(Duration::from_millis(100)) {
                    Ok(Some(request)) => {
                        let _ = paths_tx.send(request.url().to_string());
                        match responses.next() {
                            Some(response) => {
                                let _ = request.respond(response);
                            }
                            None => {
                                let _ = request
                                    .respond(tiny_http::Response::from_string("").with_status_code(500));
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(_) => break,
                }
            }
        });

        (base, paths_rx, stop_tx)
    }

    fn text_response(status: u16, body: &str) -> tiny_http::Response<io::Cursor<Vec<u8>>> {
        tiny_http::Response::from_string(body).with_status_code(status)
    }

    fn redirect_response(location: Option<&str>) -> tiny_http::Response<io::Cursor<Vec<u8>>> {
        let mut response = tiny_http::Response::from_string("").with_status_code(302);
        if let Some(location) = location {
            response = response.with_header(
                tiny_http::Header::from_bytes(&b"Location"[..], location.as_bytes()).unwrap(),
            );
        }
        response
    }

    #[tokio::test]
    async fn test_fetch_text_ok() {
        let (base, _paths, stop) =
            start_scripted_server(vec![text_response(200, "1.2.3")]);

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        let text = fetcher.fetch_text(&base).await.unwrap();
        assert_eq!(text, "1.2.3");

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_fetch_follows_absolute_redirect() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let base = format!("http://127.0.0.1:{port}");
        let target = format!("{base}/target");

        thread::spawn(move || {
            // First request: redirect to /target. Second: serve the body.
            for _ in 0..2 {
                let Ok(request) = server.recv() else { return };
                if request.url() == "/target" {
                    let _ = request.respond(tiny_http::Response::from_string("bundle-bytes"));
                } else {
                    let response = tiny_http::Response::from_string("")
                        .with_status_code(302)
                        .with_header(
                            tiny_http::Header::from_bytes(&b"Location"[..], target.as_bytes())
                                .unwrap(),
                        );
                    let _ = request.respond(response);
                }
            }
        });

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        let text = fetcher.fetch_text(&format!("{base}/start")).await.unwrap();
        assert_eq!(text, "bundle-bytes");
    }

    #[tokio::test]
    async fn test_redirect_without_location_fails() {
        let (base, _paths, stop) = start_scripted_server(vec![redirect_response(None)]);

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        let err = fetcher.fetch_text(&base).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingLocation { code: 302 }));

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_unexpected_status_is_fatal() {
        let (base, _paths, stop) =
            start_scripted_server(vec![text_response(404, "not found")]);

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        let err = fetcher.fetch_text(&base).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { code: 404 }));

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_forbidden_proceeds_to_consumer() {
        let (base, _paths, stop) =
            start_scripted_server(vec![text_response(403, "restricted body")]);

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        let text = fetcher.fetch_text(&base).await.unwrap();
        assert_eq!(text, "restricted body");

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_fetch_to_file_streams_body() {
        let (base, _paths, stop) =
            start_scripted_server(vec![text_response(200, "file contents")]);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.download");

        let fetcher = ResourceFetcher::new(&ProxyConfig::default()).unwrap();
        fetcher.fetch_to_file(&base, &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "file contents");
        let _ = stop.send(());
    }
}
