//! Download phase: fetch a URL, following redirects up to a hop limit, and
//! stream the body into a temporary file.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::temp::TempFile;
use crate::traits::{FetchResponse, FetchTransport};

/// Why a download did not produce a file.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source:#}")]
    Transport {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("redirect from {url} has no Location header")]
    MissingLocation { url: String },
    #[error("redirect from {url} points to invalid location `{location}`")]
    InvalidLocation { url: String, location: String },
    #[error("more than {limit} redirects starting at {url}")]
    TooManyRedirects { url: String, limit: u32 },
    #[error("reading body of {url} failed: {source:#}")]
    Body {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("writing {} failed: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves a `Location` header against the URL that returned it.
fn resolve_location(current: &str, location: &str) -> Option<String> {
    Url::parse(current)
        .and_then(|base| base.join(location))
        .ok()
        .map(String::from)
}

/// Downloads `url` into `dest`, returning the number of bytes written.
///
/// Statuses 200 through 302 succeed; 301 and 302 are redirects and are
/// followed through `Location`, at most `max_redirects` times.
///
/// # Errors
///
/// Returns [`FetchError`] on any transport error, a status outside the
/// success band, a malformed redirect, or a failed write.
pub async fn fetch_to_file(
    transport: &dyn FetchTransport,
    url: &str,
    max_redirects: u32,
    dest: &TempFile,
) -> Result<u64, FetchError> {
    let mut current = url.to_string();
    let mut hops = 0;

    let response = loop {
        let response = transport
            .get(&current)
            .await
            .map_err(|source| FetchError::Transport {
                url: current.clone(),
                source,
            })?;

        match response.status {
            301 | 302 => {
                let location = response
                    .location
                    .ok_or_else(|| FetchError::MissingLocation {
                        url: current.clone(),
                    })?;
                let next = resolve_location(&current, &location).ok_or_else(|| {
                    FetchError::InvalidLocation {
                        url: current.clone(),
                        location: location.clone(),
                    }
                })?;
                if hops == max_redirects {
                    return Err(FetchError::TooManyRedirects {
                        url: url.to_string(),
                        limit: max_redirects,
                    });
                }
                hops += 1;
                debug!(from = %current, to = %next, hop = hops, "following redirect");
                current = next;
            }
            200..=302 => break response,
            status => {
                return Err(FetchError::Status {
                    url: current,
                    status,
                })
            }
        }
    };

    write_body(response, &current, dest).await
}

async fn write_body(response: FetchResponse, url: &str, dest: &TempFile) -> Result<u64, FetchError> {
    let io_err = |source| FetchError::Io {
        path: dest.path().to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(dest.path()).await.map_err(io_err)?;
    let mut body = response.body;
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// [`FetchTransport`] over `reqwest`, with automatic redirects disabled so
/// the hop limit above is the only redirect handling.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchTransport for HttpFetcher {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from));
        Ok(FetchResponse {
            status,
            location,
            body: Box::pin(body),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;

    /// Scripted transport: each URL maps to a fixed status, location, and body.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        routes: HashMap<String, (u16, Option<String>, Vec<u8>)>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn ok(mut self, url: &str, body: &[u8]) -> Self {
            self.routes.insert(url.into(), (200, None, body.to_vec()));
            self
        }

        pub(crate) fn status(mut self, url: &str, status: u16) -> Self {
            self.routes.insert(url.into(), (status, None, b"error page".to_vec()));
            self
        }

        pub(crate) fn redirect(mut self, url: &str, status: u16, location: Option<&str>) -> Self {
            self.routes.insert(
                url.into(),
                (status, location.map(str::to_string), b"redirect body".to_vec()),
            );
            self
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl FetchTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> anyhow::Result<FetchResponse> {
            self.requested.lock().push(url.to_string());
            let (status, location, body) = self
                .routes
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))?;
            let stream = futures_util::stream::iter(vec![Ok::<_, anyhow::Error>(Bytes::from(body))]);
            Ok(FetchResponse {
                status,
                location,
                body: Box::pin(stream),
            })
        }
    }

    async fn fetch(
        transport: &ScriptedTransport,
        url: &str,
        max_redirects: u32,
    ) -> (Result<u64, FetchError>, Option<Vec<u8>>) {
        let dir = tempfile::tempdir().unwrap();
        let dest = TempFile::new(dir.path(), "out");
        let result = fetch_to_file(transport, url, max_redirects, &dest).await;
        let content = std::fs::read(dest.path()).ok();
        (result, content)
    }

    #[tokio::test]
    async fn ok_response_is_written() {
        let t = ScriptedTransport::default().ok("http://a/x.png", b"PNG");
        let (result, content) = fetch(&t, "http://a/x.png", 10).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(content.as_deref(), Some(&b"PNG"[..]));
    }

    #[tokio::test]
    async fn redirect_is_followed_not_stored() {
        let t = ScriptedTransport::default()
            .redirect("http://old/x.png", 302, Some("https://cdn.example/x.png"))
            .ok("https://cdn.example/x.png", b"real");
        let (result, content) = fetch(&t, "http://old/x.png", 10).await;
        assert!(result.is_ok());
        assert_eq!(content.as_deref(), Some(&b"real"[..]));
        assert_eq!(t.requests(), ["http://old/x.png", "https://cdn.example/x.png"]);
    }

    #[tokio::test]
    async fn relative_redirect_resolves_against_current_url() {
        let t = ScriptedTransport::default()
            .redirect("http://old/a/x.png", 301, Some("/b/x.png"))
            .ok("http://old/b/x.png", b"moved");
        let (result, _) = fetch(&t, "http://old/a/x.png", 10).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn redirect_without_location_fails() {
        let t = ScriptedTransport::default().redirect("http://old/x.png", 301, None);
        let (result, _) = fetch(&t, "http://old/x.png", 10).await;
        assert!(matches!(result, Err(FetchError::MissingLocation { .. })));
    }

    #[tokio::test]
    async fn redirect_loop_fails_closed() {
        let t = ScriptedTransport::default()
            .redirect("http://a/1", 302, Some("http://a/2"))
            .redirect("http://a/2", 302, Some("http://a/1"));
        let (result, content) = fetch(&t, "http://a/1", 3).await;
        assert!(matches!(result, Err(FetchError::TooManyRedirects { limit: 3, .. })));
        assert!(content.is_none());
        assert_eq!(t.requests().len(), 4);
    }

    #[tokio::test]
    async fn zero_hop_limit_rejects_any_redirect() {
        let t = ScriptedTransport::default()
            .redirect("http://a/1", 301, Some("http://a/2"))
            .ok("http://a/2", b"x");
        let (result, _) = fetch(&t, "http://a/1", 0).await;
        assert!(matches!(result, Err(FetchError::TooManyRedirects { .. })));
    }

    #[tokio::test]
    async fn status_outside_band_fails() {
        for status in [303, 304, 404, 500] {
            let t = ScriptedTransport::default().status("http://a/x", status);
            let (result, content) = fetch(&t, "http://a/x", 10).await;
            assert!(
                matches!(result, Err(FetchError::Status { status: s, .. }) if s == status),
                "status {status}"
            );
            assert!(content.is_none());
        }
    }

    #[tokio::test]
    async fn transport_error_fails() {
        let t = ScriptedTransport::default();
        let (result, _) = fetch(&t, "http://unreachable/x", 10).await;
        assert!(matches!(result, Err(FetchError::Transport { .. })));
    }

    #[test]
    fn resolve_location_handles_absolute_and_relative() {
        assert_eq!(
            resolve_location("http://a/x/y", "https://b/z").as_deref(),
            Some("https://b/z")
        );
        assert_eq!(resolve_location("http://a/x/y", "z").as_deref(), Some("http://a/x/z"));
        assert_eq!(resolve_location("not a url", "z"), None);
    }
}
