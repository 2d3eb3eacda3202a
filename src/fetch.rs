use reqwest::header::CONTENT_TYPE;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; OdepaBoletines/0.1)";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} returned an HTML page ({content_type}) instead of a file; is it shared publicly?")]
    HtmlResponse { url: String, content_type: String },
}

/// Anything that can turn a URL into bytes
pub trait Fetch {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, FetchError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    /// GET a page as text. HTML is accepted here, unlike [`Fetch::fetch_bytes`].
    pub fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.get(url)?.text().map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })
    }
}

impl Fetch for HttpFetcher {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url)?;

        // Drive serves a login or quota page instead of the file when sharing is off
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if content_type.contains("html") {
            return Err(FetchError::HtmlResponse {
                url: url.to_string(),
                content_type,
            });
        }

        let bytes = response.bytes().map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

/// Extract a Google Drive file id from `?id=<id>` or `/file/d/<id>/...`
pub fn drive_file_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != "google.com" && !host.ends_with(".google.com") {
        return None;
    }

    if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "id") {
        if !id.is_empty() {
            return Some(id.into_owned());
        }
    }

    let mut segments = parsed.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "d" {
            return segments
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }
    }
    None
}

/// Rewrite Drive links to the download endpoint that skips the confirmation page.
/// Other URLs are returned unchanged.
pub fn direct_download_url(url: &str, drive_base: &str) -> String {
    match drive_file_id(url) {
        Some(id) => format!("{}?export=download&id={}&confirm=t", drive_base, id),
        None => url.to_string(),
    }
}

/// On-disk memoization in front of [`HttpFetcher`]. Entries older than `ttl`
/// are fetched again; cache I/O failures fall through to the network.
pub struct CachedFetcher {
    fetcher: HttpFetcher,
    cache_dir: PathBuf,
    ttl: Duration,
}

impl CachedFetcher {
    pub fn new(fetcher: HttpFetcher, cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            fetcher,
            cache_dir: cache_dir.into(),
            ttl,
        }
    }

    fn url_to_cache_path(&self, url: &str) -> PathBuf {
        let stripped = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        // Drive files differ only by query string, so it stays in the key
        let key: String = stripped
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.cache_dir.join(key)
    }

    fn read_fresh(&self, path: &PathBuf) -> Option<Vec<u8>> {
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            return None;
        }
        fs::read(path).ok()
    }
}

impl Fetch for CachedFetcher {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let cache_path = self.url_to_cache_path(url);

        if let Some(bytes) = self.read_fresh(&cache_path) {
            debug!(url, path = %cache_path.display(), "cache hit");
            return Ok(bytes);
        }

        let bytes = self.fetcher.fetch_bytes(url)?;

        let written = fs::create_dir_all(&self.cache_dir).and_then(|_| fs::write(&cache_path, &bytes));
        if let Err(e) = written {
            warn!(path = %cache_path.display(), error = %e, "could not write cache entry");
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_html_response_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/boletin.xlsx");
            then.status(200)
                .header("Content-Type", "text/html; charset=utf-8")
                .body("<html><body>Sign in</body></html>");
        });

        let err = fetcher()
            .fetch_bytes(&server.url("/boletin.xlsx"))
            .unwrap_err();
        assert!(matches!(err, FetchError::HtmlResponse { .. }));
    }

    #[test]
    fn test_binary_response_is_returned() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/boletin.xlsx");
            then.status(200)
                .header(
                    "Content-Type",
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                )
                .body([0x50u8, 0x4b, 0x03, 0x04]);
        });

        let bytes = fetcher().fetch_bytes(&server.url("/boletin.xlsx")).unwrap();
        assert_eq!(bytes, vec![0x50, 0x4b, 0x03, 0x04]);
    }

    #[test]
    fn test_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let err = fetcher().fetch_bytes(&server.url("/missing")).unwrap_err();
        match err {
            FetchError::Status { status, .. } => assert_eq!(status.as_u16(), 404),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_drive_file_id() {
        assert_eq!(
            drive_file_id("https://drive.google.com/uc?export=download&id=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            drive_file_id("https://drive.google.com/file/d/xyz789/view?usp=sharing"),
            Some("xyz789".to_string())
        );
        assert_eq!(drive_file_id("https://example.com/file?id=abc123"), None);
        assert_eq!(drive_file_id("https://notgoogle.com/file/d/xyz789/view"), None);
        assert_eq!(
            drive_file_id("https://google.com/uc?id=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(drive_file_id("not a url"), None);
    }

    #[test]
    fn test_direct_download_url() {
        assert_eq!(
            direct_download_url(
                "https://drive.google.com/file/d/xyz789/view",
                "https://drive.google.com/uc"
            ),
            "https://drive.google.com/uc?export=download&id=xyz789&confirm=t"
        );
        assert_eq!(
            direct_download_url("http://127.0.0.1:8080/b1.xlsx", "https://drive.google.com/uc"),
            "http://127.0.0.1:8080/b1.xlsx"
        );
    }

    #[test]
    fn test_cache_serves_fresh_entries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/indice.json");
            then.status(200)
                .header("Content-Type", "application/json")
                .body("[]");
        });

        let dir = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(fetcher(), dir.path(), Duration::from_secs(3600));
        let url = server.url("/indice.json");

        assert_eq!(cached.fetch_bytes(&url).unwrap(), b"[]");
        assert_eq!(cached.fetch_bytes(&url).unwrap(), b"[]");
        mock.assert_calls(1);
    }

    #[test]
    fn test_cache_expires_entries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/indice.json");
            then.status(200)
                .header("Content-Type", "application/json")
                .body("[]");
        });

        let dir = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(fetcher(), dir.path(), Duration::ZERO);
        let url = server.url("/indice.json");

        cached.fetch_bytes(&url).unwrap();
        cached.fetch_bytes(&url).unwrap();
        mock.assert_calls(2);
    }

    #[test]
    fn test_cache_keys_keep_query() {
        let cached = CachedFetcher::new(fetcher(), "cache", Duration::ZERO);
        let a = cached.url_to_cache_path("https://drive.google.com/uc?id=a");
        let b = cached.url_to_cache_path("https://drive.google.com/uc?id=b");
        assert_ne!(a, b);
    }
}
