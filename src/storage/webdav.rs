//! WebDAV remote store
//!
//! Implements [`RemoteStore`] with three requests: `PROPFIND` (depth 0) for
//! existence checks, `PROPFIND` (depth 1) for directory listings and `GET`
//! for reading documents. Multistatus replies are scanned with a small set
//! of namespace-agnostic patterns rather than a full XML parser; only
//! `href`, `resourcetype`, `getlastmodified` and `getcontentlength` are read.

use super::types::{RemoteCredentials, RemoteEntry, RemoteEntryKind};
use super::{RemoteConnector, RemoteStore};
use crate::error::{Result, SessyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getlastmodified/>
    <d:getcontentlength/>
  </d:prop>
</d:propfind>"#;

/// Default request timeout for remote calls
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one WebDAV endpoint
#[derive(Debug, Clone)]
pub struct WebDavClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl WebDavClient {
    /// Create a client for `credentials.url`
    ///
    /// # Errors
    ///
    /// Returns `SessyncError::BackendUnavailable` if the URL is empty or does
    /// not parse, or if the HTTP client cannot be built.
    pub fn new(credentials: &RemoteCredentials, timeout: Duration) -> Result<Self> {
        let base_url = credentials.url.trim();
        if base_url.is_empty() {
            return Err(SessyncError::BackendUnavailable("remote URL is empty".into()).into());
        }
        url::Url::parse(base_url).map_err(|e| {
            SessyncError::BackendUnavailable(format!("invalid remote URL {}: {}", base_url, e))
        })?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessyncError::BackendUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let joined = encoded.join("/");
        if joined.starts_with('/') {
            format!("{}{}", self.base_url, joined)
        } else {
            format!("{}/{}", self.base_url, joined)
        }
    }

    /// Decoded path of `path` on the server, base URL path included
    fn server_path(&self, path: &str) -> String {
        href_path(&self.url_for(path))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url_for(path));
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }

    fn propfind(&self, path: &str, depth: &str) -> Result<RequestBuilder> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| SessyncError::Storage(format!("PROPFIND method: {}", e)))?;
        Ok(self
            .request(method, path)
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY))
    }
}

#[async_trait]
impl RemoteStore for WebDavClient {
    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self.propfind(path, "0")?.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if status.is_success() {
            return Ok(true);
        }
        Err(SessyncError::Remote {
            status: status.as_u16(),
            message: format!("PROPFIND {}", path),
        }
        .into())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let response = self.propfind(path, "1")?.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessyncError::Remote {
                status: status.as_u16(),
                message: format!("PROPFIND {}", path),
            }
            .into());
        }
        let body = response.text().await?;
        Ok(parse_multistatus(&body, &self.server_path(path)))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let response = self.request(Method::GET, path).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessyncError::Remote {
                status: status.as_u16(),
                message: format!("GET {}", path),
            }
            .into());
        }
        Ok(response.text().await?)
    }
}

/// Builds [`WebDavClient`]s
#[derive(Debug, Clone)]
pub struct WebDavConnector {
    timeout: Duration,
}

impl WebDavConnector {
    /// Create a connector whose clients use `timeout` per request
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WebDavConnector {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_TIMEOUT)
    }
}

impl RemoteConnector for WebDavConnector {
    fn connect(&self, credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteStore>> {
        Ok(Arc::new(WebDavClient::new(credentials, self.timeout)?))
    }
}

fn tag_pattern(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?is)<(?:[a-z0-9_-]+:)?{name}\b[^>]*>(.*?)</(?:[a-z0-9_-]+:)?{name}\s*>"
    ))
    .expect("static tag pattern")
}

fn response_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_pattern("response"))
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_pattern("href"))
}

fn lastmod_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_pattern("getlastmodified"))
}

fn length_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_pattern("getcontentlength"))
}

fn collection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(?:[a-z0-9_-]+:)?collection\b").expect("static pattern"))
}

fn capture<'a>(re: &Regex, haystack: &'a str) -> Option<&'a str> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Decoded path component of an href, which may be a full URL
fn href_path(href: &str) -> String {
    let path = match url::Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    urlencoding::decode(&path)
        .map(|s| s.into_owned())
        .unwrap_or(path)
}

/// Parse a `207 Multi-Status` body into the children of `collection_path`
///
/// `collection_path` is the full server path of the listed directory. The
/// entry whose href resolves to that same path is dropped.
pub fn parse_multistatus(body: &str, collection_path: &str) -> Vec<RemoteEntry> {
    let requested = href_path(collection_path);
    let requested = requested.trim_end_matches('/');
    let mut entries = Vec::new();

    for block in response_re().captures_iter(body) {
        let block = match block.get(1) {
            Some(m) => m.as_str(),
            None => continue,
        };
        let href = match capture(href_re(), block) {
            Some(href) => href_path(href),
            None => continue,
        };

        let kind = if collection_re().is_match(block) {
            RemoteEntryKind::Directory
        } else {
            RemoteEntryKind::File
        };

        let trimmed = href.trim_end_matches('/');
        if kind == RemoteEntryKind::Directory && trimmed == requested {
            continue;
        }

        let basename = trimmed.rsplit('/').next().unwrap_or_default().to_string();
        if basename.is_empty() {
            continue;
        }

        let lastmod = capture(lastmod_re(), block)
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        let size = capture(length_re(), block)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);

        entries.push(RemoteEntry {
            kind,
            basename,
            lastmod,
            size,
        });
    }

    entries
}
