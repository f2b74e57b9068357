//! Download handling for the trusted package host
//!
//! Every request is checked against a [`DownloadPolicy`] before it leaves the
//! process. Package archives, liveries, the livery catalog and the updater
//! executable all go through the same client.

mod http;

pub use http::{download_file, HttpClient};

use reqwest::Url;
use serde::Serialize;
use std::path::PathBuf;

/// Host serving the package, livery archives and catalog
pub const TRUSTED_HOST: &str = "files.zohopublic.com.cn";

/// Download errors that callers may want to match on
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Invalid download URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Download host not allowed: {host} ({url})")]
    DisallowedHost { host: String, url: String },

    #[error("Download URL must use https: {url}")]
    InsecureScheme { url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: reqwest::StatusCode, url: String },

    #[error("Resume of {url} asked for byte {expected} but got Content-Range '{content_range}'")]
    RangeMismatch {
        expected: u64,
        content_range: String,
        url: String,
    },
}

/// Allow-list of hosts downloads may target
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    allowed_hosts: Vec<String>,
    allow_plain_http: bool,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self::new([TRUSTED_HOST])
    }
}

impl DownloadPolicy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_hosts: hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
            allow_plain_http: false,
        }
    }

    /// Permit `http://` URLs (local test servers)
    pub fn allow_plain_http(mut self) -> Self {
        self.allow_plain_http = true;
        self
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// True when `url` may be followed (used for redirects too)
    pub fn permits(&self, url: &Url) -> bool {
        let scheme_ok = match url.scheme() {
            "https" => true,
            "http" => self.allow_plain_http,
            _ => false,
        };
        scheme_ok
            && url
                .host_str()
                .map(|host| self.host_allowed(host))
                .unwrap_or(false)
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| *allowed == host)
    }

    /// Parse `url` and check it against the policy
    pub fn check(&self, url: &str) -> Result<Url, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_plain_http => {}
            "http" => {
                return Err(DownloadError::InsecureScheme {
                    url: url.to_string(),
                })
            }
            other => {
                return Err(DownloadError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        }

        let host = parsed.host_str().ok_or_else(|| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;
        if !self.host_allowed(host) {
            return Err(DownloadError::DisallowedHost {
                host: host.to_string(),
                url: url.to_string(),
            });
        }

        Ok(parsed)
    }
}

/// What a download actually did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    /// Bytes already on disk that the request resumed from
    pub resume_offset: u64,
    /// Total size declared by the server, if any
    pub expected_total: Option<u64>,
}

/// Download result with metadata
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub job: DownloadJob,
    /// Final size of the file on disk
    pub size: u64,
}

/// Truncate URL for display
pub(crate) fn truncate_url(url: &str) -> String {
    if url.chars().count() > 80 {
        let head: String = url.chars().take(77).collect();
        format!("{}...", head)
    } else {
        url.to_string()
    }
}
