//! HTTP client with host allow-listing, resume and rate-limited progress

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use super::{truncate_url, DownloadError, DownloadJob, DownloadPolicy, DownloadResult};
use crate::installer::progress::{format_bytes, ProgressSink, RateLimiter};

/// Write buffer between the response stream and the file
const CHUNK_SIZE: usize = 64 * 1024;

/// Minimum wall-clock gap between progress updates
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Overall request timeout for a single HTTP request.
///
/// The aircraft package is well over a gigabyte; a short global timeout
/// fails slow links while data is still flowing.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Maximum redirect hops followed within the allow-list
const MAX_REDIRECTS: usize = 10;

/// HTTP client bound to a download policy
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    policy: DownloadPolicy,
}

impl HttpClient {
    pub fn new(policy: DownloadPolicy) -> Result<Self> {
        let redirect_policy = policy.clone();
        let client = reqwest::Client::builder()
            .user_agent(concat!("ag330/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::custom(move |attempt| {
                if attempt.previous().len() >= MAX_REDIRECTS {
                    attempt.error("too many redirects")
                } else if redirect_policy.permits(attempt.url()) {
                    attempt.follow()
                } else {
                    let url = attempt.url().to_string();
                    let host = attempt.url().host_str().unwrap_or_default().to_string();
                    attempt.error(DownloadError::DisallowedHost { host, url })
                }
            }))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, policy })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn policy(&self) -> &DownloadPolicy {
        &self.policy
    }
}

/// Rolling throughput estimate over the last sample window
struct Throughput {
    last_bytes: u64,
    last_time: Instant,
}

impl Throughput {
    fn new(initial_bytes: u64) -> Self {
        Self {
            last_bytes: initial_bytes,
            last_time: Instant::now(),
        }
    }

    /// Bytes per second since the previous sample
    fn sample(&mut self, total_bytes: u64) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        let delta = total_bytes.saturating_sub(self.last_bytes);
        self.last_bytes = total_bytes;
        self.last_time = now;
        if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Download `url` to `output_path`.
///
/// With `resume` set and a partial file present, requests the remaining
/// bytes with a `Range` header and appends. Progress goes to `sink` at most
/// once per [`PROGRESS_INTERVAL`]. On a mid-stream failure the bytes received
/// so far stay on disk.
pub async fn download_file(
    client: &HttpClient,
    url: &str,
    output_path: &Path,
    resume: bool,
    sink: &ProgressSink,
) -> Result<DownloadResult> {
    let parsed = client.policy().check(url)?;

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut offset = if resume {
        match tokio::fs::metadata(output_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        }
    } else {
        0
    };

    let mut request = client.inner().get(parsed);
    if offset > 0 {
        debug!("Resuming {} from byte {}", output_path.display(), offset);
        request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Connection failed: {}", truncate_url(url)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status,
            url: truncate_url(url),
        }
        .into());
    }

    let append_mode = offset > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
    if append_mode {
        let content_range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if content_range_start(content_range) != Some(offset) {
            return Err(DownloadError::RangeMismatch {
                expected: offset,
                content_range: content_range.to_string(),
                url: truncate_url(url),
            }
            .into());
        }
    }
    if offset > 0 && !append_mode {
        // Server ignored Range header; restart from scratch.
        warn!(
            "Server ignored resume request for {}, restarting from 0",
            truncate_url(url)
        );
        offset = 0;
    }

    let job = DownloadJob {
        url: url.to_string(),
        destination: output_path.to_path_buf(),
        resume_offset: offset,
        expected_total: response.content_length().map(|len| len + offset),
    };

    let file = if append_mode {
        OpenOptions::new()
            .append(true)
            .open(output_path)
            .await
            .with_context(|| format!("Failed to append {}", output_path.display()))?
    } else {
        File::create(output_path)
            .await
            .with_context(|| format!("Failed to create {}", output_path.display()))?
    };
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

    let display_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| output_path.display().to_string());

    if job.expected_total.is_none() {
        sink.indeterminate();
        sink.status(format!("Downloading {}...", display_name));
    }

    let mut downloaded = offset;
    let mut limiter = RateLimiter::new(PROGRESS_INTERVAL);
    let mut throughput = Throughput::new(offset);
    let mut stream = response.bytes_stream();

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                // Keep what arrived so a later run can resume.
                let _ = writer.flush().await;
                return Err(e).with_context(|| {
                    format!(
                        "Failed to read chunk from {} after {} bytes",
                        truncate_url(url),
                        downloaded
                    )
                });
            }
        };
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        downloaded += chunk.len() as u64;

        if let Some(total) = job.expected_total {
            if limiter.ready() {
                let speed = throughput.sample(downloaded);
                report(sink, &display_name, downloaded, total, speed);
            }
        }
    }

    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", output_path.display()))?;

    if let Some(total) = job.expected_total {
        if downloaded != total {
            bail!(
                "Download incomplete for {}: got {} of {} bytes",
                truncate_url(url),
                downloaded,
                total
            );
        }
        let speed = throughput.sample(downloaded);
        report(sink, &display_name, downloaded, total, speed);
    }

    info!(
        "Downloaded {} ({} bytes, resumed from {})",
        output_path.display(),
        downloaded,
        job.resume_offset
    );

    Ok(DownloadResult { job, size: downloaded })
}

/// First byte of a `Content-Range: bytes START-END/TOTAL` value
fn content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

fn report(sink: &ProgressSink, name: &str, downloaded: u64, total: u64, speed: f64) {
    let fraction = if total > 0 {
        downloaded as f64 / total as f64
    } else {
        1.0
    };
    sink.fraction(fraction);
    sink.status(format!(
        "Downloading {}: {} / {} ({}/s)",
        name,
        format_bytes(downloaded),
        format_bytes(total),
        format_bytes(speed as u64)
    ));
}
