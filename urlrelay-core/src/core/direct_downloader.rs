use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::core::events::{StatusMessage, StatusSink};
use crate::core::progress::{render_status, ProgressThrottle};
use crate::error::DownloadError;
use crate::models::settings::TransferSettings;

/// Text responses shorter than this are treated as error pages.
const ERROR_PAGE_MAX_LEN: u64 = 500;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub chunk_size: usize,
    pub timeout: Duration,
    pub progress_interval: Duration,
}

impl From<&TransferSettings> for DownloadOptions {
    fn from(settings: &TransferSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            timeout: settings.process_timeout(),
            progress_interval: settings.progress_interval(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub bytes: u64,
    /// Declared length, 0 when the server did not send one.
    pub total: u64,
    pub chunks: u64,
    pub content_type: String,
    pub elapsed: Duration,
}

/// Streams `url` into `destination` one fixed-size chunk at a time. The
/// whole exchange is bounded by `opts.timeout`; on timeout the partial file
/// is left for the caller to discard.
pub async fn download<S: StatusSink>(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
    status: &mut StatusMessage<S>,
    opts: &DownloadOptions,
) -> Result<FileInfo, DownloadError> {
    let started = Instant::now();
    match tokio::time::timeout(
        opts.timeout,
        download_stream(client, url, destination, status, opts, started),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("[direct] {} exceeded {:?}", url, opts.timeout);
            Err(DownloadError::Timeout(opts.timeout))
        }
    }
}

async fn download_stream<S: StatusSink>(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
    status: &mut StatusMessage<S>,
    opts: &DownloadOptions,
    started: Instant,
) -> Result<FileInfo, DownloadError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    let total = declared_length(response.headers());
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if is_error_page(&content_type, total) {
        tracing::info!(
            "[direct] {} looks like an error page ({}, {} bytes)",
            url,
            content_type,
            total
        );
        return Err(DownloadError::EmptyOrErrorContent {
            content_type,
            length: total,
        });
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::info!("[direct] {} is already being written", destination.display());
            return Err(DownloadError::InProgress(destination.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    let mut buf = vec![0u8; opts.chunk_size.max(1)];
    let mut throttle = ProgressThrottle::new(opts.progress_interval);
    let mut downloaded: u64 = 0;
    let mut chunks: u64 = 0;

    loop {
        let n = read_chunk(&mut reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("write failed (disk full?): {}", e))
        })?;
        downloaded += n as u64;
        chunks += 1;

        let elapsed = started.elapsed();
        let complete = total > 0 && downloaded >= total;
        if throttle.should_emit(elapsed, complete) {
            status
                .update(render_status(url, total, downloaded, elapsed.as_secs_f64()))
                .await;
        }
    }

    file.flush().await?;

    let elapsed = started.elapsed();
    if total == 0 {
        status
            .update(render_status(url, total, downloaded, elapsed.as_secs_f64()))
            .await;
    }

    tracing::info!(
        "[direct] {} -> {} ({} bytes, {} chunks, {:?})",
        url,
        destination.display(),
        downloaded,
        chunks,
        elapsed
    );

    Ok(FileInfo {
        path: destination.to_path_buf(),
        bytes: downloaded,
        total,
        chunks,
        content_type,
        elapsed,
    })
}

fn declared_length(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn is_error_page(content_type: &str, declared_length: u64) -> bool {
    content_type.contains("text") && declared_length < ERROR_PAGE_MAX_LEN
}

/// Fills `buf` unless the stream ends first. Returns 0 only at end of stream.
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
