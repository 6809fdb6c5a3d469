//! Byte-stream transport and the certificate-challenge hook.
//!
//! Grounded on the teacher's `auto_update::updater::download_file()`
//! (streaming via `bytes_stream()`, enforcing a size cap per chunk and
//! against the declared `Content-Length`, even when the server understates
//! or omits it) and `releases_api::fetch_release()` for the manifest GET.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::pinning::PinningChallenge;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no network connectivity")]
    NoInternet,
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("server returned status {0:?}")]
    ServerError(Option<u16>),
    #[error("invalid URL: {0}")]
    BadUrl(String),
    #[error("declared or actual size ({actual}) exceeds the cap ({cap})")]
    SizeExceeded { actual: u64, cap: u64 },
    #[error("I/O error during transfer: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Other(String),
}

impl NetworkError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetworkError::NoInternet | NetworkError::Timeout | NetworkError::Cancelled | NetworkError::ServerError(_)
        )
    }
}

pub struct RawManifestResponse {
    pub body: Vec<u8>,
}

pub struct DownloadOutcome {
    pub bytes_written: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_manifest(&self, url: &str) -> Result<RawManifestResponse, NetworkError>;

    /// Streams `url` into `dest`, enforcing `max_bytes` against both the
    /// declared `Content-Length` and the actual bytes received (a
    /// misreporting or absent `Content-Length` must not bypass the cap).
    async fn download(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<DownloadOutcome, NetworkError>;

    /// Extracts the leaf certificate's SPKI for a pinning decision. The
    /// default `ReqwestTransport` cannot (rustls-tls hides the chain from
    /// application code without extra plumbing); returns `None` rather than
    /// fabricating bytes, leaving the pinner to treat it as "no certificate".
    fn certificate_challenge(&self, host: &str) -> PinningChallenge<'_> {
        let _ = host;
        PinningChallenge { host: "", leaf_spki_der: None }
    }
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Other(e.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch_manifest(&self, url: &str) -> Result<RawManifestResponse, NetworkError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_err)?;
        if !response.status().is_success() {
            return Err(NetworkError::ServerError(Some(response.status().as_u16())));
        }
        let body = response.bytes().await.map_err(map_reqwest_err)?.to_vec();
        Ok(RawManifestResponse { body })
    }

    async fn download(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<DownloadOutcome, NetworkError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_err)?;
        if !response.status().is_success() {
            return Err(NetworkError::ServerError(Some(response.status().as_u16())));
        }
        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(NetworkError::SizeExceeded { actual: len, cap: max_bytes });
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_err)?;
            total += chunk.len() as u64;
            if total > max_bytes {
                return Err(NetworkError::SizeExceeded { actual: total, cap: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(DownloadOutcome { bytes_written: total })
    }
}

fn map_reqwest_err(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout
    } else if e.is_connect() {
        NetworkError::NoInternet
    } else if let Some(status) = e.status() {
        NetworkError::ServerError(Some(status.as_u16()))
    } else {
        NetworkError::Other(e.to_string())
    }
}
