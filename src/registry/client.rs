//! Transfer client: push and pull images between the local store and a
//! remote registry or directory

use super::remote::RemoteAddress;
use super::scp::ScpTransport;
use super::server::{ErrorResponse, DIGEST_HEADER};
use super::spool::ArchiveSpool;
use crate::config::TransferConfig;
use crate::error::{RamaError, Result};
use crate::image::ImageStore;
use crate::storage::{validate_name, KeyLock};
use futures::StreamExt;
use reqwest::StatusCode;
use std::fs;
use std::io::BufReader;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Outcome of a push or pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub image: String,
    pub remote: String,
    /// Archive digest, for HTTP transfers
    pub digest: Option<String>,
}

/// Push/pull client
pub struct TransferClient {
    store: Arc<ImageStore>,
    config: TransferConfig,
    http: reqwest::Client,
    scp: ScpTransport,
}

impl TransferClient {
    /// Create a new transfer client
    pub fn new(store: Arc<ImageStore>, config: TransferConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RamaError::Transfer(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            scp: ScpTransport::new(&config),
            store,
            config,
            http,
        })
    }

    fn overwrite(&self, requested: bool) -> bool {
        requested || self.config.overwrite
    }

    /// Send a local image to `remote`
    pub async fn push(&self, image: &str, remote: &RemoteAddress, overwrite: bool) -> Result<TransferReport> {
        validate_name(image)?;
        let overwrite = self.overwrite(overwrite);
        let local = self.store.path_for(image)?;

        let digest = match remote {
            RemoteAddress::Http { base_url } => {
                Some(self.push_http(image, base_url, overwrite).await?)
            }
            RemoteAddress::Scp { host, path } => {
                let _lock = self.read_lock(image).await?;
                self.scp.push(&local, host, path, image, overwrite).await?;
                None
            }
        };

        info!(image, remote = %remote, "image pushed");
        Ok(TransferReport {
            image: image.to_string(),
            remote: remote.to_string(),
            digest,
        })
    }

    /// Fetch `image` from `remote` into the local store
    pub async fn pull(&self, image: &str, remote: &RemoteAddress, overwrite: bool) -> Result<TransferReport> {
        validate_name(image)?;
        let overwrite = self.overwrite(overwrite);
        if !overwrite && self.store.exists(image)? {
            return Err(RamaError::ImageExists(image.to_string()));
        }

        let digest = match remote {
            RemoteAddress::Http { base_url } => {
                Some(self.pull_http(image, base_url, overwrite).await?)
            }
            RemoteAddress::Scp { host, path } => {
                let staged = self.store.stage(image)?;
                // scp creates the destination itself
                fs::remove_dir(staged.path())?;
                self.scp.pull(host, path, image, staged.path()).await?;

                let store = Arc::clone(&self.store);
                blocking(move || store.publish(staged, overwrite)).await?;
                None
            }
        };

        info!(image, remote = %remote, "image pulled");
        Ok(TransferReport {
            image: image.to_string(),
            remote: remote.to_string(),
            digest,
        })
    }

    async fn read_lock(&self, image: &str) -> Result<KeyLock> {
        let store = Arc::clone(&self.store);
        let image = image.to_string();
        blocking(move || store.read_lock(&image)).await
    }

    async fn push_http(&self, image: &str, base_url: &str, overwrite: bool) -> Result<String> {
        let store = Arc::clone(&self.store);
        let name = image.to_string();
        let archive = blocking(move || store.archive(&name)).await?;
        debug!(image, size = archive.size, digest = %archive.digest, "uploading archive");
        let body = reqwest::Body::wrap_stream(ReaderStream::new(tokio::fs::File::from_std(
            archive.file,
        )));

        let response = self
            .http
            .put(image_url(base_url, image))
            .query(&[("overwrite", overwrite)])
            .header(DIGEST_HEADER, archive.digest.as_str())
            .header(reqwest::header::CONTENT_LENGTH, archive.size)
            .body(body)
            .send()
            .await
            .map_err(|e| RamaError::Transfer(format!("Push to {} failed: {}", base_url, e)))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(archive.digest),
            StatusCode::CONFLICT => Err(RamaError::ImageExists(image.to_string())),
            StatusCode::METHOD_NOT_ALLOWED => Err(RamaError::Transfer(format!(
                "{} does not accept pushes",
                base_url
            ))),
            status => Err(RamaError::Transfer(format!(
                "Push to {} failed with {}: {}",
                base_url,
                status,
                error_message(response).await
            ))),
        }
    }

    async fn pull_http(&self, image: &str, base_url: &str, overwrite: bool) -> Result<String> {
        let response = self
            .http
            .get(image_url(base_url, image))
            .send()
            .await
            .map_err(|e| RamaError::Transfer(format!("Pull from {} failed: {}", base_url, e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(RamaError::ImageNotFound(image.to_string())),
            status => {
                return Err(RamaError::Transfer(format!(
                    "Pull from {} failed with {}: {}",
                    base_url,
                    status,
                    error_message(response).await
                )))
            }
        }

        let expected = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut spool = ArchiveSpool::create(&self.store.scratch_path())?;
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk
                .map_err(|e| RamaError::Transfer(format!("Pull from {} failed: {}", base_url, e)))?;
            spool.write(&chunk).await?;
        }
        debug!(image, size = spool.size(), "archive received");
        let (file, digest) = spool.finish().await?;

        if let Some(expected) = expected {
            if expected != digest {
                return Err(RamaError::Transfer(format!(
                    "Digest mismatch for {}: expected {}, received {}",
                    image, expected, digest
                )));
            }
        }

        let store = Arc::clone(&self.store);
        let name = image.to_string();
        blocking(move || store.put_archive(&name, BufReader::new(file), overwrite)).await?;
        Ok(digest)
    }
}

fn image_url(base_url: &str, image: &str) -> String {
    format!("{}/v2/images/{}", base_url.trim_end_matches('/'), image)
}

async fn error_message(response: reqwest::Response) -> String {
    match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => "no details".to_string(),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RamaError::Transfer(format!("Transfer task failed: {}", e)))?
}
