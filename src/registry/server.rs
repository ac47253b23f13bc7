//! Image registry server
//!
//! Serves the local image store over HTTP:
//!
//! ```text
//! GET  /v2/                  health document
//! GET  /v2/_catalog          {"images": [...]}
//! HEAD /v2/images/:name      200 if present, 404 otherwise
//! GET  /v2/images/:name      tar.gz archive, digest in X-Rama-Digest
//! PUT  /v2/images/:name      upload (only with accept_push)
//! ```
//!
//! Store access runs on the blocking pool; handlers only share the store
//! read-only apart from opt-in uploads, which publish atomically. Archives
//! are streamed from and to temporary files, never buffered whole.

use super::spool::ArchiveSpool;
use crate::config::RegistryConfig;
use crate::error::{RamaError, Result};
use crate::image::ImageStore;
use crate::storage::validate_name;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

/// Name reported by the health endpoint
pub const API_NAME: &str = "rama-registry";
/// Header carrying the archive digest
pub const DIGEST_HEADER: &str = "x-rama-digest";
/// Content type of image archives
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// Health document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub name: String,
    pub version: String,
}

/// Catalog listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogResponse {
    pub images: Vec<String>,
}

/// Successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub name: String,
    pub digest: String,
}

/// Error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
struct PushParams {
    #[serde(default)]
    overwrite: bool,
}

#[derive(Clone)]
struct AppState {
    store: Arc<ImageStore>,
    accept_push: bool,
    max_upload: Option<u64>,
}

/// Error returned by handlers
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RamaError> for ApiError {
    fn from(err: RamaError) -> Self {
        let status = match &err {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            RamaError::ImageExists(_) => StatusCode::CONFLICT,
            RamaError::InvalidName(_) | RamaError::Transfer(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "registry request failed");
        } else {
            debug!(status = %self.status, error = %self.message, "registry request rejected");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Run store work on the blocking pool
async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        name: API_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn catalog(State(state): State<AppState>) -> std::result::Result<Json<CatalogResponse>, ApiError> {
    let images = blocking(move || state.store.list()).await?;
    Ok(Json(CatalogResponse { images }))
}

async fn head_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    let exists = blocking(move || state.store.exists(&name)).await?;
    Ok(if exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn get_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let archive = blocking(move || state.store.archive(&name)).await?;
    let digest = HeaderValue::from_str(&archive.digest)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(archive.file)));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(ARCHIVE_CONTENT_TYPE)),
            (header::CONTENT_LENGTH, HeaderValue::from(archive.size)),
            (header::HeaderName::from_static(DIGEST_HEADER), digest),
        ],
        body,
    )
        .into_response())
}

async fn put_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PushParams>,
    headers: HeaderMap,
    body: Body,
) -> std::result::Result<(StatusCode, Json<PushResponse>), ApiError> {
    if !state.accept_push {
        return Err(ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "this registry does not accept pushes",
        ));
    }
    validate_name(&name)?;

    if !params.overwrite {
        let store = Arc::clone(&state.store);
        let image = name.clone();
        if blocking(move || store.exists(&image)).await? {
            return Err(RamaError::ImageExists(name).into());
        }
    }

    let mut spool = ArchiveSpool::create(&state.store.scratch_path()).map_err(RamaError::from)?;
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("upload interrupted: {}", e))
        })?;
        if let Some(limit) = state.max_upload {
            if spool.size() + chunk.len() as u64 > limit {
                return Err(ApiError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("upload exceeds {} bytes", limit),
                ));
            }
        }
        spool.write(&chunk).await.map_err(RamaError::from)?;
    }
    let (file, digest) = spool.finish().await.map_err(RamaError::from)?;

    if let Some(expected) = headers.get(DIGEST_HEADER) {
        let expected = expected
            .to_str()
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "malformed digest header"))?;
        if expected != digest {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("digest mismatch: expected {}, received {}", expected, digest),
            ));
        }
    }

    let store = Arc::clone(&state.store);
    let image = name.clone();
    blocking(move || store.put_archive(&image, BufReader::new(file), params.overwrite)).await?;
    info!(image = %name, %digest, "image pushed");

    Ok((StatusCode::CREATED, Json(PushResponse { name, digest })))
}

/// HTTP front end of an image store
pub struct RegistryServer {
    config: RegistryConfig,
    store: Arc<ImageStore>,
}

impl RegistryServer {
    /// Create a new registry server
    pub fn new(config: RegistryConfig, store: Arc<ImageStore>) -> Self {
        Self { config, store }
    }

    /// Routes of the registry API
    pub fn router(&self) -> Router {
        let state = AppState {
            store: Arc::clone(&self.store),
            accept_push: self.config.accept_push,
            max_upload: self.config.max_upload_bytes(),
        };

        Router::new()
            .route("/v2/", get(health))
            .route("/v2/_catalog", get(catalog))
            .route(
                "/v2/images/:name",
                get(get_image).head(head_image).put(put_image),
            )
            .with_state(state)
    }

    /// Bind the listener and serve in the background. Failing to bind is
    /// fatal and reported immediately.
    pub async fn start(self) -> Result<RegistryHandle> {
        let listener = TcpListener::bind(&self.config.bind).await.map_err(|e| {
            RamaError::Io(io::Error::new(
                e.kind(),
                format!("cannot bind registry to {}: {}", self.config.bind, e),
            ))
        })?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(
            addr = %local_addr,
            accept_push = self.config.accept_push,
            "registry listening"
        );
        Ok(RegistryHandle {
            local_addr,
            grace: self.config.shutdown_grace(),
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }
}

/// Start serving `store` as configured
pub async fn start(config: &RegistryConfig, store: Arc<ImageStore>) -> Result<RegistryHandle> {
    RegistryServer::new(config.clone(), store).start().await
}

/// A running registry
pub struct RegistryHandle {
    local_addr: SocketAddr,
    grace: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl RegistryHandle {
    /// Address the registry is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL of the registry
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections, let in-flight requests finish within the
    /// grace period, then abort the rest. The port is free on return.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(self.grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => {
                info!("registry stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(e)) => Err(RamaError::Io(io::Error::other(e))),
            Err(_) => {
                warn!(grace = ?self.grace, "grace period expired, aborting open connections");
                self.task.abort();
                let _ = (&mut self.task).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn local_config(accept_push: bool) -> RegistryConfig {
        RegistryConfig {
            bind: "127.0.0.1:0".to_string(),
            shutdown_grace_secs: 2,
            accept_push,
            ..Default::default()
        }
    }

    fn store_with_site() -> (TempDir, Arc<ImageStore>) {
        let temp = tempdir().unwrap();
        let store = ImageStore::new(temp.path().join("images")).unwrap();
        let site = temp.path().join("site");
        fs::create_dir_all(&site).unwrap();
        fs::write(site.join("index.html"), b"<h1>hi</h1>").unwrap();
        store.put_dir("web", &site, false).unwrap();
        (temp, Arc::new(store))
    }

    #[tokio::test]
    async fn test_health_and_catalog() {
        let (_temp, store) = store_with_site();
        let handle = start(&local_config(false), store).await.unwrap();
        let client = reqwest::Client::new();

        let health: HealthResponse = client
            .get(format!("{}/v2/", handle.url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.name, API_NAME);

        let catalog: CatalogResponse = client
            .get(format!("{}/v2/_catalog", handle.url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(catalog.images, vec!["web"]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_head_and_get() {
        let (_temp, store) = store_with_site();
        let expected = store.archive("web").unwrap();
        let expected_digest = expected.digest.clone();
        let expected_bytes = expected.into_bytes().unwrap();
        let handle = start(&local_config(false), Arc::clone(&store)).await.unwrap();
        let client = reqwest::Client::new();

        let head = client
            .head(format!("{}/v2/images/web", handle.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(head.status(), reqwest::StatusCode::OK);

        let missing = client
            .get(format!("{}/v2/images/ghost", handle.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let body: ErrorResponse = missing.json().await.unwrap();
        assert!(body.error.contains("ghost"));

        let head_missing = client
            .head(format!("{}/v2/images/ghost", handle.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(head_missing.status(), reqwest::StatusCode::NOT_FOUND);

        let response = client
            .get(format!("{}/v2/images/web", handle.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers().get(DIGEST_HEADER).unwrap().to_str().unwrap(),
            expected_digest
        );
        assert_eq!(response.content_length(), Some(expected_bytes.len() as u64));
        let bytes = response.bytes().await.unwrap();
        assert_eq!(bytes.as_ref(), expected_bytes.as_slice());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_disabled_by_default() {
        let (_temp, store) = store_with_site();
        let archive = store.archive("web").unwrap().into_bytes().unwrap();
        let handle = start(&local_config(false), Arc::clone(&store)).await.unwrap();

        let response = reqwest::Client::new()
            .put(format!("{}/v2/images/copy", handle.url()))
            .body(archive)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
        assert!(!store.exists("copy").unwrap());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_when_enabled() {
        let (_temp, store) = store_with_site();
        let packed = store.archive("web").unwrap();
        let digest = packed.digest.clone();
        let archive = packed.into_bytes().unwrap();
        let handle = start(&local_config(true), Arc::clone(&store)).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/v2/images/copy", handle.url());

        let created = client
            .put(&url)
            .header(DIGEST_HEADER, digest.as_str())
            .body(archive.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), reqwest::StatusCode::CREATED);
        assert_eq!(store.archive("copy").unwrap().digest, digest);

        let conflict = client.put(&url).body(archive.clone()).send().await.unwrap();
        assert_eq!(conflict.status(), reqwest::StatusCode::CONFLICT);

        let replaced = client
            .put(format!("{}?overwrite=true", url))
            .body(archive.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(replaced.status(), reqwest::StatusCode::CREATED);

        let mismatch = client
            .put(format!("{}/v2/images/other", handle.url()))
            .header(DIGEST_HEADER, "sha256:0000")
            .body(archive.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(mismatch.status(), reqwest::StatusCode::BAD_REQUEST);

        let corrupt = client
            .put(format!("{}/v2/images/broken", handle.url()))
            .body(archive[..archive.len() / 2].to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(corrupt.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(!store.exists("broken").unwrap());
        assert!(!store.exists("other").unwrap());
        assert_eq!(fs::read_dir(store.scratch_path()).unwrap().count(), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let (_temp, store) = store_with_site();
        let config = RegistryConfig {
            max_upload_mib: 1,
            ..local_config(true)
        };
        let handle = start(&config, Arc::clone(&store)).await.unwrap();

        let oversized: Vec<u8> = (0..(2 * 1024 * 1024)).map(|i| (i % 251) as u8).collect();
        let result = reqwest::Client::new()
            .put(format!("{}/v2/images/huge", handle.url()))
            .body(oversized)
            .send()
            .await;
        // The server may answer before reading the whole body and close the
        // connection under the client
        if let Ok(response) = result {
            assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
        }
        assert!(!store.exists("huge").unwrap());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let (_temp, store) = store_with_site();
        let handle = start(&local_config(false), Arc::clone(&store)).await.unwrap();
        let addr = handle.local_addr();
        handle.shutdown().await.unwrap();

        let config = RegistryConfig {
            bind: addr.to_string(),
            ..local_config(false)
        };
        let again = start(&config, store).await.unwrap();
        assert_eq!(again.local_addr(), addr);
        again.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (_temp, store) = store_with_site();
        let first = start(&local_config(false), Arc::clone(&store)).await.unwrap();
        let config = RegistryConfig {
            bind: first.local_addr().to_string(),
            ..local_config(false)
        };

        assert!(start(&config, store).await.is_err());
        first.shutdown().await.unwrap();
    }
}
