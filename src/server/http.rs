//! HTTP Server for Chunkyard
//!
//! Thin hyper front end over the upload service and the file catalog.
//!
//! # Architecture
//!
//! The server is built on top of `hyper` and `tokio`:
//! - one tokio task per connection, HTTP/1.1
//! - request bodies are streamed straight into chunk slots
//! - downloads are streamed from disk without buffering whole files
//!
//! # Example
//!
//! ```no_run
//! use chunkyard::config::StorageConfig;
//! use chunkyard::server::http::{AppState, HttpServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState::new(&StorageConfig::default());
//! let server = HttpServer::bind("127.0.0.1:0".parse()?, state).await?;
//! println!("Server bound to: {:?}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::catalog::{self, CatalogError, FileCatalog};
use crate::config::StorageConfig;
use crate::metrics;
use crate::router::{RequestParser, Route, RouterError};
use crate::server::ServerError;
use crate::upload::{ChunkUpload, ChunkedUploadService, Recovery, UploadError};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{error, info, warn};

/// Response body type: either a small buffered body or a streamed file
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// Shared state handed to every connection
#[derive(Debug)]
pub struct AppState {
    pub uploads: Arc<ChunkedUploadService>,
    pub catalog: FileCatalog,
}

impl AppState {
    /// Build the upload service and catalog over one storage root
    pub fn new(storage: &StorageConfig) -> Self {
        Self::with_uploads(Arc::new(ChunkedUploadService::new(storage)))
    }

    /// Share an existing upload service
    pub fn with_uploads(uploads: Arc<ChunkedUploadService>) -> Self {
        let catalog = FileCatalog::new(uploads.store().root().to_path_buf());
        Self { uploads, catalog }
    }
}

/// HTTP listener for upload and catalog requests
pub struct HttpServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Bind immediately; port 0 lets the OS pick a port
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(state),
            listener,
            local_addr,
        })
    }

    /// The address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process exits
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves
    ///
    /// Connections already accepted keep running to completion in their own
    /// tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Accepting connections on {}", self.local_addr);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopped accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Route a request and render its response
async fn handle_request(req: Request<Incoming>, state: Arc<AppState>) -> Response<ResponseBody> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let route = match RequestParser::parse(&method, &path, req.uri().query()) {
        Ok(route) => route,
        Err(e) => return router_error(&method, &path, e),
    };

    match route {
        Route::Health => text(StatusCode::OK, "ok"),
        Route::ListFiles => list_files(&state).await,
        Route::Upload(chunk) => upload_chunk(req, chunk, &state).await,
        Route::Download { file_name } => download(&state, &file_name).await,
        Route::Preview { file_name } => preview(&state, &file_name).await,
        Route::Delete { file_name } => delete(&state, &file_name).await,
    }
}

async fn upload_chunk(
    req: Request<Incoming>,
    chunk: ChunkUpload,
    state: &AppState,
) -> Response<ResponseBody> {
    let stream = req
        .into_body()
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(stream);

    match state.uploads.receive_chunk(&chunk, &mut reader).await {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(e) => upload_error(&chunk, e),
    }
}

async fn list_files(state: &AppState) -> Response<ResponseBody> {
    match state.catalog.list().await {
        Ok(files) => json_response(StatusCode::OK, &files),
        Err(e) => catalog_error("list", e),
    }
}

async fn download(state: &AppState, file_name: &str) -> Response<ResponseBody> {
    let artifact = match state.catalog.open(file_name).await {
        Ok(artifact) => artifact,
        Err(e) => return catalog_error(file_name, e),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", catalog::media::OCTET_STREAM)
        .header("Content-Length", artifact.size)
        .header(
            "Content-Disposition",
            format!(
                "attachment; filename*=UTF-8''{}",
                utf8_percent_encode(file_name, NON_ALPHANUMERIC)
            ),
        )
        .body(file_body(artifact.file))
        .expect("Failed to build download response")
}

async fn preview(state: &AppState, file_name: &str) -> Response<ResponseBody> {
    let content_type = catalog::content_type(file_name);
    if !catalog::is_previewable(content_type) {
        return json_response(
            StatusCode::NOT_ACCEPTABLE,
            &json!({
                "error": "not_previewable",
                "message": format!("Preview is not supported for {}", content_type),
            }),
        );
    }

    let artifact = match state.catalog.open(file_name).await {
        Ok(artifact) => artifact,
        Err(e) => return catalog_error(file_name, e),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", artifact.content_type)
        .header("Content-Length", artifact.size)
        .body(file_body(artifact.file))
        .expect("Failed to build preview response")
}

async fn delete(state: &AppState, file_name: &str) -> Response<ResponseBody> {
    match state.catalog.delete(file_name).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &json!({ "message": format!("Deleted {}", file_name) }),
        ),
        Err(e) => catalog_error(file_name, e),
    }
}

fn upload_error(chunk: &ChunkUpload, e: UploadError) -> Response<ResponseBody> {
    let recovery = e.recovery();
    let status = match recovery {
        Recovery::FixRequest => StatusCode::BAD_REQUEST,
        Recovery::RetryChunk => StatusCode::SERVICE_UNAVAILABLE,
        Recovery::RestartUpload => StatusCode::CONFLICT,
        Recovery::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            file_name = %chunk.file_name,
            chunk_index = chunk.index,
            error = %e,
            "Chunk upload failed"
        );
    } else {
        warn!(
            file_name = %chunk.file_name,
            chunk_index = chunk.index,
            error = %e,
            "Chunk upload rejected"
        );
    }

    json_response(
        status,
        &json!({
            "error": e.kind(),
            "message": e.to_string(),
            "recovery": recovery,
            "file_name": chunk.file_name,
            "index": chunk.index,
        }),
    )
}

fn catalog_error(subject: &str, e: CatalogError) -> Response<ResponseBody> {
    let (status, kind) = match &e {
        CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        CatalogError::InvalidName(_) => (StatusCode::BAD_REQUEST, "invalid_name"),
        CatalogError::Io(_) => {
            error!(subject = subject, error = %e, "Catalog operation failed");
            metrics::record_error("catalog");
            (StatusCode::INTERNAL_SERVER_ERROR, "io")
        }
    };
    json_response(status, &json!({ "error": kind, "message": e.to_string() }))
}

fn router_error(method: &str, path: &str, e: RouterError) -> Response<ResponseBody> {
    let status = match e {
        RouterError::NotFound(_) => StatusCode::NOT_FOUND,
        RouterError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        RouterError::InvalidPath(_) | RouterError::BadRequest(_) => {
            metrics::record_error("client_protocol");
            StatusCode::BAD_REQUEST
        }
    };
    info!("Rejected {} {}: {}", method, path, e);
    json_response(status, &json!({ "error": e.to_string() }))
}

fn file_body(file: tokio::fs::File) -> ResponseBody {
    StreamBody::new(ReaderStream::new(file).map_ok(Frame::data)).boxed_unsync()
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn text(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(full(body))
        .expect("Failed to build text response")
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(full(body))
            .expect("Failed to build JSON response"),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
