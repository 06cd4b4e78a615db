//! HTTP server module
//!
//! Handles incoming HTTP requests and routes them to the upload pipeline.
//!
//! The server is built on `hyper` and `tokio`: one task per connection,
//! HTTP/1.1, graceful shutdown on ctrl-c. There is no ambient routing
//! state; the server object owns its listener and the upload service and
//! is constructed once at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ConfigHandle;
use crate::store::ObjectStore;
use crate::upload::UploadService;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP Server
pub struct Server {
    service: Arc<UploadService>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listener and assemble the upload service.
    ///
    /// Binding happens immediately; with port 0 the OS assigns a free port,
    /// discoverable through [`Server::local_addr`].
    pub async fn bind(
        config: ConfigHandle,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .current()
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {e}")))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            service: Arc::new(UploadService::new(config, store)),
            listener,
            local_addr,
        })
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until ctrl-c.
    ///
    /// Each connection is served in its own task; connection errors are
    /// logged and never stop the accept loop.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Starting server on {}", self.local_addr);

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                shutdown = tokio::signal::ctrl_c() => {
                    shutdown.map_err(|e| ServerError::RuntimeError(e.to_string()))?;
                    info!("Shutting down server");
                    return Ok(());
                }
            };

            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move { Ok::<_, hyper::Error>(route(req, &service).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Route one request.
pub async fn route(req: Request<Incoming>, service: &UploadService) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/upload") => match service.upload(req).await {
            Ok(body) => json_response(&body),
            Err(err) => status_response(err.status()),
        },
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        _ => status_response(StatusCode::NOT_FOUND),
    }
}

fn json_response(body: &impl serde::Serialize) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(json)))
            .expect("Failed to build response"),
        Err(err) => {
            error!("Failed to encode response body: {}", err);
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Generic status-phrase response; failure detail stays in the logs.
fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let phrase = status.canonical_reason().unwrap_or("Error");
    text_response(status, &format!("{} {}", status.as_u16(), phrase))
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("Failed to build response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DefaultPolicyConfig, GroupConfig, LocalConfig, ServerConfig, StorageBackend,
        StorageConfig, UploadConfig,
    };
    use crate::store::LocalStore;

    fn test_config(address: &str, root: std::path::PathBuf) -> Config {
        Config {
            server: ServerConfig {
                address: address.into(),
            },
            upload: UploadConfig {
                base_url: "http://localhost:8080/files".into(),
                max_memory_size: 1024,
                groups: vec![GroupConfig {
                    name: "images".into(),
                    mime_types: vec!["image/png".into()],
                    max_upload_size: 1048576,
                    folder: "images".into(),
                }],
                defaults: DefaultPolicyConfig::default(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                s3: None,
                local: Some(LocalConfig { root: root.clone() }),
            },
        }
    }

    #[tokio::test]
    async fn binds_to_os_assigned_port() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigHandle::new(test_config("127.0.0.1:0", dir.path().to_path_buf()));
        let store = Arc::new(LocalStore::new(dir.path()).await.unwrap());

        let server = Server::bind(config, store).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigHandle::new(test_config("invalid", dir.path().to_path_buf()));
        let store = Arc::new(LocalStore::new(dir.path()).await.unwrap());

        assert!(matches!(
            Server::bind(config, store).await,
            Err(ServerError::BindError(_))
        ));
    }
}
