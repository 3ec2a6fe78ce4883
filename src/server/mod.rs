//! HTTP server module
//!
//! Wires the upload service, file catalog, sweeper and metrics endpoint
//! together and serves them until Ctrl-C.

pub mod http;

use crate::config::Config;
use crate::metrics::server::MetricsServer;
use crate::sweep::Sweeper;
use crate::upload::ChunkedUploadService;
use self::http::{AppState, HttpServer};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

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
    config: Config,
    addr: SocketAddr,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("{}", e)))?;

        Ok(Self { config, addr })
    }

    /// Address the upload listener will bind to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Starting server on {}", self.addr);
        info!(
            root = %self.config.storage.root_dir.display(),
            "Using storage root"
        );

        let uploads = Arc::new(ChunkedUploadService::new(&self.config.storage));
        uploads
            .store()
            .ensure_root()
            .await
            .map_err(|e| ServerError::RuntimeError(e.to_string()))?;

        let sweeper = Sweeper::new(Arc::clone(&uploads), self.config.sweep.clone());
        if self.config.sweep.on_startup {
            if let Err(e) = sweeper.run_once().await {
                warn!(error = %e, "Startup sweep failed");
            }
        }
        let mut sweeper = sweeper.spawn();

        let mut metrics_server = if self.config.metrics.enabled {
            let mut server = MetricsServer::new(format!("0.0.0.0:{}", self.config.metrics.port));
            server
                .start()
                .await
                .map_err(|e| ServerError::BindError(e.to_string()))?;
            Some(server)
        } else {
            None
        };

        let http = HttpServer::bind(self.addr, AppState::with_uploads(uploads)).await?;
        let result = http
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await;

        info!("Shutting down server");
        sweeper.shutdown().await;
        if let Some(server) = metrics_server.as_mut() {
            server.shutdown().await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricsConfig, ServerConfig, StorageConfig, SweepConfig};

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
            },
            storage: StorageConfig::default(),
            sweep: SweepConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn test_server_new() {
        let config = test_config();
        let server = Server::new(config);
        assert!(server.is_ok());
    }

    #[test]
    fn test_server_invalid_address() {
        let mut config = test_config();
        config.server.address = "invalid".into();
        let server = Server::new(config);
        assert!(server.is_err());
    }

    #[test]
    fn test_server_addr() {
        let mut config = test_config();
        config.server.address = "[::]:8080".into();
        let server = Server::new(config).unwrap();
        assert_eq!(server.addr().port(), 8080);
    }
}
