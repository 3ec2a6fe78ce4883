//! Chunkyard Library
//!
//! Chunked uploads reassembled onto a flat storage directory.
//!
//! # Features
//!
//! - **Chunked Uploads**: Chunks arrive in any order, possibly concurrently
//! - **Atomic Publish**: Artifacts appear under their name only once complete
//! - **Exactly-Once Assembly**: Concurrent final chunks trigger one merge
//! - **Temp Sweeping**: Abandoned slots and staging files are reclaimed
//!
//! # Example
//!
//! ```no_run
//! use chunkyard::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod metrics;
pub mod router;
pub mod server;
pub mod sweep;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
