//! Spoolgate Library
//!
//! Streaming multipart upload gateway. Accepts `POST /upload`, classifies
//! the file by sniffed content type against configurable groups, enforces
//! size limits at the body, parser and group layers, spools the payload to
//! an unlinked temporary file and relays it to S3-compatible object
//! storage — without ever buffering the whole file in memory.
//!
//! # Example
//!
//! ```no_run
//! use spoolgate::config::{Config, ConfigHandle};
//! use spoolgate::server::Server;
//! use spoolgate::store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigHandle::new(Config::load("config.yaml")?);
//!     let store = store::from_config(&config.current()).await?;
//!     let server = Server::bind(config, store).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod server;
pub mod spool;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use config::{Config, ConfigHandle};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
