//! tinycdn — caching static-asset HTTP server
//!
//! Serves files from a read-only source directory while maintaining a
//! write-through derivative cache in a destination directory. On the first
//! qualifying request for an asset it materializes a precompressed
//! representation (gzip or deflate) when the extension is in the configured
//! compressible set, and a content-hash sidecar backing the `ETag` header
//! and `If-None-Match` conditional requests. Later requests reuse the
//! on-disk artifacts without recomputation.
//!
//! # Architecture
//!
//! - [`CdnHandler`]: the per-request pipeline from URL to 304/200
//! - [`SingleFlight`]: coalesces concurrent work under a string key
//! - [`FileAuthority`]: funnels derivative-producing file operations
//!   through one authority task
//! - [`FilePrimitives`]: single-flighted stat/read/mkdir plus the write
//!   pipelines
//! - [`CdnConfig`]: YAML configuration
//! - [`CdnMetrics`]: runtime counters
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tinycdn::{CdnConfig, CdnHandler};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = CdnConfig::default();
//! config.source = "/srv/site".to_string();
//! config.dest = "/srv/cache".to_string();
//! config.compression = Some(tinycdn::CompressionSetting::Named("default".into()));
//! config.validate_roots()?;
//!
//! let handler = CdnHandler::new(config)?;
//! let response = handler
//!     .handle(http::Request::builder().uri("/app.js").body(())?)
//!     .await;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Staleness
//!
//! The destination tree is append-only: artifacts and sidecars are created
//! once and never refreshed. Replacing a source file without deleting the
//! destination tree serves the stale derivative indefinitely; operators
//! wipe the destination out-of-band to invalidate.

pub mod compress;
pub mod config;
pub mod converger;
pub mod error;
pub mod fs_ops;
pub mod handler;
pub mod hash;
pub mod metrics;
pub mod paths;
pub mod response;
pub mod single_flight;

pub use compress::{CompressionLevel, Encoding};
pub use config::{CdnConfig, CompressionSetting, EtagSetting};
pub use converger::{FileAuthority, FileOp, OpReply};
pub use error::{CdnError, Result};
pub use fs_ops::{FileInfo, FilePrimitives};
pub use handler::{CdnHandler, ErrorHook, ResponseHook};
pub use hash::HashAlgorithm;
pub use metrics::{CdnMetrics, MetricsSnapshot};
pub use paths::AssetPaths;
pub use response::{CdnBody, ServePlan};
pub use single_flight::SingleFlight;
