//! tinycdn server binary
//!
//! Loads configuration, validates the source and destination roots, and
//! serves the cache engine over HTTP/1.

use std::env;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use tinycdn::{CdnConfig, CdnHandler};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "tinycdn.yaml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        match CdnConfig::from_file(&config_path) {
            Ok(config) => {
                info!(path = %config_path, "configuration loaded");
                config
            }
            Err(e) => {
                error!("failed to load configuration: {e}");
                std::process::exit(1);
            }
        }
    } else {
        info!(path = %config_path, "no config file, using defaults");
        CdnConfig::default()
    };

    if let Err(e) = config.validate_roots() {
        error!("invalid directories: {e}");
        std::process::exit(1);
    }

    info!(source = %config.source_root().display(), "asset root");
    info!(dest = %config.dest_root().display(), "derivative cache root");
    info!(
        compression = config.compression_level().is_some(),
        etag = config
            .etag_algorithm()
            .ok()
            .flatten()
            .map(|a| a.name())
            .unwrap_or("off"),
        auto_index = config.auto_index,
        "cache engine options"
    );

    let listen = config.listen.clone();
    let handler = match CdnHandler::new(config) {
        Ok(handler) => Arc::new(handler),
        Err(e) => {
            error!("failed to initialize handler: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %listen, "failed to bind: {e}");
            std::process::exit(1);
        }
    };
    info!("tinycdn listening on http://{listen}");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let handler = Arc::clone(&handler);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, std::convert::Infallible>(handler.handle(req).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("error serving connection: {err:?}");
            }
        });
    }
}
