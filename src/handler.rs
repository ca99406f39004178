//! The per-request pipeline from URL to response
//!
//! Turns a request into either a 304 or a streamed 200 while guaranteeing
//! that concurrent requests for the same `(asset, encoding)` perform each
//! expensive step once: requests coalesce on a channel keyed by
//! `group:url`, the channel leader drives production in a detached task
//! (a responder disconnect never aborts it), and every attached responder
//! receives the same outcome.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_ENCODING, IF_NONE_MATCH};
use http::{HeaderMap, HeaderName, Request, Response};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::compress::{CompressionLevel, Encoding};
use crate::config::CdnConfig;
use crate::converger::FileAuthority;
use crate::error::{CdnError, Result};
use crate::fs_ops::FilePrimitives;
use crate::hash::HashAlgorithm;
use crate::metrics::CdnMetrics;
use crate::paths::{self, AssetPaths};
use crate::response::{self, CdnBody, ServePlan};
use crate::single_flight::SingleFlight;

/// Outcome shared by every responder coalesced on a channel
type ServeOutcome = std::result::Result<ServePlan, CdnError>;

/// Called once per dispatched response with the error, if any, and the URL
pub type ResponseHook = Arc<dyn Fn(Option<&CdnError>, &str) + Send + Sync>;

/// Called once per failed channel with the error, the URL, and the number
/// of responders that were held on the channel
pub type ErrorHook = Arc<dyn Fn(&CdnError, &str, usize) + Send + Sync>;

/// The request handler
///
/// Cheap to clone; clones share the coalescing registries, metrics, and
/// file authority. The compressible-extension set and hash algorithm are
/// resolved once at construction and immutable afterwards.
#[derive(Clone)]
pub struct CdnHandler {
    config: Arc<CdnConfig>,
    source_root: PathBuf,
    dest_root: PathBuf,
    compressible: Arc<HashSet<String>>,
    algorithm: Option<HashAlgorithm>,
    authority: FileAuthority,
    channels: Arc<SingleFlight<oneshot::Sender<ServeOutcome>>>,
    metrics: Arc<CdnMetrics>,
    on_response: Option<ResponseHook>,
    on_error: Option<ErrorHook>,
}

impl CdnHandler {
    /// Build a handler from validated configuration
    ///
    /// Resolves the compression level, compressible set, and sidecar hash
    /// algorithm, and spawns the file-operation authority task unless
    /// `ignore_cluster` collapses it to local pass-through. Must be called
    /// from within a tokio runtime.
    pub fn new(config: CdnConfig) -> Result<Self> {
        let level = config
            .compression_level()
            .unwrap_or(CompressionLevel::Default);
        let algorithm = config.etag_algorithm()?;
        let primitives = Arc::new(FilePrimitives::new(
            level,
            algorithm.unwrap_or(HashAlgorithm::Sha256),
        ));
        let authority = if config.ignore_cluster {
            FileAuthority::local(primitives)
        } else {
            FileAuthority::spawn(primitives)
        };

        Ok(CdnHandler {
            source_root: config.source_root(),
            dest_root: config.dest_root(),
            compressible: Arc::new(config.compressible_extensions()),
            algorithm,
            authority,
            channels: Arc::new(SingleFlight::new()),
            metrics: Arc::new(CdnMetrics::new()),
            on_response: None,
            on_error: None,
            config: Arc::new(config),
        })
    }

    /// Install an observability hook fired for every dispatched response
    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.on_response = Some(hook);
        self
    }

    /// Install an observability hook fired when a channel fails
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn metrics(&self) -> &Arc<CdnMetrics> {
        &self.metrics
    }

    /// Serve one request
    ///
    /// Consumes only `uri` and headers; the request body is ignored.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<CdnBody> {
        self.metrics.record_request();

        let raw_url = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let accept = owned_header(req.headers(), &ACCEPT);

        let asset = match paths::sanitize(
            &raw_url,
            &self.source_root,
            &self.dest_root,
            self.config.auto_index,
        ) {
            Ok(asset) => asset,
            Err(e) => {
                debug!(url = %raw_url, error = %e, "request rejected by sanitizer");
                return self.reject(&e, &raw_url, accept.as_deref());
            }
        };

        let compressible = asset
            .extension()
            .is_some_and(|ext| self.compressible.contains(ext));
        let encoding = Encoding::select(
            owned_header(req.headers(), &ACCEPT_ENCODING).as_deref(),
            compressible,
        );
        let channel = format!("{}:{}", encoding.token(), asset.clean_url);

        let (tx, rx) = oneshot::channel();
        if self.channels.add(&channel, tx) {
            // The leader drives production in a detached task so a dropped
            // connection cannot strand the followers.
            let handler = self.clone();
            let asset = asset.clone();
            tokio::spawn(async move {
                let outcome = handler.produce(&asset, encoding).await;
                let waiters = handler.channels.remove(&channel);
                handler
                    .metrics
                    .record_coalesced(waiters.len().saturating_sub(1) as u64);
                if let Err(e) = &outcome {
                    warn!(
                        url = %asset.clean_url,
                        group = %encoding,
                        error = %e,
                        held = waiters.len(),
                        "producer failed, failing channel"
                    );
                    if let Some(hook) = &handler.on_error {
                        hook(e, &asset.clean_url, waiters.len());
                    }
                }
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            });
        }

        let outcome = rx.await.unwrap_or_else(|_| {
            Err(CdnError::AuthorityError(
                "channel leader vanished".to_string(),
            ))
        });

        match outcome {
            Ok(plan) => {
                self.dispatch(&plan, req.headers(), &asset.clean_url, accept.as_deref())
                    .await
            }
            Err(e) => self.reject(&e, &asset.clean_url, accept.as_deref()),
        }
    }

    /// Run the producing side of a channel: stat, lazily materialize the
    /// compressed artifact, look up or create the sidecar, build the shared
    /// header set
    async fn produce(&self, asset: &AssetPaths, encoding: Encoding) -> Result<ServePlan> {
        let target = asset.artifact(encoding);

        let info = match self.authority.stat(&target).await {
            Ok(info) => info,
            Err(e) if encoding == Encoding::Raw => return Err(e),
            Err(_) => {
                // The source must exist before we spend work compressing.
                self.authority.stat(&asset.source).await?;
                self.authority.mkdir(&self.dest_root, &target).await?;
                self.authority
                    .write_stream(&asset.source, &target, encoding)
                    .await?;
                self.metrics.record_artifact_written();
                debug!(target = %target.display(), group = %encoding, "artifact materialized");
                self.authority.stat(&target).await?
            }
        };
        if !info.is_file {
            return Err(CdnError::NotAFile(target.display().to_string()));
        }

        let etag = match self.algorithm {
            None => None,
            Some(algorithm) => {
                let sidecar = asset.sidecar(encoding, algorithm);
                match self.authority.read_file(&sidecar).await {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).trim().to_string()),
                    Err(_) => {
                        let digest = self.authority.hash_file(&target).await?;
                        self.authority.mkdir(&self.dest_root, &sidecar).await?;
                        self.authority
                            .write_file(&sidecar, Bytes::from(digest.clone()))
                            .await?;
                        self.metrics.record_sidecar_written();
                        Some(digest)
                    }
                }
            }
        };

        let headers = response::build_headers(
            &self.config,
            &asset.clean_url,
            encoding,
            &info,
            etag.as_deref(),
        )?;
        Ok(ServePlan {
            headers,
            etag,
            target,
        })
    }

    /// Emit 304 or a streamed 200 for one responder
    async fn dispatch(
        &self,
        plan: &ServePlan,
        req_headers: &HeaderMap,
        url: &str,
        accept: Option<&str>,
    ) -> Response<CdnBody> {
        if let (Some(etag), Some(if_none_match)) = (
            plan.etag.as_deref(),
            owned_header(req_headers, &IF_NONE_MATCH),
        ) {
            if if_none_match == etag {
                self.metrics.record_not_modified();
                self.notify(None, url);
                return response::not_modified(plan);
            }
        }

        match response::ok_with_stream(plan).await {
            Ok(resp) => {
                self.notify(None, url);
                resp
            }
            Err(e) => self.reject(&e, url, accept),
        }
    }

    fn reject(&self, error: &CdnError, url: &str, accept: Option<&str>) -> Response<CdnBody> {
        self.metrics.record_not_found();
        self.notify(Some(error), url);
        response::not_found(&self.config, accept)
    }

    fn notify(&self, error: Option<&CdnError>, url: &str) {
        if let Some(hook) = &self.on_response {
            hook(error, url);
        }
    }
}

fn owned_header(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
