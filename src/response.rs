//! Response assembly
//!
//! Builds the header set for a serve (exactly once; every coalesced
//! responder shares it read-only), dispatches 304 versus 200, and
//! content-negotiates 404 bodies.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL,
    CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, EXPIRES, LAST_MODIFIED, VARY,
};
use http::{Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tokio_util::io::ReaderStream;

use crate::compress::Encoding;
use crate::config::CdnConfig;
use crate::error::{CdnError, Result};
use crate::fs_ops::FileInfo;

/// Response body: fixed bytes or a per-responder file stream
pub type CdnBody = BoxBody<Bytes, std::io::Error>;

const X_SERVED_BY: HeaderName = HeaderName::from_static("x-served-by");
const SERVER_TAG: &str = "tinyCDN";

/// Everything a responder needs once the producing flight has finished
///
/// The header set is immutable after construction; responders clone it
/// into their responses but never modify the shared copy. Each responder
/// opens its own read stream over `target`.
#[derive(Debug, Clone)]
pub struct ServePlan {
    pub headers: HeaderMap,
    pub etag: Option<String>,
    pub target: PathBuf,
}

/// Build the common header set for a serve
///
/// # Arguments
/// * `clean_url` - Sanitized URL path, used only for MIME lookup
/// * `encoding` - Group the serve goes out under
/// * `info` - Most recent successful stat of the served artifact
/// * `etag` - Validator to advertise, if sidecars are enabled
///
/// # Returns
/// The header set shared by every responder on the channel. Callers clone
/// it into responses; the original is never mutated after this returns.
pub fn build_headers(
    config: &CdnConfig,
    clean_url: &str,
    encoding: Encoding,
    info: &FileInfo,
    etag: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let mime = mime_guess::from_path(clean_url).first_or_octet_stream();
    headers.insert(CONTENT_TYPE, header_value(mime.as_ref())?);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(info.size));
    headers.insert(LAST_MODIFIED, header_value(&info.last_modified)?);
    headers.insert(X_SERVED_BY, HeaderValue::from_static(SERVER_TAG));

    if let Some(etag) = etag.filter(|e| !e.is_empty()) {
        headers.insert(ETAG, header_value(etag)?);
        headers.insert(
            CACHE_CONTROL,
            header_value(&format!("public, max-age={}", config.max_age))?,
        );
        let expires = SystemTime::now() + Duration::from_secs(config.max_age);
        headers.insert(EXPIRES, header_value(&httpdate::fmt_http_date(expires))?);
    }

    if let Some(token) = encoding.content_encoding() {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(token));
        headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    }

    if let Some(origin) = config
        .access_control_allow_origin
        .as_deref()
        .filter(|o| !o.is_empty())
    {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, header_value(origin)?);
    }

    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| CdnError::AssemblyError(format!("invalid header value {value:?}: {e}")))
}

/// 304 response sharing the serve's header set, empty body
pub fn not_modified(plan: &ServePlan) -> Response<CdnBody> {
    with_headers(StatusCode::NOT_MODIFIED, plan.headers.clone(), empty_body())
}

/// 200 response with a freshly opened stream over the served artifact
pub async fn ok_with_stream(plan: &ServePlan) -> Result<Response<CdnBody>> {
    let body = file_body(&plan.target).await.map_err(|e| {
        CdnError::IoError(format!("open {}: {e}", plan.target.display()))
    })?;
    Ok(with_headers(StatusCode::OK, plan.headers.clone(), body))
}

/// 404 response, body selected by the request's `Accept` header
///
/// Negotiation order is HTML, then JSON, then plain text, matching on MIME
/// substring presence.
pub fn not_found(config: &CdnConfig, accept: Option<&str>) -> Response<CdnBody> {
    let accept = accept.unwrap_or("");
    let (body, content_type) = if accept.contains("text/html") {
        (
            config.not_found_html.as_deref().unwrap_or("Not Found"),
            "text/html",
        )
    } else if accept.contains("application/json") {
        (
            config
                .not_found_json
                .as_deref()
                .unwrap_or("{\"error\":\"Not found\"}"),
            "application/json",
        )
    } else {
        (
            config.not_found_text.as_deref().unwrap_or("Not Found"),
            "text/plain",
        )
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(X_SERVED_BY, HeaderValue::from_static(SERVER_TAG));
    with_headers(
        StatusCode::NOT_FOUND,
        headers,
        full_body(body.as_bytes().to_vec()),
    )
}

fn with_headers(status: StatusCode, headers: HeaderMap, body: CdnBody) -> Response<CdnBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn full_body(data: impl Into<Bytes>) -> CdnBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn empty_body() -> CdnBody {
    full_body(Bytes::new())
}

async fn file_body(path: &Path) -> std::io::Result<CdnBody> {
    let file = tokio::fs::File::open(path).await?;
    let stream = ReaderStream::new(file).map_ok(Frame::data);
    Ok(StreamBody::new(stream).boxed())
}
