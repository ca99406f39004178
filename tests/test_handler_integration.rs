//! End-to-end tests of the request pipeline against real directories

use std::path::Path;

use http::header::{
    CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED, VARY,
};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use tinycdn::{CdnConfig, CdnHandler, CompressionSetting, EtagSetting};

struct Fixture {
    handler: CdnHandler,
    _source: TempDir,
    dest: TempDir,
}

fn fixture(configure: impl FnOnce(&mut CdnConfig)) -> Fixture {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    std::fs::write(source.path().join("hello.txt"), "hello, derivative cache\n").unwrap();
    std::fs::write(
        source.path().join("big.js"),
        "function answer() { return 42; }\n".repeat(2000),
    )
    .unwrap();
    std::fs::write(source.path().join("image.png"), vec![0x89, 0x50, 0x4e, 0x47, 0, 1, 2, 3])
        .unwrap();
    std::fs::create_dir(source.path().join("docs")).unwrap();
    std::fs::write(source.path().join("docs/index.html"), "<html>docs</html>").unwrap();

    let mut config = CdnConfig::default();
    config.source = source.path().to_string_lossy().to_string();
    config.dest = dest.path().to_string_lossy().to_string();
    config.compression = Some(CompressionSetting::Named("default".to_string()));
    config.etag = EtagSetting::Algorithm("sha256".to_string());
    configure(&mut config);

    Fixture {
        handler: CdnHandler::new(config).unwrap(),
        _source: source,
        dest,
    }
}

fn request(uri: &str, headers: &[(&str, &str)]) -> Request<()> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap()
}

fn sha256_hex(path: &Path) -> String {
    hex::encode(Sha256::digest(std::fs::read(path).unwrap()))
}

#[tokio::test]
async fn test_cold_compressible_request_materializes_artifacts() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/hello.txt", &[("accept-encoding", "gzip")]))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
    assert_eq!(response.headers().get(VARY).unwrap(), "Accept-Encoding");
    assert!(response.headers().get(LAST_MODIFIED).is_some());
    assert_eq!(response.headers().get("x-served-by").unwrap(), "tinyCDN");

    let etag = response
        .headers()
        .get(ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(etag.len(), 64);
    assert!(etag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    let artifact = fx.dest.path().join("hello.txt.gzip");
    let sidecar = fx.dest.path().join("hello.txt.gzip.sha256");
    assert!(artifact.is_file());
    assert!(sidecar.is_file());

    // The sidecar is exactly the lowercase hex digest of the artifact,
    // no trailing newline.
    let sidecar_content = std::fs::read_to_string(&sidecar).unwrap();
    assert_eq!(sidecar_content, sha256_hex(&artifact));
    assert_eq!(sidecar_content, etag);

    // Content-Length matches the streamed body exactly.
    let declared: u64 = response
        .headers()
        .get(CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len() as u64, declared);
    assert_eq!(&body[..], &std::fs::read(&artifact).unwrap()[..]);
}

#[tokio::test]
async fn test_warm_conditional_request_returns_304() {
    let fx = fixture(|_| {});

    let first = fx
        .handler
        .handle(request("/hello.txt", &[("accept-encoding", "gzip")]))
        .await;
    let etag = first.headers().get(ETAG).unwrap().to_str().unwrap().to_string();

    let second = fx
        .handler
        .handle(request(
            "/hello.txt",
            &[("accept-encoding", "gzip"), ("if-none-match", &etag)],
        ))
        .await;

    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers().get(ETAG).unwrap().to_str().unwrap(), etag);
    assert!(second.headers().get(CACHE_CONTROL).is_some());

    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_stale_validator_still_gets_full_response() {
    let fx = fixture(|_| {});

    let _ = fx
        .handler
        .handle(request("/hello.txt", &[("accept-encoding", "gzip")]))
        .await;

    let response = fx
        .handler
        .handle(request(
            "/hello.txt",
            &[("accept-encoding", "gzip"), ("if-none-match", "bogus")],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!body.is_empty());
}

#[tokio::test]
async fn test_missing_asset_negotiates_html_body() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/does-not-exist", &[("accept", "text/html")]))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/html");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Not Found");
}

#[tokio::test]
async fn test_missing_asset_negotiates_json_and_text() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/nope", &[("accept", "application/json")]))
        .await;
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"error":"Not found"}"#);

    let response = fx.handler.handle(request("/nope", &[])).await;
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
}

#[tokio::test]
async fn test_directory_request_404_when_auto_index_off() {
    let fx = fixture(|config| config.auto_index = false);

    let response = fx
        .handler
        .handle(request("/docs/", &[("accept", "application/json")]))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn test_directory_request_serves_index_when_auto_index_on() {
    let fx = fixture(|_| {});

    let response = fx.handler.handle(request("/docs/", &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/html"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"<html>docs</html>");
}

#[tokio::test]
async fn test_non_compressible_extension_serves_raw() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/image.png", &[("accept-encoding", "gzip, deflate")]))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CONTENT_ENCODING).is_none());
    assert!(response.headers().get(VARY).is_none());
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "8");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), 8);

    // No compressed artifact appears, only the raw-group sidecar.
    assert!(!fx.dest.path().join("image.png.gzip").exists());
    assert!(fx.dest.path().join("image.png.raw.sha256").is_file());
}

#[tokio::test]
async fn test_deflate_selected_when_gzip_absent() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/hello.txt", &[("accept-encoding", "deflate")]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "deflate");
    assert!(fx.dest.path().join("hello.txt.deflate").is_file());
}

#[tokio::test]
async fn test_absent_accept_encoding_serves_raw_without_vary() {
    let fx = fixture(|_| {});

    let response = fx.handler.handle(request("/hello.txt", &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CONTENT_ENCODING).is_none());
    assert!(response.headers().get(VARY).is_none());
}

#[tokio::test]
async fn test_query_string_is_ignored_for_identity() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/hello.txt?version=7", &[("accept-encoding", "gzip")]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fx.dest.path().join("hello.txt.gzip").is_file());
}

#[tokio::test]
async fn test_etag_disabled_omits_validator_headers() {
    let fx = fixture(|config| config.etag = EtagSetting::Enabled(false));

    let response = fx
        .handler
        .handle(request("/hello.txt", &[("accept-encoding", "gzip")]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(ETAG).is_none());
    assert!(response.headers().get(CACHE_CONTROL).is_none());
    assert!(!fx.dest.path().join("hello.txt.gzip.sha256").exists());
}

#[tokio::test]
async fn test_traversal_is_rejected() {
    let fx = fixture(|_| {});

    let response = fx.handler.handle(request("/../secret.txt", &[])).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_nested_asset_mirrors_tree_in_dest() {
    let fx = fixture(|_| {});

    let response = fx
        .handler
        .handle(request("/docs/index.html", &[("accept-encoding", "gzip")]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fx.dest.path().join("docs/index.html.gzip").is_file());
    assert!(fx.dest.path().join("docs/index.html.gzip.sha256").is_file());
}

#[tokio::test]
async fn test_response_hooks_fire() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let responses = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let fx = fixture(|_| {});
    let responses_hook = Arc::clone(&responses);
    let errors_hook = Arc::clone(&errors);
    let handler = fx
        .handler
        .clone()
        .with_response_hook(Arc::new(move |_, _| {
            responses_hook.fetch_add(1, Ordering::SeqCst);
        }))
        .with_error_hook(Arc::new(move |_, _, _| {
            errors_hook.fetch_add(1, Ordering::SeqCst);
        }));

    let _ = handler.handle(request("/hello.txt", &[])).await;
    let _ = handler.handle(request("/missing.txt", &[])).await;

    assert_eq!(responses.load(Ordering::SeqCst), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
