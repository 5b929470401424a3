//! HTTP face of the stream
//!
//! Serves the playlist from memory and the segment files from the live
//! directory. Every response is marked uncacheable and carries
//! permissive cross-domain headers, and a bare `OPTIONS` preflight is
//! answered directly so browser players can poll from anywhere.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::PLAYLIST_EXTENSION;
use crate::error::{Error, NetworkError};
use crate::hls::Publisher;

/// Everything the request handlers need
pub struct StreamContext {
    pub publisher: Arc<Publisher>,
    pub live_dir: PathBuf,
    pub live_dir_name: String,
    pub oos_dir: Option<PathBuf>,
}

/// Build the application router
pub fn router(context: Arc<StreamContext>) -> Router {
    Router::new()
        .route("/", get(home))
        .fallback(stream)
        .layer(middleware::from_fn(cross_origin))
        .with_state(context)
}

/// Bind the HTTP port and serve until killed
pub async fn serve(port: u16, context: Arc<StreamContext>) -> Result<(), Error> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| NetworkError::BindFailed(format!("port {}: {}", port, e)))?;
    info!(port, "starting HTTP server for stream requests");
    axum::serve(listener, router(context)).await?;
    Ok(())
}

/// Answer preflight requests and decorate everything else
async fn cross_origin(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        debug!(uri = %request.uri(), "allowing cross-domain OPTIONS request");
        let mut response = StatusCode::OK.into_response();
        apply_cross_domain(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cross_domain(response.headers_mut());
    disable_caching(response.headers_mut());
    response
}

fn apply_cross_domain(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-Requested-With"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
}

fn disable_caching(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate, max-age=0"),
    );
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static("Tue, 01 Jan 1980 1:00:00 GMT"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

/// Redirect the home page into the live directory
async fn home(State(context): State<Arc<StreamContext>>) -> Response {
    let location = format!("/{}/", context.live_dir_name);
    debug!(to = %location, "redirecting home page request");
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Serve a playlist, a segment or any other file under the live prefix
async fn stream(State(context): State<Arc<StreamContext>>, uri: Uri) -> Response {
    let prefix = format!("/{}/", context.live_dir_name);
    let Some(file_name) = uri.path().strip_prefix(prefix.as_str()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if file_name.contains("..") || file_name.contains('/') {
        return StatusCode::NOT_FOUND.into_response();
    }
    let file_name = if file_name.is_empty() { "index.html" } else { file_name };
    debug!(file = file_name, "stream handler asked for");

    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or("");

    // Any playlist name under the live prefix gets the live playlist,
    // straight from memory
    if extension == PLAYLIST_EXTENSION {
        let bytes = context.publisher.playlist_bytes();
        debug!(bytes = bytes.len(), "serving playlist from buffer");
        return (
            [(header::CONTENT_TYPE, content_type(extension))],
            bytes,
        )
            .into_response();
    }

    serve_file(&context, file_name, extension).await
}

async fn serve_file(context: &StreamContext, file_name: &str, extension: &str) -> Response {
    let bytes = match tokio::fs::read(context.live_dir.join(file_name)).await {
        Ok(bytes) => bytes,
        // Anything missing from the live directory may exist as
        // out-of-service content
        Err(_) => match &context.oos_dir {
            Some(dir) => match tokio::fs::read(dir.join(file_name)).await {
                Ok(bytes) => bytes,
                Err(_) => return StatusCode::NOT_FOUND.into_response(),
            },
            None => return StatusCode::NOT_FOUND.into_response(),
        },
    };
    ([(header::CONTENT_TYPE, content_type(extension))], bytes).into_response()
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "m3u8" => "application/x-mpegurl",
        "mp3" => "audio/mpeg",
        "html" => "text/html; charset=utf-8",
        "js" => "application/javascript",
        "css" => "text/css",
        _ => "application/octet-stream",
    }
}
