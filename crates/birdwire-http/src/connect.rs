//! Open a streaming request and hand its body to the ingestion engine.

use futures::TryStreamExt;
use reqwest::header::HeaderMap;
use tracing::info;

use birdwire_core::{RateLimit, StreamError, TransportError};
use birdwire_stream::StreamConnection;

/// Send a caller-prepared (and already authenticated) streaming request.
///
/// On a success status the response body becomes a [`StreamConnection`],
/// carrying the rate-limit snapshot the response headers reported. No
/// retry and no reconnect: a failure here, like a terminal stream error
/// later, is the caller's to handle by opening a new stream.
pub async fn open_stream(
    request: reqwest::RequestBuilder,
) -> Result<StreamConnection, TransportError> {
    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;

    let rate_limit = rate_limit_from_headers(response.headers());
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    info!(status = status.as_u16(), "stream connected");
    let stream = response
        .bytes_stream()
        .map_err(|e| StreamError::Transport(e.to_string()));
    Ok(StreamConnection::new(Box::pin(stream)).with_rate_limit(rate_limit))
}

/// Parse the `x-rate-limit-*` header trio. Returns `None` unless all
/// three are present and numeric.
pub fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimit> {
    let limit = header_number(headers, "x-rate-limit-limit")?;
    let remaining = header_number(headers, "x-rate-limit-remaining")?;
    let reset = header_number(headers, "x-rate-limit-reset")?;
    Some(RateLimit {
        limit: limit as u32,
        remaining: remaining as u32,
        reset,
    })
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
