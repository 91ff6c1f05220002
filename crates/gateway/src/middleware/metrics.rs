//! Per-route request metrics

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use doctalk_common::metrics::RequestMetrics;

/// Count requests and record latency, labelled by route template so session
/// ids don't explode label cardinality
pub async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let timer = RequestMetrics::start(&method, &endpoint);
    let response = next.run(request).await;
    timer.finish(response.status().as_u16());

    response
}
