use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

/// Header carrying the correlation id for a request. Callers may supply their
/// own; otherwise one is minted here.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn correlation_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Attach a correlation id to the request and echo it on the response, so log
/// lines and client-side failure reports can be matched up.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = correlation_id(&req);

    if let Ok(value) = HeaderValue::from_str(&id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
