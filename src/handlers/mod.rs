pub mod products;
pub mod reset;
pub mod surface;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// `{"success": bool, "message": string}` with an exact `Content-Length`.
/// Every response the service produces goes through here.
pub fn json_message(status: StatusCode, success: bool, message: &str) -> Response {
    let body = serde_json::to_vec(&serde_json::json!({
        "success": success,
        "message": message,
    }))
    .unwrap_or_default();

    (
        status,
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (CONTENT_LENGTH, HeaderValue::from(body.len())),
        ],
        body,
    )
        .into_response()
}
