use axum::BoxError;
use axum::body::{Bytes, HttpBody};
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::handlers::json_message;

const ALLOWED_HEADERS: &str = "Content-Type, Content-Length, Accept";
const ALLOWED_METHODS: &str = "POST, DELETE";

fn options_response() -> Response {
    let mut response = json_message(StatusCode::OK, true, "OK");
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    response
}

/// Catches unknown paths and unsupported methods on known paths.
/// `OPTIONS` on any path is answered with the CORS advertisement.
pub async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return options_response();
    }
    ApiError::NotFound.into_response()
}

/// The body limit rejects with a plain-text 413, either from the
/// `Content-Length` check or from the extractor while streaming. Rewrite it
/// into the JSON envelope.
pub async fn payload_too_large_as_json<B>(response: Response<B>) -> Response
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge.into_response();
    }
    response.into_response()
}
