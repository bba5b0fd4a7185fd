use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;

use crate::AppState;
use crate::error::ApiError;
use crate::fingerprint::{RequestAttributes, RequestBody};
use crate::handlers::json_message;
use crate::store::{RecordStore, RequestRecord, is_duplicate};

const UPDATED_MESSAGE: &str = "Atualização de informações do produto realizada com sucesso!";
const STORE_FAILED_MESSAGE: &str = "Erro ao registrar a requisição!";

fn header_str(headers: &HeaderMap, name: axum::http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Collect the fingerprinted attributes. The host falls back to the URI
/// authority (HTTP/2 requests carry no `Host` header); the path keeps the
/// query string.
fn request_attributes(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> RequestAttributes {
    let host =
        header_str(headers, HOST).or_else(|| uri.authority().map(|a| a.as_str().to_string()));

    RequestAttributes {
        host,
        content_type: header_str(headers, CONTENT_TYPE),
        body: Some(RequestBody::Bytes(body)),
        path: uri.path_and_query().map(|pq| pq.as_str().to_string()),
        method: Some(method.as_str().to_string()),
    }
}

/// POST /v1/products
///
/// Accepted requests are recorded so an identical one is refused for the
/// next ten minutes. Exactly one write per accepted request, none otherwise.
pub async fn update_products(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let attrs = request_attributes(&method, &uri, &headers, body);
    let request = attrs.validate().inspect_err(|e| {
        tracing::debug!(issues = ?e.issues(), "request failed validation");
    })?;

    let fingerprint = state.config.fingerprint_scheme.encode(&request);

    if is_duplicate(&state.store, &fingerprint)
        .await
        .map_err(|e| ApiError::store(STORE_FAILED_MESSAGE, e))?
    {
        tracing::debug!(fingerprint = %fingerprint, "duplicate request rejected");
        return Err(ApiError::Duplicate);
    }

    let record = RequestRecord::new(&request, fingerprint, state.store.now());
    state
        .store
        .insert(&record)
        .await
        .map_err(|e| ApiError::store(STORE_FAILED_MESSAGE, e))?;

    tracing::debug!(
        fingerprint = %record.request_hash,
        content_length = record.content_length,
        "request accepted"
    );

    Ok(json_message(StatusCode::OK, true, UPDATED_MESSAGE))
}
