use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::fingerprint::ValidationError;
use crate::handlers::json_message;
use crate::store::StoreError;

pub const DUPLICATE_MESSAGE: &str =
    "Requisições repetidas não são permitidas em um intervalo de 10 minutos!";
pub const FORBIDDEN_MESSAGE: &str = "Operação proibida em ambiente de produção!";
pub const NOT_FOUND_MESSAGE: &str = "Método e/ou rota não encontrado!";
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str =
    "Corpo da requisição excede o tamanho máximo permitido!";

/// Everything a handler can fail with. The `Display` text is what the client
/// sees in the `message` field.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{}", DUPLICATE_MESSAGE)]
    Duplicate,

    #[error("{}", FORBIDDEN_MESSAGE)]
    Forbidden,

    #[error("{}", NOT_FOUND_MESSAGE)]
    NotFound,

    #[error("{}", PAYLOAD_TOO_LARGE_MESSAGE)]
    PayloadTooLarge,

    /// Store failure. `message` is shown to the client; `source` is only
    /// logged.
    #[error("{message}")]
    Store {
        message: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    pub fn store(message: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::Forbidden => ApiError::Forbidden,
            source => ApiError::Store { message, source },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Duplicate | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Store { source, .. } = &self {
            tracing::error!(error = %source, "store operation failed");
        }
        json_message(self.status_code(), false, &self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOp;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::Duplicate.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        let store = ApiError::store("x", StoreError::backend(StoreOp::Find, "down"));
        assert_eq!(store.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn forbidden_store_error_maps_to_forbidden() {
        let err = ApiError::store("x", StoreError::Forbidden);
        assert!(matches!(err, ApiError::Forbidden));
        assert_eq!(err.to_string(), FORBIDDEN_MESSAGE);
    }

    #[test]
    fn store_message_hides_backend_details() {
        let err = ApiError::store(
            "Erro ao registrar a requisição!",
            StoreError::backend(StoreOp::Insert, "connection reset"),
        );
        assert_eq!(err.to_string(), "Erro ao registrar a requisição!");
    }
}
