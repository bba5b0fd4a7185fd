use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;

use crate::AppState;
use crate::error::ApiError;
use crate::handlers::json_message;
use crate::store::StoreError;
use crate::store::bootstrap;

const RESET_MESSAGE: &str = "Reinicialização da API realizada com sucesso!";
const RESET_FAILED_MESSAGE: &str = "Erro ao preparar API para reinicialização!";

/// DELETE /reset — wipe the request collection. Refused in production.
pub async fn reset(State(state): State<AppState>) -> Result<Response, ApiError> {
    match bootstrap::reset(&state.store, state.config.environment).await {
        Ok(()) => Ok(json_message(StatusCode::OK, true, RESET_MESSAGE)),
        Err(StoreError::Forbidden) => {
            tracing::warn!("reset refused in production mode");
            Err(ApiError::Forbidden)
        }
        Err(e) => Err(ApiError::store(RESET_FAILED_MESSAGE, e)),
    }
}
