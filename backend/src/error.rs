use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::repositories::application_repository::StoreError;
use crate::utils::validation::ValidationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("rate limit exceeded, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration, window: Duration },

    #[error("application store failed: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the applicant. Server-side detail never leaves the process.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(e) => e.to_string(),
            AppError::MalformedBody(_) => "Corpo da requisição inválido".to_string(),
            AppError::RateLimited { window, .. } => {
                let minutes = (window.as_secs() / 60).max(1);
                format!("Muitas requisições. Tente novamente em {} minutos.", minutes)
            }
            AppError::Store(_) => "Erro ao salvar aplicação".to_string(),
            AppError::Internal(_) => "Erro interno do servidor".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Store(e) => error!("Erro ao inserir no Supabase: {:?}", e),
            AppError::Internal(e) => error!("Erro no servidor: {}", e),
            _ => {}
        }

        let status = self.status();
        let mut response = (status, Json(json!({"error": self.public_message()}))).into_response();

        if let AppError::RateLimited { retry_after, .. } = &self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after.as_secs().max(1)),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_by_kind() {
        assert_eq!(AppError::from(ValidationError::InvalidEmail).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::MalformedBody("eof".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::RateLimited { retry_after: Duration::from_secs(5), window: Duration::from_secs(900) }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::Store(StoreError::EmptyResponse).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_detail_is_not_exposed() {
        let err = AppError::Store(StoreError::Rejected {
            status: 401,
            body: "invalid service role key".into(),
        });
        assert_eq!(err.public_message(), "Erro ao salvar aplicação");
    }

    #[test]
    fn rate_limit_message_uses_window_minutes() {
        let err = AppError::RateLimited {
            retry_after: Duration::from_secs(42),
            window: Duration::from_secs(900),
        };
        assert_eq!(err.public_message(), "Muitas requisições. Tente novamente em 15 minutos.");

        let response = err.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
