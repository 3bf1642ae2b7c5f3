use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::billing::{GatewayError, LimitExceeded, TransactionsError};
use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<CatalogError> for AppError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound(_) => AppError::NotFound,
            CatalogError::Invalid(message) => AppError::BadRequest(message),
            CatalogError::LimitExceeded(limit) => AppError::LimitExceeded(limit),
            CatalogError::Store(err) => AppError::Internal(err),
        }
    }
}

impl From<TransactionsError> for AppError {
    fn from(error: TransactionsError) -> Self {
        match error {
            TransactionsError::NoSubscription => AppError::NotFound,
            TransactionsError::Gateway(err) => AppError::Gateway(err),
            TransactionsError::Store(err) => AppError::Internal(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::LimitExceeded(_) => StatusCode::FORBIDDEN,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
