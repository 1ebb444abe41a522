use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::store::{Operation, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("could not connect to the product store")]
    Connection,
    #[error("{operation} failed on the productos collection")]
    Operation { operation: Operation },
    #[error("failed to render view {view}")]
    Render { view: &'static str },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Connection | AppError::Operation { .. } | AppError::Render { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn product_not_found(id: u64) -> Self {
        AppError::NotFound(format!("product {id} not found"))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(reason) => {
                error!(reason = %reason, "store connection failed");
                AppError::Connection
            }
            StoreError::Operation { operation, .. } => AppError::Operation { operation },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
