use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use courier_types::api::ErrorResponse;

use crate::dispatcher::DispatchError;

/// Everything a messaging handler can answer with besides success. Every
/// variant renders as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("malformed request body: {}", .0.body_text())]
    MalformedBody(#[from] JsonRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Dispatch(e) => e.into_response(),
            ApiError::MalformedBody(ref rejection) => {
                let status = rejection.status();
                (status, Json(ErrorResponse { error: self.to_string() })).into_response()
            }
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
