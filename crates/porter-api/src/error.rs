use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use porter_types::ServiceError;

/// Newtype over [`ServiceError`] so service failures can flow out of handlers
/// with `?` and render as `{ "message": … }` with the right status code.
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn join(e: tokio::task::JoinError) -> Self {
        error!("spawn_blocking join error: {}", e);
        Self(ServiceError::internal(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ServiceError::Validation(_) | ServiceError::SelfAccept | ServiceError::Capacity(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            ServiceError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            ServiceError::Authorization(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            ServiceError::Transaction(detail) => {
                error!("transaction failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "transaction failed".to_string())
            }
            ServiceError::Internal(err) => {
                error!("internal error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        let cases = [
            (ServiceError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ServiceError::SelfAccept, StatusCode::BAD_REQUEST),
            (ServiceError::Capacity(5), StatusCode::BAD_REQUEST),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT),
            (ServiceError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (ServiceError::Authorization("no".into()), StatusCode::FORBIDDEN),
            (
                ServiceError::Transaction("rollback".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
