use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pointroom_protocol::ErrorKind;
use pointroom_services::ServiceError;
use serde::Serialize;

/// HTTP face of [`ServiceError`]. The body uses the same `error` kinds as
/// WebSocket error events.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotAuthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::TransientIo => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if !self.0.is_client_error() {
            tracing::warn!(?kind, error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: kind,
            message: self.0.to_string(),
        };
        (status_of(kind), Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_a_distinct_status() {
        let cases = [
            (ServiceError::Validation("x".into()), 400),
            (ServiceError::NotAuthenticated, 401),
            (ServiceError::Authorization("x".into()), 403),
            (ServiceError::NotFound("x".into()), 404),
            (ServiceError::Conflict("x".into()), 409),
            (ServiceError::TransientIo("x".into()), 503),
            (ServiceError::Internal("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).into_response().status().as_u16(), code);
        }
    }
}
