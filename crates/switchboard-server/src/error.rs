//! Domain error to HTTP response adapter

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use switchboard_core::ProxyError;

/// Wrapper making `ProxyError` usable as an axum rejection.
pub struct ApiError(pub ProxyError);

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.0.to_body())).into_response();
        if let Some(retry_after) = self.0.retry_after() {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError(ProxyError::RateLimit {
            message: "quota".to_string(),
            retry_after_secs: Some(30),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }

    #[test]
    fn test_invalid_request_maps_to_400() {
        let response =
            ApiError(ProxyError::InvalidRequest("Project name not set".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
