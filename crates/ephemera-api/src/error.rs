use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::FORBIDDEN, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::SERVICE_UNAVAILABLE, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ephemera_store::StoreError> for ApiError {
    fn from(e: ephemera_store::StoreError) -> Self {
        match e {
            ephemera_store::StoreError::EnvironmentNotFound(msg) => ApiError::not_found(msg),
            ephemera_store::StoreError::DeploymentNotFound(msg) => ApiError::not_found(msg),
            ephemera_store::StoreError::Domain(e) => ApiError::bad_request(e.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<ephemera_controller::ControllerError> for ApiError {
    fn from(e: ephemera_controller::ControllerError) -> Self {
        match e {
            ephemera_controller::ControllerError::EnvironmentNotFound(msg) => ApiError::not_found(msg),
            ephemera_controller::ControllerError::MalformedEvent(msg) => ApiError::bad_request(msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}
