//! Ingress error tier (§7 tier 1): auth/scope/validation failures, mapped to
//! the one-line JSON error body every HTTP handler in this crate returns.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("{0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Routing(#[from] homecast_routing::Error),
}

impl From<homecast_scope::Error> for IngressError {
    fn from(err: homecast_scope::Error) -> Self {
        use homecast_scope::Error as E;
        match err {
            E::InvalidHomeId(_) => IngressError::BadRequest(err.to_string()),
            E::HomeNotFound(_) => IngressError::NotFound(err.to_string()),
            E::AuthRequired | E::InvalidToken => IngressError::Unauthorized,
            E::SubjectMismatch => IngressError::Forbidden(err.to_string()),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngressError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngressError::Forbidden(_) => StatusCode::FORBIDDEN,
            IngressError::NotFound(_) => StatusCode::NOT_FOUND,
            IngressError::Routing(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
