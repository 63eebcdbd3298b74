use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::ApiError;
use crate::AppState;

/// Requires `Authorization: Bearer <admin.token>`.
///
/// An empty configured token rejects every request, so the admin API is
/// closed unless explicitly configured.
pub async fn admin_auth_middleware(req: Request<Body>, next: Next) -> Response {
    let Some(state) = req.extensions().get::<Arc<AppState>>().cloned() else {
        return ApiError::InternalServerError("application state missing".to_string())
            .into_response();
    };
    let expected = state.config.admin.token.as_str();

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !expected.is_empty() && constant_time_eq(token, expected));

    if authorized {
        return next.run(req).await;
    }
    tracing::warn!(uri = %req.uri(), "rejected admin request");
    ApiError::Unauthorized.into_response()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
