//! Admin API handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Extension, Json};
use callbridge_catalog::save_policy_version;
use callbridge_db::with_conn;
use callbridge_observe::{emit_or_warn, EventPayload};
use callbridge_types::ServicePolicy;
use serde::Serialize;

use crate::api::ApiError;
use crate::call::CallSummary;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdateResponse {
    pub status: &'static str,
    pub version_id: String,
    pub policy: ServicePolicy,
}

/// Handler for `GET /api/admin/policy`.
pub async fn get_policy_handler(Extension(state): Extension<Arc<AppState>>) -> Json<ServicePolicy> {
    Json(state.policy_snapshot())
}

/// Handler for `PUT /api/admin/policy`.
///
/// Validates and persists the policy as a new version, then swaps it in.
/// Calls already connected keep the policy they started with.
pub async fn update_policy_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(new_policy): Json<ServicePolicy>,
) -> Result<Json<PolicyUpdateResponse>, ApiError> {
    new_policy
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let known: BTreeSet<String> = state.tools.names().into_iter().collect();
    let unknown: Vec<&str> = new_policy
        .enabled_tools
        .iter()
        .filter(|t| !known.contains(*t))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "unknown tools: {}",
            unknown.join(", ")
        )));
    }

    let policy = new_policy.clone();
    let version_id = with_conn(&state.pool, move |conn| {
        let version_id = save_policy_version(conn, &policy)?;
        let payload = EventPayload::PolicyUpdated {
            version_id: version_id.clone(),
            min_confidence: policy.confidence.min_confidence,
            low_confidence_action: policy.confidence.low_confidence_action,
            enabled_tools: policy.enabled_tools.clone(),
        };
        emit_or_warn(conn, &version_id, &payload);
        Ok::<_, callbridge_catalog::CatalogError>(version_id)
    })
    .await?
    .map_err(|e| ApiError::InternalServerError(format!("failed to save policy: {}", e)))?;

    {
        let mut current = state
            .policy
            .write()
            .map_err(|_| ApiError::InternalServerError("policy lock poisoned".to_string()))?;
        *current = new_policy.clone();
    }

    tracing::info!(
        version_id = %version_id,
        min_confidence = new_policy.confidence.min_confidence,
        action = new_policy.confidence.low_confidence_action.label(),
        "service policy updated"
    );

    Ok(Json(PolicyUpdateResponse {
        status: "ok",
        version_id,
        policy: new_policy,
    }))
}

/// Handler for `GET /api/admin/calls`.
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<CallSummary>> {
    Json(state.calls.summaries())
}
