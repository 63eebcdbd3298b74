//! Callbridge server: telephony webhooks, the media-stream bridge between
//! phone calls and the speech model, and the admin API.

pub mod api;
pub mod api_admin;
pub mod api_voice;
pub mod background;
pub mod bridge;
pub mod call;
pub mod config;
pub mod middleware;
pub mod telephony;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use callbridge_catalog::{latest_policy, CatalogError};
use callbridge_db::DbPool;
use callbridge_tools::{
    HttpKnowledgeSearch, KnowledgeRetriever, LogNotifier, NoKnowledge, Notifier,
    SimulatedPayments, ToolError, ToolRegistry, ToolServices, WebhookNotifier,
};
use callbridge_types::ServicePolicy;
use callbridge_voice::SttService;
use tower_http::trace::TraceLayer;

use crate::call::CallRegistry;
use crate::config::Config;
use crate::telephony::TelephonyControl;

/// Maximum request body size (256 KiB). Webhook and admin bodies are small.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    pub config: Arc<Config>,
    /// Live calls.
    pub calls: CallRegistry,
    /// Tool registry shared by every call.
    pub tools: Arc<ToolRegistry>,
    /// Call control on the telephony gateway.
    pub telephony: Arc<dyn TelephonyControl>,
    /// Voicemail transcription.
    pub stt: Arc<SttService>,
    /// Active service policy.
    ///
    /// Uses `std::sync::RwLock`: every acquisition is a short clone or
    /// assignment that never spans an `.await`.
    pub policy: Arc<RwLock<ServicePolicy>>,
    /// HTTP client for recording downloads.
    pub http: reqwest::Client,
}

impl AppState {
    /// A copy of the current policy. Calls take one when they connect.
    pub fn policy_snapshot(&self) -> ServicePolicy {
        match self.policy.read() {
            Ok(policy) => policy.clone(),
            Err(poisoned) => {
                tracing::error!("policy lock poisoned, reading last written value");
                poisoned.into_inner().clone()
            }
        }
    }
}

/// Builds the tool registry and its collaborators from configuration.
///
/// # Errors
///
/// Returns `ToolError` if an HTTP collaborator client cannot be built.
pub fn build_tool_registry(config: &Config, pool: DbPool) -> Result<ToolRegistry, ToolError> {
    let external_timeout = Duration::from_secs(config.tools.timeout_secs.max(1));

    let knowledge: Arc<dyn KnowledgeRetriever> = if config.knowledge.search_url.is_empty() {
        tracing::warn!("no knowledge search endpoint configured, every question will be gated");
        Arc::new(NoKnowledge)
    } else {
        Arc::new(HttpKnowledgeSearch::new(
            config.knowledge.search_url.clone(),
            external_timeout,
        )?)
    };

    let notifier: Arc<dyn Notifier> = if config.notifications.webhook_url.is_empty() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(WebhookNotifier::new(
            config.notifications.webhook_url.clone(),
            external_timeout,
        )?)
    };

    let services = Arc::new(ToolServices {
        pool,
        knowledge,
        payments: Arc::new(SimulatedPayments::new()),
        notifier,
        external_timeout,
        max_candidates: config.knowledge.max_candidates.max(1),
    });

    // A tool makes at most a few bounded external calls.
    Ok(ToolRegistry::with_defaults(services, external_timeout * 3))
}

/// The policy in force at startup: the last saved version, else the
/// configured threshold and tool list.
pub fn initial_policy(
    conn: &rusqlite::Connection,
    config: &Config,
) -> Result<ServicePolicy, CatalogError> {
    if let Some(saved) = latest_policy(conn)? {
        return Ok(saved);
    }
    Ok(ServicePolicy {
        confidence: config.policy,
        enabled_tools: config.tools.enabled.clone(),
    })
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/api/admin/policy",
            get(api_admin::get_policy_handler).put(api_admin::update_policy_handler),
        )
        .route("/api/admin/calls", get(api_admin::list_calls_handler))
        .layer(axum::middleware::from_fn(middleware::admin_auth_middleware));

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/voice/incoming", post(api_voice::incoming_call_handler))
        .route("/voice/status", post(api_voice::status_callback_handler))
        .route(
            "/voice/recording",
            post(api_voice::recording_callback_handler),
        )
        .route("/media-stream", get(bridge::media_stream_handler))
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
