//! Callbridge server binary.
//!
//! Starts the axum HTTP server with structured logging, database
//! initialization, and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use callbridge_server::background::start_voicemail_sweep;
use callbridge_server::call::CallRegistry;
use callbridge_server::config::{load_config, Config};
use callbridge_server::telephony::{RestCallControl, TelephonyControl};
use callbridge_server::{app, build_tool_registry, initial_policy, AppState};
use callbridge_voice::SttService;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );
    tracing::debug!(config = ?config, "effective configuration");

    let pool = callbridge_db::create_pool(
        &config.database.path,
        callbridge_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool: check database.path in config");

    let policy = {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            callbridge_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
        initial_policy(&conn, &config).expect("failed to load service policy")
    };
    tracing::info!(
        min_confidence = policy.confidence.min_confidence,
        action = policy.confidence.low_confidence_action.label(),
        enabled_tools = ?policy.enabled_tools,
        "service policy loaded"
    );

    let tools = build_tool_registry(&config, pool.clone())
        .expect("failed to build tool registry: check knowledge and notification URLs");

    let telephony: Arc<dyn TelephonyControl> = Arc::new(
        RestCallControl::from_config(&config)
            .expect("failed to build telephony client: check telephony config"),
    );

    let stt = SttService::from_config(&config.stt);
    if !stt.is_configured() {
        tracing::warn!("no transcription binary configured, voicemails will not be transcribed");
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = AppState {
        pool,
        config: Arc::new(config),
        calls: CallRegistry::new(),
        tools: Arc::new(tools),
        telephony,
        stt: Arc::new(stt),
        policy: Arc::new(RwLock::new(policy)),
        http: reqwest::Client::new(),
    };

    tokio::spawn(start_voicemail_sweep(Arc::new(state.clone())));

    tracing::info!(%addr, "starting callbridge server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("callbridge server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
