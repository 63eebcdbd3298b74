#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callbridge_catalog::{add_tier, create_event, CreateEventParams};
use callbridge_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use callbridge_tools::{
    KnowledgeRetriever, Notification, Notifier, SimulatedPayments, ToolContext, ToolError,
    ToolRegistry, ToolServices,
};
use callbridge_types::{Language, RetrievalCandidate, ServicePolicy};
use chrono::{Duration as ChronoDuration, Utc};
use tempfile::NamedTempFile;

pub struct Fixture {
    _db: NamedTempFile,
    pub pool: DbPool,
    pub payments: Arc<SimulatedPayments>,
    pub notifier: Arc<RecordingNotifier>,
    pub registry: ToolRegistry,
}

pub fn fixture() -> Fixture {
    fixture_with(Arc::new(FixedKnowledge(Vec::new())), Arc::new(RecordingNotifier::default()))
}

pub fn fixture_with(
    knowledge: Arc<dyn KnowledgeRetriever>,
    notifier: Arc<RecordingNotifier>,
) -> Fixture {
    let db = NamedTempFile::new().expect("temp db");
    let pool = create_pool(
        db.path().to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("pool");
    run_migrations(&pool.get().expect("conn")).expect("migrations");

    let payments = Arc::new(SimulatedPayments::new());
    let services = Arc::new(ToolServices {
        pool: pool.clone(),
        knowledge,
        payments: payments.clone(),
        notifier: notifier.clone(),
        external_timeout: Duration::from_secs(1),
        max_candidates: 5,
    });
    let registry = ToolRegistry::with_defaults(services, Duration::from_secs(5));
    Fixture {
        _db: db,
        pool,
        payments,
        notifier,
        registry,
    }
}

pub fn ctx(call_sid: &str) -> Arc<ToolContext> {
    ctx_with_policy(call_sid, ServicePolicy::default())
}

pub fn ctx_with_policy(call_sid: &str, policy: ServicePolicy) -> Arc<ToolContext> {
    Arc::new(
        ToolContext::new(call_sid, Language::English, policy)
            .with_caller(Some("+15550001111".to_string())),
    )
}

/// Creates an event `days` days from now with `(tier, price_cents, capacity, sold)` tiers.
pub fn seed_event(pool: &DbPool, event_id: &str, name: &str, days: i64, tiers: &[(&str, i64, i64, i64)]) {
    let conn = pool.get().expect("conn");
    create_event(
        &conn,
        &CreateEventParams {
            event_id: event_id.to_string(),
            name: name.to_string(),
            venue: "Main Hall".to_string(),
            description: format!("{name} description"),
            starts_at: Utc::now() + ChronoDuration::days(days),
            active: true,
        },
    )
    .expect("create event");
    for (tier, price, capacity, sold) in tiers {
        add_tier(&conn, event_id, tier, *price, *capacity).expect("add tier");
        conn.execute(
            "UPDATE ticket_tiers SET sold = ?1 WHERE event_id = ?2 AND tier = ?3",
            rusqlite::params![sold, event_id, tier],
        )
        .expect("set sold");
    }
}

pub fn sold(pool: &DbPool, event_id: &str, tier: &str) -> i64 {
    pool.get()
        .expect("conn")
        .query_row(
            "SELECT sold FROM ticket_tiers WHERE event_id = ?1 AND tier = ?2",
            rusqlite::params![event_id, tier],
            |row| row.get(0),
        )
        .expect("sold")
}

pub fn count(pool: &DbPool, table: &str) -> i64 {
    pool.get()
        .expect("conn")
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count")
}

pub struct FixedKnowledge(pub Vec<RetrievalCandidate>);

#[async_trait]
impl KnowledgeRetriever for FixedKnowledge {
    async fn search(
        &self,
        _question: &str,
        _language: Language,
        _limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, ToolError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub async fn wait_for(&self, n: usize) -> Vec<Notification> {
        for _ in 0..100 {
            let sent = self.sent.lock().unwrap().clone();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(ToolError::Notify("webhook unreachable".to_string()));
        }
        Ok(())
    }
}
