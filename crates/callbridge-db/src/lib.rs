//! Database layer for the callbridge service.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. The catalog, caller records, audit log and
//! policy history all live in tables created by this crate.
//!
//! - **WAL mode** lets the audit writers and the purchase path proceed while
//!   admin reads are in flight.
//! - **Busy timeout** turns concurrent writers (two purchases racing for the
//!   last ticket) into a short wait instead of an immediate `SQLITE_BUSY`.
//! - **Embedded migrations** are compiled in with `include_str!`.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, with_conn, DbPool, DbRuntimeSettings, PoolError};
