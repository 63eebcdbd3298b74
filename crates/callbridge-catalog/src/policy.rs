//! Persisted versions of the service policy.

use callbridge_types::ServicePolicy;
use rusqlite::{params, Connection, OptionalExtension};

use crate::CatalogError;

/// Appends a policy version and returns its ID.
pub fn save_policy_version(
    conn: &Connection,
    policy: &ServicePolicy,
) -> Result<String, CatalogError> {
    let version_id = uuid::Uuid::new_v4().to_string();
    let policy_json = serde_json::to_string(policy)?;
    conn.execute(
        "INSERT INTO policy_versions (version_id, policy_json) VALUES (?1, ?2)",
        params![version_id, policy_json],
    )?;
    Ok(version_id)
}

/// The most recently saved policy, if any.
pub fn latest_policy(conn: &Connection) -> Result<Option<ServicePolicy>, CatalogError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT policy_json FROM policy_versions ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j))
        .transpose()
        .map_err(CatalogError::from)
}
