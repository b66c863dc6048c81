//! Snapshot publication.
//!
//! The collected entity store is published as one JSON snapshot envelope:
//! agent version, timestamp, a stable instance id derived from the target
//! host and port, and the entity list with their sample sets.

use crate::inventory::{Entity, EntityStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use thiserror::Error;

/// Errors that can occur during publication
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Snapshot serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Snapshot write failed: {0}")]
    WriteError(#[from] std::io::Error),
}

/// One published collection snapshot
#[derive(Debug, Serialize)]
pub struct Snapshot<'a> {
    /// Agent version
    pub agent_version: &'static str,

    /// Timestamp when the snapshot was assembled
    pub timestamp: DateTime<Utc>,

    /// Stable identifier for the monitored instance
    pub instance_id: String,

    /// Every entity populated during the run
    pub entities: Vec<&'a Entity>,
}

impl<'a> Snapshot<'a> {
    pub fn new(store: &'a EntityStore, host: &str, port: u16) -> Self {
        Self {
            agent_version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
            instance_id: generate_instance_id(&format!("{host}:{port}")),
            entities: store.entities().collect(),
        }
    }

    /// Serialize the snapshot to JSON
    pub fn to_json(&self) -> Result<String, PublishError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize the snapshot to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, PublishError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot to the given writer, newline-terminated
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), PublishError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Generate a stable instance ID from connection info
fn generate_instance_id(connection_info: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connection_info.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16]) // Use first 16 bytes for shorter ID
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::EntityKind;

    fn store_with_database() -> EntityStore {
        let mut store = EntityStore::new();
        let entity = store.entity_mut("orders", EntityKind::Database, Vec::new());
        entity
            .sample_mut("PostgresqlDatabaseSample")
            .set_attribute("displayName", "orders");
        store
    }

    #[test]
    fn test_instance_id_generation() {
        let id1 = generate_instance_id("localhost:5432");
        let id2 = generate_instance_id("localhost:5432");
        let id3 = generate_instance_id("localhost:5433");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert_eq!(id1.len(), 32); // 16 bytes = 32 hex chars
    }

    #[test]
    fn test_snapshot_serialization() {
        let store = store_with_database();
        let snapshot = Snapshot::new(&store, "localhost", 5432);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("agent_version"));
        assert!(json.contains("pg-database"));
        assert!(json.contains("PostgresqlDatabaseSample"));
    }

    #[test]
    fn test_write_to_is_newline_terminated() {
        let store = store_with_database();
        let snapshot = Snapshot::new(&store, "localhost", 5432);

        let mut out = Vec::new();
        snapshot.write_to(&mut out, false).unwrap();
        assert_eq!(out.last(), Some(&b'\n'));

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["entities"][0]["name"], "orders");
    }
}
