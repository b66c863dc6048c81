//! Monitored-entity inventory.
//!
//! Every metric collected during a run is attached to an entity: a named,
//! typed monitored object (instance, database, table, index, or PgBouncer
//! proxy) identified by its type plus an ordered list of identifying
//! attributes. Entities are deduplicated within a run — records that
//! resolve to the same identity share one entity.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while populating a metric sample
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("metric {name} is declared {kind} but carries non-numeric value {value:?}")]
    KindMismatch {
        name: &'static str,
        kind: MetricKind,
        value: MetricValue,
    },
}

/// The kinds of monitored object an entity can represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityKind {
    #[serde(rename = "pg-instance")]
    Instance,
    #[serde(rename = "pg-database")]
    Database,
    #[serde(rename = "pg-table")]
    Table,
    #[serde(rename = "pg-index")]
    Index,
    #[serde(rename = "pgbouncer")]
    PgBouncer,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Instance => "pg-instance",
            EntityKind::Database => "pg-database",
            EntityKind::Table => "pg-table",
            EntityKind::Index => "pg-index",
            EntityKind::PgBouncer => "pgbouncer",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identifying attribute of an entity, e.g. `host=db1.example.com`.
///
/// Order matters: identity attributes are compared as an ordered list,
/// outer scope first (host, port, database, schema, table).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IdAttribute {
    pub key: String,
    pub value: String,
}

impl IdAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Semantic type of a metric field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time measurement
    Gauge,
    /// Monotonically increasing total, reported for rate derivation
    Counter,
    /// Descriptive, non-numeric context
    Attribute,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => f.write_str("gauge"),
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Attribute => f.write_str("attribute"),
        }
    }
}

/// A metric value as decoded from a row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Integer(i64::from(v))
    }
}

impl From<u16> for MetricValue {
    fn from(v: u16) -> Self {
        MetricValue::Integer(i64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// One annotated metric field extracted from a record
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub value: MetricValue,
}

/// A named sample set attached to one entity.
///
/// Serializes in flattened form: `{"event_type": ..., "<metric>": <value>}`.
#[derive(Debug, Serialize)]
pub struct MetricSample {
    pub event_type: String,
    #[serde(flatten)]
    metrics: IndexMap<String, MetricValue>,
}

impl MetricSample {
    fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            metrics: IndexMap::new(),
        }
    }

    /// Set a display/context attribute. Attributes accept any value.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<MetricValue>) {
        self.metrics.insert(name.to_string(), value.into());
    }

    /// Copy one annotated metric field onto the sample.
    ///
    /// Gauges and counters must carry numeric values; a text value under
    /// either kind is rejected without touching the rest of the sample.
    pub fn set_metric(&mut self, metric: Metric) -> Result<(), SampleError> {
        match (metric.kind, &metric.value) {
            (MetricKind::Gauge | MetricKind::Counter, MetricValue::Text(_)) => {
                Err(SampleError::KindMismatch {
                    name: metric.name,
                    kind: metric.kind,
                    value: metric.value,
                })
            }
            _ => {
                self.metrics.insert(metric.name.to_string(), metric.value);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// A monitored object accumulating metric samples for one run
#[derive(Debug, Serialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub id_attributes: Vec<IdAttribute>,
    #[serde(rename = "metrics")]
    samples: Vec<MetricSample>,
}

impl Entity {
    fn new(name: &str, kind: EntityKind, id_attributes: Vec<IdAttribute>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            id_attributes,
            samples: Vec::new(),
        }
    }

    /// Fetch the sample set with the given event type, creating it if this
    /// entity does not carry one yet. Records resolving to the same entity
    /// merge their fields into the shared set.
    pub fn sample_mut(&mut self, event_type: &str) -> &mut MetricSample {
        match self.samples.iter().position(|s| s.event_type == event_type) {
            Some(idx) => &mut self.samples[idx],
            None => {
                self.samples.push(MetricSample::new(event_type));
                let last = self.samples.len() - 1;
                &mut self.samples[last]
            }
        }
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntityKey {
    kind: EntityKind,
    name: String,
    id_attributes: Vec<IdAttribute>,
}

/// Identity-keyed table of all entities created during one run.
///
/// Lookups are create-if-absent: two records with the same (kind, name,
/// identity attributes) triple resolve to the same entity.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<EntityKey, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_mut(
        &mut self,
        name: &str,
        kind: EntityKind,
        id_attributes: Vec<IdAttribute>,
    ) -> &mut Entity {
        let key = EntityKey {
            kind,
            name: name.to_string(),
            id_attributes: id_attributes.clone(),
        };
        self.entities
            .entry(key)
            .or_insert_with(|| Entity::new(name, kind, id_attributes))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities of one kind, mostly useful in summaries and tests.
    pub fn count_of_kind(&self, kind: EntityKind) -> usize {
        self.entities.values().filter(|e| e.kind == kind).count()
    }
}
