//! Typed row records for PostgreSQL metric queries.
//!
//! Each query definition decodes its result set into exactly one of these
//! structs. A record exposes its identity fields (database, schema, table,
//! index names — whichever it carries) through the [`MetricRow`] accessors,
//! and its metric fields through [`MetricRow::metrics`] with the declared
//! gauge/counter/attribute semantics.

use crate::inventory::{Metric, MetricKind, MetricValue};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// The capability every decoded record implements.
///
/// Domains call only the identity accessors relevant to them; a `None`
/// from an accessor the domain needs is reported by the orchestrator and
/// substituted with an empty identity component.
pub trait MetricRow: Send {
    fn database_name(&self) -> Option<&str> {
        None
    }

    fn schema_name(&self) -> Option<&str> {
        None
    }

    fn table_name(&self) -> Option<&str> {
        None
    }

    fn index_name(&self) -> Option<&str> {
        None
    }

    /// The annotated metric fields this record carries. Fields decoded as
    /// NULL are omitted.
    fn metrics(&self) -> Vec<Metric>;
}

fn metric<V: Into<MetricValue>>(
    name: &'static str,
    kind: MetricKind,
    value: Option<V>,
) -> Option<Metric> {
    value.map(|v| Metric {
        name,
        kind,
        value: v.into(),
    })
}

fn gauge<V: Into<MetricValue>>(name: &'static str, value: Option<V>) -> Option<Metric> {
    metric(name, MetricKind::Gauge, value)
}

fn counter<V: Into<MetricValue>>(name: &'static str, value: Option<V>) -> Option<Metric> {
    metric(name, MetricKind::Counter, value)
}

fn attribute<V: Into<MetricValue>>(name: &'static str, value: Option<V>) -> Option<Metric> {
    metric(name, MetricKind::Attribute, value)
}

fn timestamp(name: &'static str, value: Option<DateTime<Utc>>) -> Option<Metric> {
    attribute(name, value.map(|t| t.to_rfc3339()))
}

/// Background writer activity, `pg_stat_bgwriter` (pre-17 layout)
#[derive(Debug, FromRow)]
pub struct BgWriterRow {
    pub checkpoints_timed: Option<i64>,
    pub checkpoints_req: Option<i64>,
    pub buffers_checkpoint: Option<i64>,
    pub buffers_clean: Option<i64>,
    pub maxwritten_clean: Option<i64>,
    pub buffers_backend: Option<i64>,
    pub buffers_alloc: Option<i64>,
}

impl MetricRow for BgWriterRow {
    fn metrics(&self) -> Vec<Metric> {
        [
            counter("bgwriter.checkpointsScheduledPerSecond", self.checkpoints_timed),
            counter("bgwriter.checkpointsRequestedPerSecond", self.checkpoints_req),
            counter(
                "bgwriter.buffersWrittenForCheckpointsPerSecond",
                self.buffers_checkpoint,
            ),
            counter(
                "bgwriter.buffersWrittenByBackgroundWriterPerSecond",
                self.buffers_clean,
            ),
            counter("bgwriter.backgroundWriterStopsPerSecond", self.maxwritten_clean),
            counter("bgwriter.buffersWrittenByBackendPerSecond", self.buffers_backend),
            counter("bgwriter.buffersAllocatedPerSecond", self.buffers_alloc),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Backend fsync calls, `pg_stat_bgwriter` on 9.1+
#[derive(Debug, FromRow)]
pub struct BgWriterFsyncRow {
    pub buffers_backend_fsync: Option<i64>,
}

impl MetricRow for BgWriterFsyncRow {
    fn metrics(&self) -> Vec<Metric> {
        [counter(
            "bgwriter.backendFsyncCallsPerSecond",
            self.buffers_backend_fsync,
        )]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Checkpoint timing, `pg_stat_bgwriter` on 9.2+
#[derive(Debug, FromRow)]
pub struct CheckpointTimingRow {
    pub checkpoint_write_time: Option<f64>,
    pub checkpoint_sync_time: Option<f64>,
}

impl MetricRow for CheckpointTimingRow {
    fn metrics(&self) -> Vec<Metric> {
        [
            counter(
                "bgwriter.checkpointWriteTimeInMilliseconds",
                self.checkpoint_write_time,
            ),
            counter(
                "bgwriter.checkpointSyncTimeInMilliseconds",
                self.checkpoint_sync_time,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Checkpointer activity, `pg_stat_checkpointer` on 17+
#[derive(Debug, FromRow)]
pub struct CheckpointerRow {
    pub num_timed: Option<i64>,
    pub num_requested: Option<i64>,
    pub write_time: Option<f64>,
    pub sync_time: Option<f64>,
    pub buffers_written: Option<i64>,
}

impl MetricRow for CheckpointerRow {
    fn metrics(&self) -> Vec<Metric> {
        [
            counter("checkpointer.checkpointsScheduledPerSecond", self.num_timed),
            counter("checkpointer.checkpointsRequestedPerSecond", self.num_requested),
            counter("checkpointer.checkpointWriteTimeInMilliseconds", self.write_time),
            counter("checkpointer.checkpointSyncTimeInMilliseconds", self.sync_time),
            counter(
                "checkpointer.buffersWrittenForCheckpointsPerSecond",
                self.buffers_written,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Per-database activity, `pg_stat_database`
#[derive(Debug, FromRow)]
pub struct DatabaseStatsRow {
    pub database: String,
    pub database_size: Option<i64>,
    pub numbackends: Option<i32>,
    pub xact_commit: Option<i64>,
    pub xact_rollback: Option<i64>,
    pub blks_read: Option<i64>,
    pub blks_hit: Option<i64>,
    pub tup_returned: Option<i64>,
    pub tup_fetched: Option<i64>,
    pub tup_inserted: Option<i64>,
    pub tup_updated: Option<i64>,
    pub tup_deleted: Option<i64>,
}

impl MetricRow for DatabaseStatsRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            gauge("db.sizeInBytes", self.database_size),
            gauge("db.connections", self.numbackends),
            counter("db.commitsPerSecond", self.xact_commit),
            counter("db.rollbacksPerSecond", self.xact_rollback),
            counter("db.readsPerSecond", self.blks_read),
            counter("db.bufferHitsPerSecond", self.blks_hit),
            counter("db.rowsReturnedPerSecond", self.tup_returned),
            counter("db.rowsFetchedPerSecond", self.tup_fetched),
            counter("db.rowsInsertedPerSecond", self.tup_inserted),
            counter("db.rowsUpdatedPerSecond", self.tup_updated),
            counter("db.rowsDeletedPerSecond", self.tup_deleted),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Per-database I/O and contention, `pg_stat_database` on 9.2+
#[derive(Debug, FromRow)]
pub struct DatabaseIoRow {
    pub database: String,
    pub temp_files: Option<i64>,
    pub temp_bytes: Option<i64>,
    pub deadlocks: Option<i64>,
    pub blk_read_time: Option<f64>,
    pub blk_write_time: Option<f64>,
}

impl MetricRow for DatabaseIoRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            counter("db.tempFilesCreatedPerSecond", self.temp_files),
            counter("db.tempWrittenInBytesPerSecond", self.temp_bytes),
            counter("db.deadlocksPerSecond", self.deadlocks),
            counter("db.readTimeInMilliseconds", self.blk_read_time),
            counter("db.writeTimeInMilliseconds", self.blk_write_time),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Lock counts per database, pivoted by lock mode via `crosstab()`.
///
/// The database name comes from a right join and can be NULL for backends
/// not attached to a database.
#[derive(Debug, FromRow)]
pub struct DatabaseLockRow {
    pub database: Option<String>,
    pub access_exclusive_lock: Option<i64>,
    pub access_share_lock: Option<i64>,
    pub exclusive_lock: Option<i64>,
    pub row_exclusive_lock: Option<i64>,
    pub row_share_lock: Option<i64>,
    pub share_lock: Option<i64>,
    pub share_row_exclusive_lock: Option<i64>,
    pub share_update_exclusive_lock: Option<i64>,
}

impl MetricRow for DatabaseLockRow {
    fn database_name(&self) -> Option<&str> {
        self.database.as_deref()
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            gauge("db.locks.accessExclusiveLock", self.access_exclusive_lock),
            gauge("db.locks.accessShareLock", self.access_share_lock),
            gauge("db.locks.exclusiveLock", self.exclusive_lock),
            gauge("db.locks.rowExclusiveLock", self.row_exclusive_lock),
            gauge("db.locks.rowShareLock", self.row_share_lock),
            gauge("db.locks.shareLock", self.share_lock),
            gauge("db.locks.shareRowExclusiveLock", self.share_row_exclusive_lock),
            gauge(
                "db.locks.shareUpdateExclusiveLock",
                self.share_update_exclusive_lock,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Per-table activity, `pg_stat_user_tables`
#[derive(Debug, FromRow)]
pub struct TableStatsRow {
    pub database: String,
    pub schema_name: String,
    pub table_name: String,
    pub seq_scan: Option<i64>,
    pub seq_tup_read: Option<i64>,
    pub idx_scan: Option<i64>,
    pub idx_tup_fetch: Option<i64>,
    pub n_tup_ins: Option<i64>,
    pub n_tup_upd: Option<i64>,
    pub n_tup_del: Option<i64>,
    pub n_live_tup: Option<i64>,
    pub n_dead_tup: Option<i64>,
    pub last_vacuum: Option<DateTime<Utc>>,
    pub last_autovacuum: Option<DateTime<Utc>>,
}

impl MetricRow for TableStatsRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn schema_name(&self) -> Option<&str> {
        Some(&self.schema_name)
    }

    fn table_name(&self) -> Option<&str> {
        Some(&self.table_name)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            counter("table.sequentialScansPerSecond", self.seq_scan),
            counter("table.sequentialScanRowsFetchedPerSecond", self.seq_tup_read),
            counter("table.indexScansPerSecond", self.idx_scan),
            counter("table.indexScanRowsFetchedPerSecond", self.idx_tup_fetch),
            counter("table.rowsInsertedPerSecond", self.n_tup_ins),
            counter("table.rowsUpdatedPerSecond", self.n_tup_upd),
            counter("table.rowsDeletedPerSecond", self.n_tup_del),
            gauge("table.liveRows", self.n_live_tup),
            gauge("table.deadRows", self.n_dead_tup),
            timestamp("table.lastVacuum", self.last_vacuum),
            timestamp("table.lastAutoVacuum", self.last_autovacuum),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Total on-disk table size, `pg_class`
#[derive(Debug, FromRow)]
pub struct TableSizeRow {
    pub database: String,
    pub schema_name: String,
    pub table_name: String,
    pub table_size: Option<i64>,
}

impl MetricRow for TableSizeRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn schema_name(&self) -> Option<&str> {
        Some(&self.schema_name)
    }

    fn table_name(&self) -> Option<&str> {
        Some(&self.table_name)
    }

    fn metrics(&self) -> Vec<Metric> {
        [gauge("table.totalSizeInBytes", self.table_size)]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Per-index activity, `pg_stat_user_indexes`
#[derive(Debug, FromRow)]
pub struct IndexStatsRow {
    pub database: String,
    pub schema_name: String,
    pub table_name: String,
    pub index_name: String,
    pub index_size: Option<i64>,
    pub idx_scan: Option<i64>,
    pub idx_tup_read: Option<i64>,
    pub idx_tup_fetch: Option<i64>,
}

impl MetricRow for IndexStatsRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn schema_name(&self) -> Option<&str> {
        Some(&self.schema_name)
    }

    fn table_name(&self) -> Option<&str> {
        Some(&self.table_name)
    }

    fn index_name(&self) -> Option<&str> {
        Some(&self.index_name)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            gauge("index.sizeInBytes", self.index_size),
            counter("index.scansPerSecond", self.idx_scan),
            counter("index.entriesReadPerSecond", self.idx_tup_read),
            counter("index.rowsFetchedPerSecond", self.idx_tup_fetch),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Per-index block I/O, `pg_statio_user_indexes`
#[derive(Debug, FromRow)]
pub struct IndexIoRow {
    pub database: String,
    pub schema_name: String,
    pub table_name: String,
    pub index_name: String,
    pub idx_blks_read: Option<i64>,
    pub idx_blks_hit: Option<i64>,
}

impl MetricRow for IndexIoRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn schema_name(&self) -> Option<&str> {
        Some(&self.schema_name)
    }

    fn table_name(&self) -> Option<&str> {
        Some(&self.table_name)
    }

    fn index_name(&self) -> Option<&str> {
        Some(&self.index_name)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            counter("index.blockReadsPerSecond", self.idx_blks_read),
            counter("index.blockHitsPerSecond", self.idx_blks_hit),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// PgBouncer traffic totals, `SHOW STATS`
#[derive(Debug, FromRow)]
pub struct PgBouncerStatsRow {
    pub database: String,
    pub total_xact_count: Option<i64>,
    pub total_query_count: Option<i64>,
    pub total_received: Option<i64>,
    pub total_sent: Option<i64>,
    pub total_xact_time: Option<i64>,
    pub total_query_time: Option<i64>,
    pub avg_xact_count: Option<i64>,
    pub avg_query_count: Option<i64>,
    pub avg_recv: Option<i64>,
    pub avg_sent: Option<i64>,
    pub avg_xact_time: Option<i64>,
    pub avg_query_time: Option<i64>,
}

impl MetricRow for PgBouncerStatsRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            counter("pgbouncer.stats.transactionsPerSecond", self.total_xact_count),
            counter("pgbouncer.stats.queriesPerSecond", self.total_query_count),
            counter("pgbouncer.stats.bytesInPerSecond", self.total_received),
            counter("pgbouncer.stats.bytesOutPerSecond", self.total_sent),
            counter(
                "pgbouncer.stats.totalTransactionDurationInMicroseconds",
                self.total_xact_time,
            ),
            counter(
                "pgbouncer.stats.totalQueryDurationInMicroseconds",
                self.total_query_time,
            ),
            gauge("pgbouncer.stats.avgTransactionCount", self.avg_xact_count),
            gauge("pgbouncer.stats.avgQueryCount", self.avg_query_count),
            gauge("pgbouncer.stats.avgBytesIn", self.avg_recv),
            gauge("pgbouncer.stats.avgBytesOut", self.avg_sent),
            gauge(
                "pgbouncer.stats.avgTransactionDurationInMicroseconds",
                self.avg_xact_time,
            ),
            gauge(
                "pgbouncer.stats.avgQueryDurationInMicroseconds",
                self.avg_query_time,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// PgBouncer pool occupancy, `SHOW POOLS`
#[derive(Debug, FromRow)]
pub struct PgBouncerPoolsRow {
    pub database: String,
    #[sqlx(rename = "user")]
    pub user_name: Option<String>,
    pub cl_active: Option<i32>,
    pub cl_waiting: Option<i32>,
    pub sv_active: Option<i32>,
    pub sv_idle: Option<i32>,
    pub sv_used: Option<i32>,
    pub sv_tested: Option<i32>,
    pub sv_login: Option<i32>,
    pub maxwait: Option<i32>,
}

impl MetricRow for PgBouncerPoolsRow {
    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn metrics(&self) -> Vec<Metric> {
        [
            attribute("user", self.user_name.as_deref()),
            gauge("pgbouncer.pools.clientConnectionsActive", self.cl_active),
            gauge("pgbouncer.pools.clientConnectionsWaiting", self.cl_waiting),
            gauge("pgbouncer.pools.serverConnectionsActive", self.sv_active),
            gauge("pgbouncer.pools.serverConnectionsIdle", self.sv_idle),
            gauge("pgbouncer.pools.serverConnectionsUsed", self.sv_used),
            gauge("pgbouncer.pools.serverConnectionsTested", self.sv_tested),
            gauge("pgbouncer.pools.serverConnectionsLogin", self.sv_login),
            gauge("pgbouncer.pools.maxwaitInSeconds", self.maxwait),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_fields_are_omitted() {
        let row = BgWriterRow {
            checkpoints_timed: Some(12),
            checkpoints_req: None,
            buffers_checkpoint: None,
            buffers_clean: None,
            maxwritten_clean: None,
            buffers_backend: None,
            buffers_alloc: Some(99),
        };

        let metrics = row.metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "bgwriter.checkpointsScheduledPerSecond");
        assert_eq!(metrics[0].value, MetricValue::Integer(12));
        assert_eq!(metrics[1].name, "bgwriter.buffersAllocatedPerSecond");
    }

    #[test]
    fn test_table_row_identity_accessors() {
        let row = TableStatsRow {
            database: "orders".to_string(),
            schema_name: "public".to_string(),
            table_name: "events".to_string(),
            seq_scan: Some(1),
            seq_tup_read: None,
            idx_scan: None,
            idx_tup_fetch: None,
            n_tup_ins: None,
            n_tup_upd: None,
            n_tup_del: None,
            n_live_tup: Some(100),
            n_dead_tup: Some(3),
            last_vacuum: None,
            last_autovacuum: None,
        };

        assert_eq!(row.database_name(), Some("orders"));
        assert_eq!(row.schema_name(), Some("public"));
        assert_eq!(row.table_name(), Some("events"));
        assert_eq!(row.index_name(), None);

        let live = row
            .metrics()
            .into_iter()
            .find(|m| m.name == "table.liveRows")
            .unwrap();
        assert_eq!(live.kind, MetricKind::Gauge);
        assert_eq!(live.value, MetricValue::Integer(100));
    }

    #[test]
    fn test_lock_row_database_can_be_absent() {
        let row = DatabaseLockRow {
            database: None,
            access_exclusive_lock: Some(0),
            access_share_lock: Some(4),
            exclusive_lock: None,
            row_exclusive_lock: None,
            row_share_lock: None,
            share_lock: None,
            share_row_exclusive_lock: None,
            share_update_exclusive_lock: None,
        };

        assert_eq!(row.database_name(), None);
        assert_eq!(row.metrics().len(), 2);
    }

    #[test]
    fn test_vacuum_timestamps_become_attributes() {
        let row = TableStatsRow {
            database: "orders".to_string(),
            schema_name: "public".to_string(),
            table_name: "events".to_string(),
            seq_scan: None,
            seq_tup_read: None,
            idx_scan: None,
            idx_tup_fetch: None,
            n_tup_ins: None,
            n_tup_upd: None,
            n_tup_del: None,
            n_live_tup: None,
            n_dead_tup: None,
            last_vacuum: Some(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
            last_autovacuum: None,
        };

        let vacuum = row
            .metrics()
            .into_iter()
            .find(|m| m.name == "table.lastVacuum")
            .unwrap();
        assert_eq!(vacuum.kind, MetricKind::Attribute);
        assert!(matches!(vacuum.value, MetricValue::Text(_)));
    }
}
