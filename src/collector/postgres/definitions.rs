//! Version-gated query definitions for every metric domain.
//!
//! Each definition pairs a SQL text with the record type its rows decode
//! into, fixed at construction. Generators are pure functions of the
//! resolved server version (and the topology, where relevant): they perform
//! no I/O, which keeps the gating logic independently testable.

use crate::collector::postgres::rows::{
    BgWriterFsyncRow, BgWriterRow, CheckpointTimingRow, CheckpointerRow, DatabaseIoRow,
    DatabaseLockRow, DatabaseStatsRow, IndexIoRow, IndexStatsRow, MetricRow, PgBouncerPoolsRow,
    PgBouncerStatsRow, TableSizeRow, TableStatsRow,
};
use crate::config::{DatabaseList, SchemaList};
use futures::future::BoxFuture;
use semver::Version;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::FromRow;
use std::borrow::Cow;

type FetchFn =
    for<'a> fn(&'a PgPool, &'a str) -> BoxFuture<'a, Result<Vec<Box<dyn MetricRow>>, sqlx::Error>>;

fn fetch_rows<'a, R>(
    pool: &'a PgPool,
    query: &'a str,
) -> BoxFuture<'a, Result<Vec<Box<dyn MetricRow>>, sqlx::Error>>
where
    R: MetricRow + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
{
    Box::pin(async move {
        let rows: Vec<R> = sqlx::query_as(query).fetch_all(pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(row) as Box<dyn MetricRow>)
            .collect())
    })
}

/// One version-gated metric query and its decode target.
///
/// A definition is eligible for a run iff the resolved server version lies
/// in `[min_version, max_version)`.
pub struct QueryDef {
    query: Cow<'static, str>,
    min_version: Option<Version>,
    max_version: Option<Version>,
    fetch: FetchFn,
}

impl QueryDef {
    fn new<R>(query: impl Into<Cow<'static, str>>) -> Self
    where
        R: MetricRow + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
    {
        Self {
            query: query.into(),
            min_version: None,
            max_version: None,
            fetch: fetch_rows::<R>,
        }
    }

    /// Inclusive lower version bound
    fn since(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Exclusive upper version bound
    fn until(mut self, version: Version) -> Self {
        self.max_version = Some(version);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self, version: &Version) -> bool {
        if let Some(min) = &self.min_version {
            if version < min {
                return false;
            }
        }
        if let Some(max) = &self.max_version {
            if version >= max {
                return false;
            }
        }
        true
    }

    /// Execute the query and decode all rows into this definition's record
    /// type
    pub async fn fetch(&self, pool: &PgPool) -> Result<Vec<Box<dyn MetricRow>>, sqlx::Error> {
        (self.fetch)(pool, &self.query).await
    }
}

const BGWRITER_QUERY: &str = "
SELECT
    checkpoints_timed,
    checkpoints_req,
    buffers_checkpoint,
    buffers_clean,
    maxwritten_clean,
    buffers_backend,
    buffers_alloc
FROM pg_stat_bgwriter";

const BGWRITER_FSYNC_QUERY: &str = "
SELECT buffers_backend_fsync FROM pg_stat_bgwriter";

const CHECKPOINT_TIMING_QUERY: &str = "
SELECT checkpoint_write_time, checkpoint_sync_time FROM pg_stat_bgwriter";

const CHECKPOINTER_QUERY: &str = "
SELECT num_timed, num_requested, write_time, sync_time, buffers_written
FROM pg_stat_checkpointer";

const DATABASE_STATS_QUERY: &str = "
SELECT
    D.datname AS database,
    pg_database_size(D.datname) AS database_size,
    SD.numbackends,
    SD.xact_commit,
    SD.xact_rollback,
    SD.blks_read,
    SD.blks_hit,
    SD.tup_returned,
    SD.tup_fetched,
    SD.tup_inserted,
    SD.tup_updated,
    SD.tup_deleted
FROM pg_database D
JOIN pg_stat_database SD ON SD.datname = D.datname
WHERE D.datistemplate = FALSE
  AND D.datname IN ({databases})";

const DATABASE_IO_QUERY: &str = "
SELECT
    D.datname AS database,
    SD.temp_files,
    SD.temp_bytes,
    SD.deadlocks,
    SD.blk_read_time,
    SD.blk_write_time
FROM pg_database D
JOIN pg_stat_database SD ON SD.datname = D.datname
WHERE D.datistemplate = FALSE
  AND D.datname IN ({databases})";

const DATABASE_LOCKS_QUERY: &str = "
SELECT * FROM crosstab(
    'SELECT D.datname, L.mode, count(*)
     FROM pg_database D
     LEFT JOIN pg_locks L ON D.oid = L.database
     WHERE D.datistemplate = FALSE AND D.datname IN ({databases})
     GROUP BY 1, 2
     ORDER BY 1',
    $$VALUES
        ('AccessExclusiveLock'),
        ('AccessShareLock'),
        ('ExclusiveLock'),
        ('RowExclusiveLock'),
        ('RowShareLock'),
        ('ShareLock'),
        ('ShareRowExclusiveLock'),
        ('ShareUpdateExclusiveLock')$$
) AS locks (
    database text,
    access_exclusive_lock bigint,
    access_share_lock bigint,
    exclusive_lock bigint,
    row_exclusive_lock bigint,
    row_share_lock bigint,
    share_lock bigint,
    share_row_exclusive_lock bigint,
    share_update_exclusive_lock bigint
)";

const TABLE_STATS_QUERY: &str = "
SELECT
    current_database() AS database,
    T.schemaname AS schema_name,
    T.relname AS table_name,
    T.seq_scan,
    T.seq_tup_read,
    T.idx_scan,
    T.idx_tup_fetch,
    T.n_tup_ins,
    T.n_tup_upd,
    T.n_tup_del,
    T.n_live_tup,
    T.n_dead_tup,
    T.last_vacuum,
    T.last_autovacuum
FROM pg_stat_user_tables T
WHERE T.schemaname = '{schema}'";

const TABLE_SIZE_PRE10_QUERY: &str = "
SELECT
    current_database() AS database,
    N.nspname AS schema_name,
    C.relname AS table_name,
    pg_total_relation_size(C.oid) AS table_size
FROM pg_class C
JOIN pg_namespace N ON N.oid = C.relnamespace
WHERE C.relkind = 'r'
  AND N.nspname = '{schema}'";

const TABLE_SIZE_QUERY: &str = "
SELECT
    current_database() AS database,
    N.nspname AS schema_name,
    C.relname AS table_name,
    pg_total_relation_size(C.oid) AS table_size
FROM pg_class C
JOIN pg_namespace N ON N.oid = C.relnamespace
WHERE C.relkind IN ('r', 'p')
  AND N.nspname = '{schema}'";

const INDEX_STATS_QUERY: &str = "
SELECT
    current_database() AS database,
    I.schemaname AS schema_name,
    I.relname AS table_name,
    I.indexrelname AS index_name,
    pg_relation_size(I.indexrelid) AS index_size,
    I.idx_scan,
    I.idx_tup_read,
    I.idx_tup_fetch
FROM pg_stat_user_indexes I
WHERE I.schemaname = '{schema}'";

const INDEX_IO_QUERY: &str = "
SELECT
    current_database() AS database,
    schemaname AS schema_name,
    relname AS table_name,
    indexrelname AS index_name,
    idx_blks_read,
    idx_blks_hit
FROM pg_statio_user_indexes
WHERE schemaname = '{schema}'";

const PGBOUNCER_STATS_QUERY: &str = "SHOW STATS";

const PGBOUNCER_POOLS_QUERY: &str = "SHOW POOLS";

/// Instance-level definitions. The bgwriter family was split into
/// `pg_stat_checkpointer` in PostgreSQL 17.
pub fn instance_definitions(version: &Version) -> Vec<QueryDef> {
    let defs = vec![
        QueryDef::new::<BgWriterRow>(BGWRITER_QUERY).until(Version::new(17, 0, 0)),
        QueryDef::new::<BgWriterFsyncRow>(BGWRITER_FSYNC_QUERY)
            .since(Version::new(9, 1, 0))
            .until(Version::new(17, 0, 0)),
        QueryDef::new::<CheckpointTimingRow>(CHECKPOINT_TIMING_QUERY)
            .since(Version::new(9, 2, 0))
            .until(Version::new(17, 0, 0)),
        QueryDef::new::<CheckpointerRow>(CHECKPOINTER_QUERY).since(Version::new(17, 0, 0)),
    ];
    retain_eligible(defs, version)
}

/// Database-level definitions, scoped to the configured databases
pub fn database_definitions(databases: &DatabaseList, version: &Version) -> Vec<QueryDef> {
    if databases.is_empty() {
        return Vec::new();
    }
    let scope = database_scope(databases);
    let defs = vec![
        QueryDef::new::<DatabaseStatsRow>(DATABASE_STATS_QUERY.replace("{databases}", &scope)),
        QueryDef::new::<DatabaseIoRow>(DATABASE_IO_QUERY.replace("{databases}", &scope))
            .since(Version::new(9, 2, 0)),
    ];
    retain_eligible(defs, version)
}

/// Lock definitions, scoped to the configured databases. Requires the
/// `tablefunc` extension for `crosstab()`; the orchestrator checks for it
/// before asking for these.
pub fn lock_definitions(databases: &DatabaseList, version: &Version) -> Vec<QueryDef> {
    if databases.is_empty() {
        return Vec::new();
    }
    // crosstab's inner query is itself a SQL string literal, so the scope
    // list needs its quotes doubled once more.
    let scope = quote_literal(&database_scope(databases));
    let defs = vec![QueryDef::new::<DatabaseLockRow>(
        DATABASE_LOCKS_QUERY.replace("{databases}", &scope),
    )];
    retain_eligible(defs, version)
}

/// Table definitions for one database, expanded per schema
pub fn table_definitions(schemas: &SchemaList, version: &Version) -> Vec<QueryDef> {
    let mut defs = Vec::new();
    for schema in schemas {
        let schema = quote_literal(schema);
        defs.push(QueryDef::new::<TableStatsRow>(
            TABLE_STATS_QUERY.replace("{schema}", &schema),
        ));
        defs.push(
            QueryDef::new::<TableSizeRow>(TABLE_SIZE_PRE10_QUERY.replace("{schema}", &schema))
                .until(Version::new(10, 0, 0)),
        );
        defs.push(
            QueryDef::new::<TableSizeRow>(TABLE_SIZE_QUERY.replace("{schema}", &schema))
                .since(Version::new(10, 0, 0)),
        );
    }
    retain_eligible(defs, version)
}

/// Index definitions for one database, expanded per schema
pub fn index_definitions(schemas: &SchemaList, version: &Version) -> Vec<QueryDef> {
    let mut defs = Vec::new();
    for schema in schemas {
        let schema = quote_literal(schema);
        defs.push(QueryDef::new::<IndexStatsRow>(
            INDEX_STATS_QUERY.replace("{schema}", &schema),
        ));
        defs.push(QueryDef::new::<IndexIoRow>(
            INDEX_IO_QUERY.replace("{schema}", &schema),
        ));
    }
    retain_eligible(defs, version)
}

/// PgBouncer admin-console definitions. The console does not version its
/// result shapes the way the server does, so these carry no bounds.
pub fn pgbouncer_definitions() -> Vec<QueryDef> {
    vec![
        QueryDef::new::<PgBouncerStatsRow>(PGBOUNCER_STATS_QUERY),
        QueryDef::new::<PgBouncerPoolsRow>(PGBOUNCER_POOLS_QUERY),
    ]
}

fn retain_eligible(defs: Vec<QueryDef>, version: &Version) -> Vec<QueryDef> {
    defs.into_iter().filter(|d| d.matches(version)).collect()
}

fn database_scope(databases: &DatabaseList) -> String {
    databases
        .keys()
        .map(|db| format!("'{}'", quote_literal(db)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_literal(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn topology(databases: &[(&str, &[&str])]) -> DatabaseList {
        databases
            .iter()
            .map(|(db, schemas)| {
                (
                    db.to_string(),
                    schemas.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_min_bound_is_inclusive() {
        let def = QueryDef::new::<BgWriterRow>("SELECT 1").since(Version::new(9, 2, 0));
        assert!(def.matches(&Version::new(9, 2, 0)));
        assert!(!def.matches(&Version::new(9, 1, 9)));
    }

    #[test]
    fn test_max_bound_is_exclusive() {
        let def = QueryDef::new::<BgWriterRow>("SELECT 1").until(Version::new(17, 0, 0));
        assert!(def.matches(&Version::new(16, 4, 0)));
        assert!(!def.matches(&Version::new(17, 0, 0)));
        assert!(!def.matches(&Version::new(17, 1, 0)));
    }

    #[test]
    fn test_instance_definitions_grow_with_version() {
        assert_eq!(instance_definitions(&Version::new(9, 0, 4)).len(), 1);
        assert_eq!(instance_definitions(&Version::new(9, 1, 0)).len(), 2);
        assert_eq!(instance_definitions(&Version::new(9, 6, 1)).len(), 3);
        assert_eq!(instance_definitions(&Version::new(16, 2, 0)).len(), 3);

        // 17 drops the bgwriter family for the checkpointer view
        let v17 = instance_definitions(&Version::new(17, 0, 0));
        assert_eq!(v17.len(), 1);
        assert!(v17[0].query().contains("pg_stat_checkpointer"));
    }

    #[test]
    fn test_database_definitions_scope_and_gating() {
        let databases = topology(&[("orders", &["public"]), ("billing", &[])]);

        let v91 = database_definitions(&databases, &Version::new(9, 1, 0));
        assert_eq!(v91.len(), 1);
        assert!(v91[0].query().contains("'billing', 'orders'"));

        let v92 = database_definitions(&databases, &Version::new(9, 2, 0));
        assert_eq!(v92.len(), 2);
        assert!(v92[1].query().contains("temp_files"));
    }

    #[test]
    fn test_database_definitions_empty_topology() {
        let version = Version::new(14, 0, 0);
        assert!(database_definitions(&DatabaseList::new(), &version).is_empty());
        assert!(lock_definitions(&DatabaseList::new(), &version).is_empty());
    }

    #[test]
    fn test_database_scope_escapes_quotes() {
        let databases = topology(&[("it's", &[])]);
        assert_eq!(database_scope(&databases), "'it''s'");
    }

    #[test]
    fn test_lock_definitions_double_escape_for_crosstab() {
        let databases = topology(&[("orders", &[])]);
        let defs = lock_definitions(&databases, &Version::new(12, 0, 0));
        assert_eq!(defs.len(), 1);
        // inside the crosstab string literal the scope appears re-quoted
        assert!(defs[0].query().contains("D.datname IN (''orders'')"));
        assert!(defs[0].query().contains("crosstab"));
    }

    #[test]
    fn test_table_definitions_expand_per_schema() {
        let schemas: SchemaList = BTreeSet::from(["public".to_string(), "audit".to_string()]);

        // two eligible definitions per schema at any version
        let defs = table_definitions(&schemas, &Version::new(12, 3, 0));
        assert_eq!(defs.len(), 4);
        assert!(defs.iter().all(|d| !d.query().contains("{schema}")));
        assert!(defs.iter().any(|d| d.query().contains("'audit'")));
        assert!(defs.iter().any(|d| d.query().contains("'public'")));
    }

    #[test]
    fn test_table_definitions_empty_schemas() {
        let schemas = SchemaList::new();
        assert!(table_definitions(&schemas, &Version::new(12, 3, 0)).is_empty());
        assert!(index_definitions(&schemas, &Version::new(12, 3, 0)).is_empty());
    }

    #[test]
    fn test_table_size_definition_version_split() {
        let schemas: SchemaList = BTreeSet::from(["public".to_string()]);

        // 12.3 takes the partition-aware size query, not the pre-10 one
        let v12 = table_definitions(&schemas, &Version::new(12, 3, 0));
        assert!(v12.iter().any(|d| d.query().contains("IN ('r', 'p')")));
        assert!(!v12.iter().any(|d| d.query().contains("relkind = 'r'")));

        // 9.6.1 (what an Ubuntu-packaged server reports) takes the pre-10 set
        let v96 = table_definitions(&schemas, &Version::new(9, 6, 1));
        assert!(v96.iter().any(|d| d.query().contains("relkind = 'r'")));
        assert!(!v96.iter().any(|d| d.query().contains("IN ('r', 'p')")));
    }

    #[test]
    fn test_index_definitions_expand_per_schema() {
        let schemas: SchemaList = BTreeSet::from(["public".to_string(), "audit".to_string()]);
        let defs = index_definitions(&schemas, &Version::new(12, 3, 0));
        assert_eq!(defs.len(), 4);
    }

    #[test]
    fn test_pgbouncer_definitions() {
        let defs = pgbouncer_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].query(), "SHOW STATS");
        assert_eq!(defs[1].query(), "SHOW POOLS");
    }
}
