//! PostgreSQL metrics collector.
//!
//! One collection run walks the metric domains in order — instance,
//! database, database locks, tables, indexes, PgBouncer — resolving every
//! decoded row to a uniquely-identified entity and attaching the row's
//! fields as a metric sample. Failures are contained at the boundary they
//! occur on: a failed query skips one definition, a failed per-database
//! connection skips that database, and only a failed primary connection or
//! version resolution aborts the run.

pub mod definitions;
pub mod rows;
pub mod version;

use crate::collector::{Collector, CollectorError};
use crate::config::DatabaseList;
use crate::connection::{self, ConnectionInfo};
use crate::inventory::{EntityKind, EntityStore, IdAttribute, MetricSample};
use async_trait::async_trait;
use self::rows::MetricRow;
use semver::Version;
use sqlx::postgres::PgPool;
use tracing::{debug, error, info, warn};

/// Fixed administrative database exposed by the PgBouncer console
const PGBOUNCER_DATABASE: &str = "pgbouncer";

/// Extension providing crosstab(), required by the lock queries
const LOCK_EXTENSION: &str = "tablefunc";
const LOCK_EXTENSION_SCHEMA: &str = "public";

/// Collects one point-in-time snapshot of entity-scoped metrics
pub struct PostgresCollector {
    info: ConnectionInfo,
    topology: DatabaseList,
    collect_pgbouncer: bool,
    collect_db_locks: bool,
}

impl PostgresCollector {
    pub fn new(
        info: ConnectionInfo,
        topology: DatabaseList,
        collect_pgbouncer: bool,
        collect_db_locks: bool,
    ) -> Self {
        Self {
            info,
            topology,
            collect_pgbouncer,
            collect_db_locks,
        }
    }

    async fn collect_inner(&self) -> Result<EntityStore, CollectorError> {
        let pool = self.info.connect(self.info.default_database()).await?;

        let version = version::resolve(&pool).await?;
        info!(version = %version, "resolved server version");

        let mut store = EntityStore::new();

        self.collect_instance(&mut store, &pool, &version).await;
        self.collect_databases(&mut store, &pool, &version).await;
        if self.collect_db_locks {
            self.collect_locks(&mut store, &pool, &version).await;
        }
        self.collect_tables(&mut store, &version).await;
        self.collect_indexes(&mut store, &version).await;
        if self.collect_pgbouncer {
            self.collect_pgbouncer_metrics(&mut store).await;
        }

        pool.close().await;
        Ok(store)
    }

    /// Instance domain: one sample set on the instance entity, accumulating
    /// the first row of every eligible definition
    async fn collect_instance(&self, store: &mut EntityStore, pool: &PgPool, version: &Version) {
        self.seed_instance(store);

        for def in definitions::instance_definitions(version) {
            match def.fetch(pool).await {
                Err(err) => {
                    error!(query = def.query(), error = %err, "could not execute instance query");
                }
                Ok(rows) => match rows.first() {
                    None => debug!(query = def.query(), "no data returned from instance query"),
                    Some(row) => self.apply_instance_row(store, row.as_ref()),
                },
            }
        }
    }

    async fn collect_databases(&self, store: &mut EntityStore, pool: &PgPool, version: &Version) {
        let defs = definitions::database_definitions(&self.topology, version);
        self.process_database_definitions(store, pool, defs, "database")
            .await;
    }

    /// Lock domain: same shape as the database domain, but only when the
    /// crosstab() extension is installed
    async fn collect_locks(&self, store: &mut EntityStore, pool: &PgPool, version: &Version) {
        match connection::has_extension(pool, LOCK_EXTENSION, LOCK_EXTENSION_SCHEMA).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Crosstab function not available; database lock metric gathering not possible.");
                warn!(
                    "To enable database lock metrics, enable the '{}' extension on the {} schema \
                     of your database with 'CREATE EXTENSION {};'",
                    LOCK_EXTENSION, LOCK_EXTENSION_SCHEMA, LOCK_EXTENSION
                );
                return;
            }
            Err(err) => {
                error!(error = %err, "could not check for the crosstab extension; skipping lock metrics");
                return;
            }
        }

        let defs = definitions::lock_definitions(&self.topology, version);
        self.process_database_definitions(store, pool, defs, "lock")
            .await;
    }

    /// Table domain: one dedicated connection per database that has schemas
    /// configured. A database with an empty schema list is skipped and the
    /// remaining databases are still processed.
    async fn collect_tables(&self, store: &mut EntityStore, version: &Version) {
        for (database, schemas) in &self.topology {
            if schemas.is_empty() {
                debug!(database = %database, "no schemas configured; skipping table metrics");
                continue;
            }

            let pool = match self.info.connect(database).await {
                Ok(pool) => pool,
                Err(err) => {
                    error!(database = %database, error = %err, "failed to connect to database for table metrics");
                    continue;
                }
            };

            for def in definitions::table_definitions(schemas, version) {
                match def.fetch(&pool).await {
                    Err(err) => {
                        error!(database = %database, query = def.query(), error = %err, "could not execute table query");
                    }
                    Ok(rows) if rows.is_empty() => {
                        debug!(database = %database, query = def.query(), "no data returned from table query");
                    }
                    Ok(rows) => {
                        for row in &rows {
                            self.apply_table_row(store, row.as_ref());
                        }
                    }
                }
            }

            pool.close().await;
        }
    }

    /// Index domain: same per-database connection pattern as tables
    async fn collect_indexes(&self, store: &mut EntityStore, version: &Version) {
        for (database, schemas) in &self.topology {
            if schemas.is_empty() {
                debug!(database = %database, "no schemas configured; skipping index metrics");
                continue;
            }

            let pool = match self.info.connect(database).await {
                Ok(pool) => pool,
                Err(err) => {
                    error!(database = %database, error = %err, "failed to connect to database for index metrics");
                    continue;
                }
            };

            for def in definitions::index_definitions(schemas, version) {
                match def.fetch(&pool).await {
                    Err(err) => {
                        error!(database = %database, query = def.query(), error = %err, "could not execute index query");
                    }
                    Ok(rows) if rows.is_empty() => {
                        debug!(database = %database, query = def.query(), "no data returned from index query");
                    }
                    Ok(rows) => {
                        for row in &rows {
                            self.apply_index_row(store, row.as_ref());
                        }
                    }
                }
            }

            pool.close().await;
        }
    }

    /// PgBouncer domain: a separate connection to the fixed administrative
    /// database. A connection failure skips only this domain.
    async fn collect_pgbouncer_metrics(&self, store: &mut EntityStore) {
        let pool = match self.info.connect(PGBOUNCER_DATABASE).await {
            Ok(pool) => pool,
            Err(err) => {
                error!(error = %err, "error creating connection to pgbouncer database; skipping pgbouncer metrics");
                return;
            }
        };

        for def in definitions::pgbouncer_definitions() {
            match def.fetch(&pool).await {
                Err(err) => {
                    error!(query = def.query(), error = %err, "could not execute pgbouncer query");
                }
                Ok(rows) if rows.is_empty() => {
                    debug!(query = def.query(), "no data returned from pgbouncer query");
                }
                Ok(rows) => {
                    for row in &rows {
                        self.apply_pgbouncer_row(store, row.as_ref());
                    }
                }
            }
        }

        pool.close().await;
    }

    async fn process_database_definitions(
        &self,
        store: &mut EntityStore,
        pool: &PgPool,
        defs: Vec<definitions::QueryDef>,
        domain: &str,
    ) {
        for def in defs {
            match def.fetch(pool).await {
                Err(err) => {
                    error!(domain, query = def.query(), error = %err, "could not execute database query");
                }
                Ok(rows) if rows.is_empty() => {
                    debug!(domain, query = def.query(), "no data returned from database query");
                }
                Ok(rows) => {
                    for row in &rows {
                        self.apply_database_row(store, row.as_ref());
                    }
                }
            }
        }
    }

    fn instance_name(&self) -> String {
        format!("{}:{}", self.info.hostname(), self.info.port())
    }

    /// host and port, the outermost identity attributes of every entity
    fn base_id_attributes(&self) -> Vec<IdAttribute> {
        vec![
            IdAttribute::new("host", self.info.hostname()),
            IdAttribute::new("port", self.info.port().to_string()),
        ]
    }

    /// Create the instance entity and its sample set up front so the run
    /// always reports the instance it targeted
    fn seed_instance(&self, store: &mut EntityStore) {
        let name = self.instance_name();
        let entity = store.entity_mut(&name, EntityKind::Instance, self.base_id_attributes());
        let sample = entity.sample_mut("PostgresqlInstanceSample");
        sample.set_attribute("displayName", name.as_str());
        sample.set_attribute("entityName", format!("{}:{}", EntityKind::Instance, name));
    }

    fn apply_instance_row(&self, store: &mut EntityStore, row: &dyn MetricRow) {
        let name = self.instance_name();
        let entity = store.entity_mut(&name, EntityKind::Instance, self.base_id_attributes());
        copy_metrics(entity.sample_mut("PostgresqlInstanceSample"), row);
    }

    fn apply_database_row(&self, store: &mut EntityStore, row: &dyn MetricRow) {
        let database = identity_field(row.database_name(), "database");

        let entity = store.entity_mut(&database, EntityKind::Database, self.base_id_attributes());
        let sample = entity.sample_mut("PostgresqlDatabaseSample");
        sample.set_attribute("displayName", database.as_str());
        sample.set_attribute("entityName", format!("database:{database}"));
        copy_metrics(sample, row);
    }

    fn apply_table_row(&self, store: &mut EntityStore, row: &dyn MetricRow) {
        let database = identity_field(row.database_name(), "database");
        let schema = identity_field(row.schema_name(), "schema");
        let table = identity_field(row.table_name(), "table");

        let mut id_attributes = self.base_id_attributes();
        id_attributes.push(IdAttribute::new("pg-database", database.as_str()));
        id_attributes.push(IdAttribute::new("pg-schema", schema.as_str()));

        let entity = store.entity_mut(&table, EntityKind::Table, id_attributes);
        let sample = entity.sample_mut("PostgresqlTableSample");
        sample.set_attribute("displayName", table.as_str());
        sample.set_attribute("entityName", format!("table:{table}"));
        sample.set_attribute("database", database.as_str());
        sample.set_attribute("schema", schema.as_str());
        copy_metrics(sample, row);
    }

    fn apply_index_row(&self, store: &mut EntityStore, row: &dyn MetricRow) {
        let database = identity_field(row.database_name(), "database");
        let schema = identity_field(row.schema_name(), "schema");
        let table = identity_field(row.table_name(), "table");
        let index = identity_field(row.index_name(), "index");

        let mut id_attributes = self.base_id_attributes();
        id_attributes.push(IdAttribute::new("pg-database", database.as_str()));
        id_attributes.push(IdAttribute::new("pg-schema", schema.as_str()));
        id_attributes.push(IdAttribute::new("pg-table", table.as_str()));

        let entity = store.entity_mut(&index, EntityKind::Index, id_attributes);
        let sample = entity.sample_mut("PostgresqlIndexSample");
        sample.set_attribute("displayName", index.as_str());
        sample.set_attribute("entityName", format!("index:{index}"));
        sample.set_attribute("database", database.as_str());
        sample.set_attribute("schema", schema.as_str());
        sample.set_attribute("table", table.as_str());
        copy_metrics(sample, row);
    }

    fn apply_pgbouncer_row(&self, store: &mut EntityStore, row: &dyn MetricRow) {
        let database = identity_field(row.database_name(), "database");

        let entity = store.entity_mut(&database, EntityKind::PgBouncer, self.base_id_attributes());
        let sample = entity.sample_mut("PgBouncerSample");
        sample.set_attribute("displayName", database.as_str());
        sample.set_attribute("entityName", format!("pgbouncer:{database}"));
        sample.set_attribute("host", self.info.hostname());
        copy_metrics(sample, row);
    }
}

/// Extract one identity field, substituting an empty value when the record
/// does not carry it. The omission is reported; the record still counts.
fn identity_field(value: Option<&str>, field: &'static str) -> String {
    match value {
        Some(v) => v.to_string(),
        None => {
            error!(field, "record is missing an identity field; using an empty value");
            String::new()
        }
    }
}

fn copy_metrics(sample: &mut MetricSample, row: &dyn MetricRow) {
    for metric in row.metrics() {
        if let Err(err) = sample.set_metric(metric) {
            error!(error = %err, "could not copy metric field onto sample");
        }
    }
}

#[async_trait]
impl Collector for PostgresCollector {
    async fn collect(&self) -> Result<EntityStore, CollectorError> {
        self.collect_inner().await
    }

    async fn test_connection(&self) -> Result<(), CollectorError> {
        let pool = self.info.connect(self.info.default_database()).await?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| CollectorError::ConnectionError(e.to_string()))?;
        pool.close().await;
        Ok(())
    }
}
