//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the batch writer
//! - **Connection pooling**: one pool per backend, acquired with an explicit timeout
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Corrupt rows
//!
//! Listing queries decode each row on its own. A row whose enum codes or
//! JSON sections no longer decode is logged and left out of the result;
//! it never fails the whole read.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::query::{
    GroupQuery, IncidentQuery, Paged, SnapshotQuery, StatQuery, TimeRange, TransactionFilter,
    TransactionQuery,
};
use super::schema::{
    AgentRow, CleanupReport, GroupResult, IncidentRow, SnapshotRow, StatRow, TransactionRow,
    UptimeResult,
};
use crate::wire::{
    GroupKey, IncidentStatus, Pagination, SchedulerCode, SortDirection, TransactionSortKey,
};

/// Default time to wait for a pooled connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const SNAPSHOT_COLUMNS: &str =
    "scheduler_id, code, check_type, error, meta_start_time, meta_end_time, meta_value";
const INCIDENT_COLUMNS: &str = "incident_id, rule_id, status, start_time, end_time, histories";
const STAT_COLUMNS: &str = "agent_id, agent_name, time, cpus, memory, disks, nets";
const TRANSACTION_COLUMNS: &str = "transaction_id, application_id, parent_id, host, path, method, \
     name, start_time, end_time, status, transaction_type, error";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend with the default acquire timeout
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use watchpost::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./watchpost.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_timeout(db_path, DEFAULT_ACQUIRE_TIMEOUT).await
    }

    /// Create a new SQLite backend, waiting at most `acquire_timeout` for a
    /// connection on every operation
    #[instrument(skip_all)]
    pub async fn with_timeout(
        db_path: impl AsRef<Path>,
        acquire_timeout: Duration,
    ) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();
        if db_path_str.is_empty() {
            return Err(StorageError::InvalidConfig(
                "database path must not be empty".to_string(),
            ));
        }

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("SQLite connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.pool.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    async fn count(&self, mut qb: QueryBuilder<'_, Sqlite>) -> StorageResult<i64> {
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn decode_code<E>(row: &SqliteRow, column: &str, name: &str) -> StorageResult<E>
where
    E: TryFrom<i32, Error = i32>,
{
    let code: i32 = row.try_get(column)?;
    E::try_from(code).map_err(|code| {
        StorageError::SerializationError(format!("invalid {} code {} in {}", name, code, column))
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> StorageResult<Option<T>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", column, e)))
}

fn encode_json<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode every row independently, logging and skipping the ones that fail
fn decode_rows<T>(
    rows: Vec<SqliteRow>,
    kind: &str,
    decode: fn(&SqliteRow) -> StorageResult<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("skipping corrupt {} row: {}", kind, e);
                None
            }
        })
        .collect()
}

fn snapshot_from_row(row: &SqliteRow) -> StorageResult<SnapshotRow> {
    Ok(SnapshotRow {
        scheduler_id: row.try_get("scheduler_id")?,
        code: decode_code(row, "code", SchedulerCode::NAME)?,
        check_type: decode_code(row, "check_type", crate::wire::SchedulerType::NAME)?,
        error: row.try_get("error")?,
        meta_start_time: row.try_get("meta_start_time")?,
        meta_end_time: row.try_get("meta_end_time")?,
        meta_value: row.try_get("meta_value")?,
    })
}

fn incident_from_row(row: &SqliteRow) -> StorageResult<IncidentRow> {
    Ok(IncidentRow {
        incident_id: row.try_get("incident_id")?,
        rule_id: row.try_get("rule_id")?,
        status: decode_code(row, "status", IncidentStatus::NAME)?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        histories: decode_json(row, "histories")?.unwrap_or_default(),
    })
}

fn stat_from_row(row: &SqliteRow) -> StorageResult<StatRow> {
    Ok(StatRow {
        agent_id: row.try_get("agent_id")?,
        agent_name: row.try_get("agent_name")?,
        time: row.try_get("time")?,
        cpus: decode_json(row, "cpus")?.unwrap_or_default(),
        memory: decode_json(row, "memory")?,
        disks: decode_json(row, "disks")?.unwrap_or_default(),
        nets: decode_json(row, "nets")?.unwrap_or_default(),
    })
}

fn transaction_from_row(row: &SqliteRow) -> StorageResult<TransactionRow> {
    Ok(TransactionRow {
        transaction_id: row.try_get("transaction_id")?,
        application_id: row.try_get("application_id")?,
        parent_id: row.try_get("parent_id")?,
        host: row.try_get("host")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        name: row.try_get("name")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: decode_code(row, "status", crate::wire::TransactionStatus::NAME)?,
        transaction_type: decode_code(
            row,
            "transaction_type",
            crate::wire::TransactionType::NAME,
        )?,
        error: row.try_get("error")?,
    })
}

// ============================================================================
// Query building
// ============================================================================

fn direction_sql(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, pagination: Option<Pagination>, total: i64) {
    if let Some(pagination) = pagination {
        let (offset, limit) = pagination.window(total);
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);
    }
}

fn push_range(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, range: TimeRange) {
    qb.push(" AND ")
        .push(column)
        .push(" >= ")
        .push_bind(range.from);
    qb.push(" AND ").push(column).push(" <= ").push_bind(range.to);
}

fn push_snapshot_filter(qb: &mut QueryBuilder<'_, Sqlite>, query: &SnapshotQuery) {
    qb.push(" WHERE scheduler_id = ")
        .push_bind(query.scheduler_id.clone());
    push_range(qb, "meta_start_time", query.range);
    if let Some(code) = query.code {
        qb.push(" AND code = ").push_bind(code.code());
    }
}

fn push_stat_filter(qb: &mut QueryBuilder<'_, Sqlite>, query: &StatQuery) {
    qb.push(" WHERE agent_id = ").push_bind(query.agent_id.clone());
    push_range(qb, "time", query.range);
}

fn push_incident_filter(qb: &mut QueryBuilder<'_, Sqlite>, query: &IncidentQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(rule_id) = &query.rule_id {
        qb.push(" AND rule_id = ").push_bind(rule_id.clone());
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.code());
    }
    if let Some(range) = query.range {
        push_range(qb, "start_time", range);
    }
}

fn push_transaction_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TransactionFilter) {
    qb.push(" WHERE application_id = ")
        .push_bind(filter.application_id.clone());
    push_range(qb, "start_time", filter.range);

    for (column, value) in [
        ("host", &filter.host),
        ("name", &filter.name),
        ("path", &filter.path),
        ("method", &filter.method),
    ] {
        if let Some(value) = value {
            qb.push(" AND ")
                .push(column)
                .push(" = ")
                .push_bind(value.clone());
        }
    }
    if let Some(kind) = filter.transaction_type {
        qb.push(" AND transaction_type = ").push_bind(kind.code());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.code());
    }
}

fn group_column(key: GroupKey) -> &'static str {
    match key {
        GroupKey::Type => "CAST(transaction_type AS TEXT)",
        GroupKey::Name => "name",
        GroupKey::Method => "method",
        GroupKey::Host => "host",
        GroupKey::Path => "path",
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, row), fields(scheduler_id = %row.scheduler_id))]
    async fn insert_snapshot(&self, row: SnapshotRow) -> StorageResult<()> {
        self.ensure_open()?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (
                scheduler_id, code, check_type, error,
                meta_start_time, meta_end_time, meta_value
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (scheduler_id, meta_start_time) DO UPDATE SET
                code = excluded.code,
                check_type = excluded.check_type,
                error = excluded.error,
                meta_end_time = excluded.meta_end_time,
                meta_value = excluded.meta_value
            "#,
        )
        .bind(&row.scheduler_id)
        .bind(row.code.code())
        .bind(row.check_type.code())
        .bind(&row.error)
        .bind(row.meta_start_time)
        .bind(row.meta_end_time)
        .bind(&row.meta_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, query), fields(scheduler_id = %query.scheduler_id))]
    async fn query_snapshots(&self, query: SnapshotQuery) -> StorageResult<Paged<SnapshotRow>> {
        self.ensure_open()?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM snapshots");
        push_snapshot_filter(&mut count_qb, &query);
        let total = self.count(count_qb).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM snapshots", SNAPSHOT_COLUMNS));
        push_snapshot_filter(&mut qb, &query);
        qb.push(format!(
            " ORDER BY meta_start_time {}",
            direction_sql(query.direction)
        ));
        push_page(&mut qb, query.pagination, total);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = decode_rows(rows, "snapshot", snapshot_from_row);
        debug!("snapshot query returned {} of {}", items.len(), total);

        Ok(Paged { items, total })
    }

    #[instrument(skip(self))]
    async fn uptime(&self, scheduler_id: &str, range: TimeRange) -> StorageResult<UptimeResult> {
        self.ensure_open()?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(CASE WHEN code = ? THEN 1 END) AS ok_count,
                COUNT(*) AS total,
                CAST(AVG(meta_end_time - meta_start_time) AS TEXT) AS latency
            FROM snapshots
            WHERE scheduler_id = ? AND meta_start_time >= ? AND meta_start_time <= ?
            "#,
        )
        .bind(SchedulerCode::Ok.code())
        .bind(scheduler_id)
        .bind(range.from)
        .bind(range.to)
        .fetch_one(&self.pool)
        .await?;

        Ok(UptimeResult {
            count: row.try_get("ok_count")?,
            total: row.try_get("total")?,
            latency: row
                .try_get::<Option<String>, _>("latency")?
                .unwrap_or_default(),
        })
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_stats(&self, rows: Vec<StatRow>) -> StorageResult<()> {
        self.ensure_open()?;
        if rows.is_empty() {
            return Ok(());
        }

        debug!("inserting {} stats into SQLite", rows.len());

        let mut tx = self.pool.begin().await?;

        for row in rows {
            let cpus = (!row.cpus.is_empty())
                .then(|| encode_json(&row.cpus))
                .transpose()?;
            let memory = row.memory.as_ref().map(encode_json).transpose()?;
            let disks = (!row.disks.is_empty())
                .then(|| encode_json(&row.disks))
                .transpose()?;
            let nets = (!row.nets.is_empty())
                .then(|| encode_json(&row.nets))
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO stats (agent_id, agent_name, time, cpus, memory, disks, nets)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (agent_id, time) DO UPDATE SET
                    agent_name = excluded.agent_name,
                    cpus = excluded.cpus,
                    memory = excluded.memory,
                    disks = excluded.disks,
                    nets = excluded.nets
                "#,
            )
            .bind(&row.agent_id)
            .bind(&row.agent_name)
            .bind(row.time)
            .bind(cpus)
            .bind(memory)
            .bind(disks)
            .bind(nets)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self, query), fields(agent_id = %query.agent_id))]
    async fn query_stats(&self, query: StatQuery) -> StorageResult<Paged<StatRow>> {
        self.ensure_open()?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM stats");
        push_stat_filter(&mut count_qb, &query);
        let total = self.count(count_qb).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM stats", STAT_COLUMNS));
        push_stat_filter(&mut qb, &query);
        qb.push(" ORDER BY time DESC");
        push_page(&mut qb, query.pagination, total);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = decode_rows(rows, "stat", stat_from_row);

        Ok(Paged { items, total })
    }

    #[instrument(skip(self))]
    async fn list_agents(&self) -> StorageResult<Vec<AgentRow>> {
        self.ensure_open()?;

        let rows = sqlx::query(
            r#"
            SELECT s.agent_id, s.agent_name
            FROM stats s
            WHERE s.time = (SELECT MAX(time) FROM stats WHERE agent_id = s.agent_id)
            ORDER BY s.agent_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AgentRow {
                    agent_id: row.try_get("agent_id")?,
                    agent_name: row.try_get("agent_name")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, row), fields(incident_id = %row.incident_id, rule_id = %row.rule_id))]
    async fn upsert_incident(&self, row: IncidentRow) -> StorageResult<()> {
        self.ensure_open()?;
        let histories = encode_json(&row.histories)?;

        sqlx::query(
            r#"
            INSERT INTO incidents (incident_id, rule_id, status, start_time, end_time, histories)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (incident_id) DO UPDATE SET
                rule_id = excluded.rule_id,
                status = excluded.status,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                histories = excluded.histories
            "#,
        )
        .bind(&row.incident_id)
        .bind(&row.rule_id)
        .bind(row.status.code())
        .bind(row.start_time)
        .bind(row.end_time)
        .bind(histories)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_incident(&self, incident_id: &str) -> StorageResult<Option<IncidentRow>> {
        self.ensure_open()?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM incidents WHERE incident_id = ?",
            INCIDENT_COLUMNS
        ))
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(incident_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_active_incident_by_rule_id(
        &self,
        rule_id: &str,
    ) -> StorageResult<Option<IncidentRow>> {
        self.ensure_open()?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM incidents WHERE rule_id = ? AND status = ? \
             ORDER BY start_time DESC LIMIT 1",
            INCIDENT_COLUMNS
        ))
        .bind(rule_id)
        .bind(IncidentStatus::Opened.code())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(incident_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_active_incidents(&self) -> StorageResult<Vec<IncidentRow>> {
        self.ensure_open()?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM incidents WHERE status = ? ORDER BY start_time ASC",
            INCIDENT_COLUMNS
        ))
        .bind(IncidentStatus::Opened.code())
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows, "incident", incident_from_row))
    }

    #[instrument(skip(self, query))]
    async fn query_incidents(&self, query: IncidentQuery) -> StorageResult<Paged<IncidentRow>> {
        self.ensure_open()?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM incidents");
        push_incident_filter(&mut count_qb, &query);
        let total = self.count(count_qb).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM incidents", INCIDENT_COLUMNS));
        push_incident_filter(&mut qb, &query);
        qb.push(" ORDER BY start_time DESC, incident_id ASC");
        push_page(&mut qb, query.pagination, total);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = decode_rows(rows, "incident", incident_from_row);

        Ok(Paged { items, total })
    }

    #[instrument(skip(self, row), fields(transaction_id = %row.transaction_id))]
    async fn insert_transaction(&self, row: TransactionRow) -> StorageResult<()> {
        self.ensure_open()?;

        sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, application_id, parent_id, host, path, method,
                name, start_time, end_time, status, transaction_type, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (transaction_id) DO UPDATE SET
                application_id = excluded.application_id,
                parent_id = excluded.parent_id,
                host = excluded.host,
                path = excluded.path,
                method = excluded.method,
                name = excluded.name,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                status = excluded.status,
                transaction_type = excluded.transaction_type,
                error = excluded.error
            "#,
        )
        .bind(&row.transaction_id)
        .bind(&row.application_id)
        .bind(&row.parent_id)
        .bind(&row.host)
        .bind(&row.path)
        .bind(&row.method)
        .bind(&row.name)
        .bind(row.start_time)
        .bind(row.end_time)
        .bind(row.status.code())
        .bind(row.transaction_type.code())
        .bind(&row.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, transaction_id: &str) -> StorageResult<Option<TransactionRow>> {
        self.ensure_open()?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn application_transactions(
        &self,
        application_id: &str,
    ) -> StorageResult<Vec<TransactionRow>> {
        self.ensure_open()?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE application_id = ?",
            TRANSACTION_COLUMNS
        ))
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows, "transaction", transaction_from_row))
    }

    #[instrument(skip(self, query), fields(application_id = %query.filter.application_id))]
    async fn query_transactions(
        &self,
        query: TransactionQuery,
    ) -> StorageResult<Paged<TransactionRow>> {
        self.ensure_open()?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM transactions");
        push_transaction_filter(&mut count_qb, &query.filter);
        let total = self.count(count_qb).await?;

        let sort_column = match query.sort.key {
            TransactionSortKey::Duration => "(end_time - start_time)",
            TransactionSortKey::StartTime => "start_time",
            TransactionSortKey::EndTime => "end_time",
        };
        let direction = direction_sql(query.sort.direction);

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM transactions", TRANSACTION_COLUMNS));
        push_transaction_filter(&mut qb, &query.filter);
        qb.push(format!(
            " ORDER BY {} {}, transaction_id {}",
            sort_column, direction, direction
        ));
        push_page(&mut qb, query.pagination, total);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = decode_rows(rows, "transaction", transaction_from_row);

        Ok(Paged { items, total })
    }

    #[instrument(skip(self, query), fields(application_id = %query.filter.application_id))]
    async fn group_transactions(
        &self,
        query: GroupQuery,
    ) -> StorageResult<BTreeMap<String, GroupResult>> {
        self.ensure_open()?;

        let mut qb = QueryBuilder::new(format!(
            r#"
            SELECT
                {} AS group_name,
                COUNT(*) AS count,
                SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END) AS success_count,
                AVG(end_time - start_time) AS average_time,
                MIN(end_time - start_time) AS min_time,
                MAX(end_time - start_time) AS max_time,
                MIN(end_time) AS low_time
            FROM transactions"#,
            group_column(query.key)
        ));
        push_transaction_filter(&mut qb, &query.filter);
        qb.push(" GROUP BY group_name");

        let rows = qb.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("group_name")?;
                let result = GroupResult {
                    name: name.clone(),
                    count: row.try_get("count")?,
                    success_count: row.try_get("success_count")?,
                    average_time: row.try_get("average_time")?,
                    min_time: row.try_get("min_time")?,
                    max_time: row.try_get("max_time")?,
                    low_time: row.try_get("low_time")?,
                };
                Ok((name, result))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn cleanup_before(&self, cutoff: i64) -> StorageResult<CleanupReport> {
        self.ensure_open()?;

        info!(
            "cleaning up records older than {}",
            DateTime::from_timestamp_nanos(cutoff)
        );

        let mut tx = self.pool.begin().await?;

        let snapshots = sqlx::query("DELETE FROM snapshots WHERE meta_start_time < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let stats = sqlx::query("DELETE FROM stats WHERE time < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let incidents = sqlx::query("DELETE FROM incidents WHERE status = ? AND end_time < ?")
            .bind(IncidentStatus::Closed.code())
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let transactions = sqlx::query("DELETE FROM transactions WHERE start_time < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let report = CleanupReport {
            snapshots,
            stats,
            incidents,
            transactions,
        };
        info!("deleted {} old records", report.total());

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        if self.pool.is_closed() {
            return Ok(HealthStatus {
                healthy: false,
                message: "SQLite backend closed".to_string(),
                metadata: HashMap::new(),
            });
        }

        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());
                metadata.insert("pool_size".to_string(), self.pool.size().to_string());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        self.ensure_open()?;

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM snapshots) AS snapshots,
                (SELECT COUNT(*) FROM stats) AS stats,
                (SELECT COUNT(*) FROM incidents) AS incidents,
                (SELECT COUNT(*) FROM transactions) AS transactions,
                (SELECT MIN(meta_start_time) FROM snapshots) AS oldest,
                (SELECT MAX(meta_start_time) FROM snapshots) AS newest
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let snapshots: i64 = row.try_get("snapshots")?;
        let stats: i64 = row.try_get("stats")?;
        let incidents: i64 = row.try_get("incidents")?;
        let transactions: i64 = row.try_get("transactions")?;
        let oldest: Option<i64> = row.try_get("oldest")?;
        let newest: Option<i64> = row.try_get("newest")?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                DateTime::from_timestamp_nanos(old).format("%Y-%m-%d"),
                DateTime::from_timestamp_nanos(new).format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} snapshots, {} stats, {} incidents, {} transactions, {:.2} MB on disk, time range: {}",
            snapshots, stats, incidents, transactions, file_size_mb, time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
