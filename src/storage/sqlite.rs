//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: API handlers and the monitor worker share one pool
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Layout
//!
//! Fields the pipeline filters on are columns; event/alert metadata is JSON
//! text. Anomaly slot entries live in their own table so appends never
//! rewrite earlier entries. Timestamps are Unix milliseconds, calendar
//! dates ISO-8601 text (so lexical order is date order).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Alert, AlertFilter, AlertStatus, AlertType, AnomalyType, ConfigEntry, CreatorCount, Event,
    AnomalyAppend, EventFilter, IpCount, Listing, Metadata, MilkAnomaly, MilkRecord, Page, Session,
    Severity, SlotEntry, TimeSlot, new_id,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

type AnomalySlots = BTreeMap<TimeSlot, Vec<SlotEntry>>;

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for concurrent readers (WAL mode, busy timeout)
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use dairy_monitoring::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./monitoring.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

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

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_date(value: &str) -> StorageResult<NaiveDate> {
        NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map_err(|e| StorageError::SerializationError(format!("invalid date '{value}': {e}")))
    }

    fn parse_metadata(value: &str) -> StorageResult<Metadata> {
        serde_json::from_str(value).map_err(|e| {
            StorageError::SerializationError(format!("failed to deserialize metadata: {}", e))
        })
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<Event> {
        Ok(Event {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            event_type: row.try_get("event_type")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            metadata: Self::parse_metadata(&row.try_get::<String, _>("metadata")?)?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let alert_type: String = row.try_get("alert_type")?;
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;

        Ok(Alert {
            id: row.try_get("id")?,
            alert_type: AlertType::parse(&alert_type).ok_or_else(|| {
                StorageError::SerializationError(format!("unknown alert type '{alert_type}'"))
            })?,
            severity: Severity::parse(&severity).ok_or_else(|| {
                StorageError::SerializationError(format!("unknown severity '{severity}'"))
            })?,
            message: row.try_get("message")?,
            metadata: Self::parse_metadata(&row.try_get::<String, _>("metadata")?)?,
            status: AlertStatus::parse(&status).ok_or_else(|| {
                StorageError::SerializationError(format!("unknown alert status '{status}'"))
            })?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            resolved_at: row
                .try_get::<Option<i64>, _>("resolved_at")?
                .map(Self::millis_to_timestamp),
        })
    }

    fn setting_from_row(row: &SqliteRow) -> StorageResult<ConfigEntry> {
        let value: String = row.try_get("value")?;
        Ok(ConfigEntry {
            key: row.try_get("key")?,
            value: serde_json::from_str(&value)?,
            description: row.try_get("description")?,
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
        })
    }

    fn listing_from_row(row: &SqliteRow) -> StorageResult<Listing> {
        Ok(Listing {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            price: row.try_get("price")?,
            category: row.try_get("category")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
        })
    }

    fn milk_record_from_row(row: &SqliteRow) -> StorageResult<MilkRecord> {
        let slot: String = row.try_get("time_slot")?;
        Ok(MilkRecord {
            id: row.try_get("id")?,
            producer_id: row.try_get("producer_id")?,
            litres: row.try_get("litres")?,
            collection_date: Self::parse_date(&row.try_get::<String, _>("collection_date")?)?,
            time_slot: TimeSlot::parse(&slot).ok_or_else(|| {
                StorageError::SerializationError(format!("unknown time slot '{slot}'"))
            })?,
            recorded_at: Self::millis_to_timestamp(row.try_get("recorded_at")?),
        })
    }

    fn slot_entry_from_row(row: &SqliteRow) -> StorageResult<(String, TimeSlot, SlotEntry)> {
        let slot: String = row.try_get("time_slot")?;
        let slot = TimeSlot::parse(&slot).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown time slot '{slot}'"))
        })?;
        let entry = SlotEntry {
            litres: row.try_get("litres")?,
            recorded_at: Self::millis_to_timestamp(row.try_get("recorded_at")?),
            resolved: row.try_get("resolved")?,
            resolved_at: row
                .try_get::<Option<i64>, _>("resolved_at")?
                .map(Self::millis_to_timestamp),
        };
        Ok((row.try_get("anomaly_id")?, slot, entry))
    }

    fn anomaly_from_row(row: &SqliteRow, slots: AnomalySlots) -> StorageResult<MilkAnomaly> {
        let anomaly_type: String = row.try_get("anomaly_type")?;
        Ok(MilkAnomaly {
            id: row.try_get("id")?,
            producer_id: row.try_get("producer_id")?,
            anomaly_date: Self::parse_date(&row.try_get::<String, _>("anomaly_date")?)?,
            anomaly_type: AnomalyType::parse(&anomaly_type).ok_or_else(|| {
                StorageError::SerializationError(format!("unknown anomaly type '{anomaly_type}'"))
            })?,
            description: row.try_get("description")?,
            anomaly_slots: slots,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
        })
    }

    fn session_from_row(row: &SqliteRow) -> StorageResult<Session> {
        Ok(Session {
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            connection_id: row.try_get("connection_id")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            connected_at: Self::millis_to_timestamp(row.try_get("connected_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
        })
    }

    /// Append `AND ...` clauses for an event filter
    /// Slot entries of the given anomalies, in insertion order per slot
    async fn load_slots(&self, ids: &[String]) -> StorageResult<HashMap<String, AnomalySlots>> {
        let mut slots: HashMap<String, AnomalySlots> = HashMap::new();
        if ids.is_empty() {
            return Ok(slots);
        }

        let mut builder = QueryBuilder::new("SELECT * FROM milk_anomaly_entries WHERE anomaly_id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY seq");

        let rows = builder.build().fetch_all(&self.pool).await?;
        for row in &rows {
            let (anomaly_id, slot, entry) = Self::slot_entry_from_row(row)?;
            slots
                .entry(anomaly_id)
                .or_default()
                .entry(slot)
                .or_default()
                .push(entry);
        }
        Ok(slots)
    }

    async fn anomalies_from_rows(&self, rows: &[SqliteRow]) -> StorageResult<Vec<MilkAnomaly>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut slots = self.load_slots(&ids).await?;

        rows.iter()
            .zip(&ids)
            .map(|(row, id)| Self::anomaly_from_row(row, slots.remove(id).unwrap_or_default()))
            .collect()
    }

    async fn anomaly_by_id(&self, id: &str) -> StorageResult<Option<MilkAnomaly>> {
        let row = sqlx::query("SELECT * FROM milk_anomalies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.anomalies_from_rows(&[row]).await?.pop()),
            None => Ok(None),
        }
    }

    fn push_event_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a EventFilter) {
        if let Some(event_type) = &filter.event_type {
            builder.push(" AND event_type = ").push_bind(event_type.as_str());
        }
        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.as_str());
        }
        if let Some(ip) = &filter.ip {
            builder.push(" AND ip = ").push_bind(ip.as_str());
        }
        if let Some(from) = &filter.from {
            builder
                .push(" AND created_at >= ")
                .push_bind(Self::timestamp_to_millis(from));
        }
        if let Some(to) = &filter.to {
            builder
                .push(" AND created_at <= ")
                .push_bind(Self::timestamp_to_millis(to));
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn insert_event(&self, event: Event) -> StorageResult<()> {
        let metadata = serde_json::to_string(&event.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO events (id, user_id, role, event_type, ip, user_agent, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.user_id)
        .bind(&event.role)
        .bind(&event.event_type)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(metadata)
        .bind(Self::timestamp_to_millis(&event.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_events(&self, filter: &EventFilter, page: Page) -> StorageResult<Vec<Event>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, user_id, role, event_type, ip, user_agent, metadata, created_at \
             FROM events WHERE 1 = 1",
        );
        Self::push_event_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let events = rows
            .iter()
            .map(Self::event_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("event query returned {} rows", events.len());
        Ok(events)
    }

    async fn count_events(&self, filter: &EventFilter) -> StorageResult<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM events WHERE 1 = 1");
        Self::push_event_filter(&mut builder, filter);

        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn count_events_by_ip(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<IpCount>> {
        let rows = sqlx::query(
            r#"
            SELECT ip, COUNT(*) AS attempts
            FROM events
            WHERE event_type = ? AND created_at >= ? AND ip IS NOT NULL
            GROUP BY ip
            ORDER BY ip
            "#,
        )
        .bind(event_type)
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IpCount {
                    ip: row.try_get("ip")?,
                    count: row.try_get::<i64, _>("attempts")? as usize,
                })
            })
            .collect()
    }

    #[instrument(skip(self, alert), fields(alert_type = %alert.alert_type))]
    async fn insert_alert(&self, alert: Alert) -> StorageResult<()> {
        let fingerprint = alert
            .fingerprint()
            .ok_or_else(|| StorageError::InvalidInput("alert without fingerprint".to_string()))?
            .to_string();
        let metadata = serde_json::to_string(&alert.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, alert_type, severity, message, metadata, fingerprint,
                status, created_at, resolved_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(metadata)
        .bind(fingerprint)
        .bind(alert.status.as_str())
        .bind(Self::timestamp_to_millis(&alert.created_at))
        .bind(alert.resolved_at.as_ref().map(Self::timestamp_to_millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_open_alert(
        &self,
        fingerprint: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<Alert>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE fingerprint = ? AND alert_type = ? AND status != 'closed' AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(alert_type.as_str())
        .bind(Self::timestamp_to_millis(&since))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn get_alert(&self, id: &str) -> StorageResult<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn list_alerts(&self, status: AlertStatus, page: Page) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE status = ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(status.as_str())
        .bind(page.limit as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> StorageResult<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM alerts WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if filter.not_closed {
            builder.push(" AND status != 'closed'");
        }
        if !filter.types.is_empty() {
            builder.push(" AND alert_type IN (");
            let mut separated = builder.separated(", ");
            for alert_type in &filter.types {
                separated.push_bind(alert_type.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(since) = &filter.since {
            builder
                .push(" AND created_at >= ")
                .push_bind(Self::timestamp_to_millis(since));
        }

        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
        let metadata = serde_json::to_string(&alert.metadata)?;
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET severity = ?, message = ?, metadata = ?, status = ?, resolved_at = ?
            WHERE id = ?
            "#,
        )
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(metadata)
        .bind(alert.status.as_str())
        .bind(alert.resolved_at.as_ref().map(Self::timestamp_to_millis))
        .bind(&alert.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("alert {}", alert.id)));
        }
        Ok(())
    }

    async fn delete_alert(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_setting(&self, key: &str) -> StorageResult<Option<ConfigEntry>> {
        let row = sqlx::query("SELECT key, value, description, updated_at FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::setting_from_row).transpose()
    }

    #[instrument(skip(self, entry), fields(key = %entry.key))]
    async fn put_setting(&self, entry: ConfigEntry) -> StorageResult<()> {
        let value = serde_json::to_string(&entry.value)?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, description, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                description = COALESCE(excluded.description, settings.description),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.key)
        .bind(value)
        .bind(&entry.description)
        .bind(Self::timestamp_to_millis(&entry.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_settings(&self) -> StorageResult<Vec<ConfigEntry>> {
        let rows = sqlx::query("SELECT key, value, description, updated_at FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::setting_from_row).collect()
    }

    async fn insert_listing(&self, listing: Listing) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO listings (id, user_id, title, description, price, category, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.user_id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(&listing.category)
        .bind(Self::timestamp_to_millis(&listing.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_listings(&self, limit: usize) -> StorageResult<Vec<Listing>> {
        let rows = sqlx::query("SELECT * FROM listings ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::listing_from_row).collect()
    }

    async fn listings_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<Listing>> {
        let rows =
            sqlx::query("SELECT * FROM listings WHERE created_at >= ? ORDER BY created_at DESC")
                .bind(Self::timestamp_to_millis(&since))
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::listing_from_row).collect()
    }

    async fn count_listings_by_creator(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<CreatorCount>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, COUNT(*) AS listings
            FROM listings
            WHERE created_at >= ?
            GROUP BY user_id
            ORDER BY user_id
            "#,
        )
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CreatorCount {
                    user_id: row.try_get("user_id")?,
                    count: row.try_get::<i64, _>("listings")? as usize,
                })
            })
            .collect()
    }

    async fn insert_milk_record(&self, record: MilkRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO milk_records (id, producer_id, litres, collection_date, time_slot, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.producer_id)
        .bind(record.litres)
        .bind(record.collection_date.format(DATE_FORMAT).to_string())
        .bind(record.time_slot.as_str())
        .bind(Self::timestamp_to_millis(&record.recorded_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_milk_records(
        &self,
        producer_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MilkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM milk_records
            WHERE producer_id = ?
            ORDER BY collection_date DESC, recorded_at DESC
            LIMIT ?
            "#,
        )
        .bind(producer_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::milk_record_from_row).collect()
    }

    async fn find_milk_anomaly(
        &self,
        producer_id: &str,
        date: NaiveDate,
    ) -> StorageResult<Option<MilkAnomaly>> {
        let rows = sqlx::query("SELECT * FROM milk_anomalies WHERE producer_id = ? AND anomaly_date = ?")
            .bind(producer_id)
            .bind(date.format(DATE_FORMAT).to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(self.anomalies_from_rows(&rows).await?.pop())
    }

    async fn get_milk_anomaly(&self, id: &str) -> StorageResult<Option<MilkAnomaly>> {
        self.anomaly_by_id(id).await
    }

    #[instrument(skip(self, append), fields(producer_id = %append.producer_id, slot = %append.slot))]
    async fn append_milk_anomaly_entry(
        &self,
        append: AnomalyAppend,
    ) -> StorageResult<MilkAnomaly> {
        let now = Self::timestamp_to_millis(&append.entry.recorded_at);

        // The upsert and the entry insert are each atomic; neither rewrites
        // entries written by a concurrent caller
        let anomaly_id: String = sqlx::query_scalar(
            r#"
            INSERT INTO milk_anomalies (
                id, producer_id, anomaly_date, anomaly_type, description, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (producer_id, anomaly_date) DO UPDATE SET
                anomaly_type = excluded.anomaly_type,
                description = excluded.description,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(new_id())
        .bind(&append.producer_id)
        .bind(append.anomaly_date.format(DATE_FORMAT).to_string())
        .bind(append.anomaly_type.as_str())
        .bind(&append.description)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO milk_anomaly_entries (anomaly_id, time_slot, litres, recorded_at, resolved, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&anomaly_id)
        .bind(append.slot.as_str())
        .bind(append.entry.litres)
        .bind(now)
        .bind(append.entry.resolved)
        .bind(append.entry.resolved_at.as_ref().map(Self::timestamp_to_millis))
        .execute(&self.pool)
        .await?;

        self.anomaly_by_id(&anomaly_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("milk anomaly {anomaly_id}")))
    }

    #[instrument(skip(self))]
    async fn resolve_milk_anomaly_slot(
        &self,
        id: &str,
        slot: TimeSlot,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<(MilkAnomaly, usize)>> {
        let at = Self::timestamp_to_millis(&at);
        let flipped = sqlx::query(
            r#"
            UPDATE milk_anomaly_entries SET resolved = 1, resolved_at = ?
            WHERE anomaly_id = ? AND time_slot = ? AND resolved = 0
            "#,
        )
        .bind(at)
        .bind(id)
        .bind(slot.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected() as usize;

        if flipped > 0 {
            sqlx::query("UPDATE milk_anomalies SET updated_at = MAX(updated_at, ?) WHERE id = ?")
                .bind(at)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        Ok(self.anomaly_by_id(id).await?.map(|anomaly| (anomaly, flipped)))
    }

    async fn list_milk_anomalies(
        &self,
        producer_id: Option<&str>,
    ) -> StorageResult<Vec<MilkAnomaly>> {
        let rows = match producer_id {
            Some(producer_id) => {
                sqlx::query(
                    "SELECT * FROM milk_anomalies WHERE producer_id = ? \
                     ORDER BY anomaly_date DESC, created_at DESC",
                )
                .bind(producer_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM milk_anomalies ORDER BY anomaly_date DESC, created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        self.anomalies_from_rows(&rows).await
    }

    async fn delete_milk_anomaly(&self, id: &str) -> StorageResult<bool> {
        sqlx::query("DELETE FROM milk_anomaly_entries WHERE anomaly_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM milk_anomalies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_session(&self, session: Session) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (connection_id, user_id, role, ip, user_agent, connected_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (connection_id) DO UPDATE SET
                user_id = excluded.user_id,
                role = excluded.role,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.connection_id)
        .bind(&session.user_id)
        .bind(&session.role)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .bind(Self::timestamp_to_millis(&session.connected_at))
        .bind(Self::timestamp_to_millis(&session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_session(&self, connection_id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self) -> StorageResult<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY connected_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::session_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

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

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
