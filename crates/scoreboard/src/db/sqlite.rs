use anyhow::{Context, Result};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{future::Future, path::Path, str::FromStr, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::{
    fs::create_dir_all,
    sync::{mpsc, oneshot},
};

use super::Station;
use crate::timestamps::{format_timestamp, now_timestamp};

type WriteOperation = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// Funnels every write through one task so SQLite never sees two writers
/// from this process at once.
pub struct DatabaseWriter {
    write_tx: mpsc::UnboundedSender<WriteOperation>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseWriter {
    pub fn new() -> Self {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteOperation>();

        let handle = tokio::spawn(async move {
            while let Some(future) = write_rx.recv().await {
                future.await;
            }
        });

        Self {
            write_tx,
            _handle: handle,
        }
    }

    pub async fn execute<T, F, Fut>(&self, pool: SqlitePool, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T>>();

        let write_op = Box::pin(async move {
            let result = operation(pool).await;
            let _ = result_tx.send(result);
        });

        self.write_tx
            .send(write_op)
            .map_err(|_| anyhow::anyhow!("Database writer channel closed"))?;

        result_rx
            .await
            .map_err(|_| anyhow::anyhow!("Failed to receive write result"))?
    }
}

/// Clones share the pool and the writer queue.
#[derive(Clone)]
pub struct Database {
    pub(super) pool: SqlitePool,
    pub(super) writer: Arc<DatabaseWriter>,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = format!("{}/scoreboard.sqlite", path);

        if let Some(parent) = Path::new(&db_path).parent() {
            create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory: {parent:?}"))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "5000")
            .pragma("cache_size", "-64000")
            .pragma("foreign_keys", "ON")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let db = Self::from_pool(pool).await?;
        info!("SQLite database initialized at: {}", db_path);
        Ok(db)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self {
            pool,
            writer: Arc::new(DatabaseWriter::new()),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check database connectivity and integrity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database connectivity check failed")?;

        let result: String = sqlx::query_scalar("PRAGMA quick_check;")
            .fetch_one(&self.pool)
            .await
            .context("Database integrity check failed")?;
        if result != "ok" {
            return Err(anyhow::anyhow!(
                "Database integrity check failed: {}",
                result
            ));
        }

        Ok(())
    }

    /// Flush the WAL into the main database file before shutdown.
    pub async fn checkpoint(&self) {
        match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
        {
            Ok(_) => info!("WAL checkpoint completed successfully"),
            Err(e) => log::error!("WAL checkpoint failed: {}", e),
        }
    }

    /// Insert or refresh a station. Known attributes are never blanked by a
    /// null incoming value.
    pub async fn upsert_station(&self, station: Station) -> Result<()> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                sqlx::query(
                    "INSERT INTO stations (
                        station_id, name, latitude, longitude, timezone,
                        state, elevation_ft, is_active, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(station_id) DO UPDATE SET
                        name = COALESCE(excluded.name, stations.name),
                        latitude = COALESCE(excluded.latitude, stations.latitude),
                        longitude = COALESCE(excluded.longitude, stations.longitude),
                        timezone = COALESCE(excluded.timezone, stations.timezone),
                        state = COALESCE(excluded.state, stations.state),
                        elevation_ft = COALESCE(excluded.elevation_ft, stations.elevation_ft),
                        is_active = COALESCE(excluded.is_active, stations.is_active),
                        updated_at = excluded.updated_at",
                )
                .bind(&station.station_id)
                .bind(&station.name)
                .bind(station.latitude)
                .bind(station.longitude)
                .bind(&station.timezone)
                .bind(&station.state)
                .bind(station.elevation_ft)
                .bind(station.is_active)
                .bind(now_timestamp())
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn list_stations(&self) -> Result<Vec<Station>> {
        let rows = sqlx::query(
            "SELECT station_id, name, latitude, longitude, timezone, state, elevation_ft, is_active
             FROM stations
             ORDER BY station_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Station {
                station_id: row.get("station_id"),
                name: row.get("name"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                timezone: row.get("timezone"),
                state: row.get("state"),
                elevation_ft: row.get("elevation_ft"),
                is_active: row.get("is_active"),
            })
            .collect())
    }

    /// Run id for `(source, issued_at)`, creating the run on first sight.
    pub async fn get_or_create_run(&self, source: &str, issued_at: OffsetDateTime) -> Result<i64> {
        let pool = self.pool.clone();
        let source = source.to_string();

        self.writer
            .execute(pool, move |pool| async move {
                let mut conn = pool.acquire().await?;
                get_or_create_run_tx(&mut conn, &source, issued_at).await
            })
            .await
    }

    pub async fn count_runs(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forecast_runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every row from every table, children before parents.
    pub async fn reset_all(&self) -> Result<()> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                for table in [
                    "dashboard_stats",
                    "forecast_errors",
                    "forecast_revisions",
                    "forecast_hourly",
                    "forecast_values",
                    "observations",
                    "observations_latest",
                    "observation_runs",
                    "forecast_runs",
                    "stations",
                ] {
                    sqlx::query(&format!("DELETE FROM {}", table))
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("Failed to clear {}", table))?;
                }
                tx.commit().await?;
                info!("All scoreboard tables cleared");
                Ok(())
            })
            .await
    }
}

/// Single-statement get-or-create, safe against concurrent callers.
pub(super) async fn get_or_create_run_tx(
    conn: &mut SqliteConnection,
    source: &str,
    issued_at: OffsetDateTime,
) -> Result<i64> {
    let run_id: i64 = sqlx::query_scalar(
        "INSERT INTO forecast_runs (source, issued_at, created_at) VALUES (?, ?, ?)
         ON CONFLICT(source, issued_at) DO UPDATE SET source = excluded.source
         RETURNING run_id",
    )
    .bind(source)
    .bind(format_timestamp(issued_at))
    .bind(now_timestamp())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to register run for {}", source))?;
    Ok(run_id)
}
