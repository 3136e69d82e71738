//! `PostgreSQL` implementation of [`CounterStore`].

use chrono::{DateTime, Utc};
use jersey_core::counter::{CounterSnapshot, CounterState};
use jersey_core::number::{CounterKey, Version};
use jersey_core::store::{CounterStore, CounterStoreError, StoreFuture};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// SQLSTATE codes worth another attempt.
///
/// `40001` `serialization_failure`, `40P01` `deadlock_detected`,
/// `55P03` `lock_not_available`, `57014` `query_canceled` (statement
/// timeout), `57P01` `admin_shutdown`, `53300` `too_many_connections`.
/// Class `08` (connection exceptions) is matched by prefix.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "57014", "57P01", "53300"];

/// Statement timeout used by [`PostgresCounterStore::new`].
const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(sqlx::FromRow)]
struct CounterRow {
    counter_key: String,
    last_assigned: i64,
    free_numbers: Vec<i64>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl CounterRow {
    fn into_snapshot(self) -> Result<CounterSnapshot, CounterStoreError> {
        let key = CounterKey::new(self.counter_key);
        let corrupted = |reason: String| CounterStoreError::CorruptedState {
            key: key.clone(),
            reason,
        };

        let last_assigned = u64::try_from(self.last_assigned)
            .map_err(|_| corrupted(format!("negative last_assigned {}", self.last_assigned)))?;
        let free_numbers = self
            .free_numbers
            .iter()
            .map(|&n| u64::try_from(n).map_err(|_| corrupted(format!("negative free number {n}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let version = u64::try_from(self.version)
            .map_err(|_| corrupted(format!("negative version {}", self.version)))?;

        let state = CounterState::from_parts(last_assigned, free_numbers)
            .map_err(|violation| corrupted(violation.to_string()))?;

        Ok(CounterSnapshot {
            key,
            state,
            version: Version::new(version),
            updated_at: self.updated_at,
        })
    }
}

/// Counter store backed by the `jersey_counters` table.
///
/// Compare-and-swap is a single conditional `UPDATE ... WHERE version = $n`;
/// no explicit transactions or row locks are taken, so readers never block.
///
/// Each write also stores a random `write_token`. When the connection drops
/// while the `UPDATE` is in flight, the store looks for its own token at
/// `expected.next()` and reports the write as committed if it finds it. If
/// another writer has already moved the record further, the outcome cannot be
/// recovered and the attempt fails as `Transient`; a retried allocation then
/// strands the lost number until it is released by hand.
///
/// # Example
///
/// ```no_run
/// use jersey_postgres::PostgresCounterStore;
/// use jersey_core::store::CounterStore;
/// use jersey_core::CounterKey;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresCounterStore::new("postgres://localhost/jersey").await?;
/// store.migrate().await?;
///
/// let snapshot = store.initialize(CounterKey::default()).await?;
/// println!("last assigned: {}", snapshot.state.last_assigned());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresCounterStore {
    pool: PgPool,
}

impl PostgresCounterStore {
    /// Connect with default pool settings (10 connections, 30s acquire
    /// timeout, 5s statement timeout).
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, CounterStoreError> {
        Self::connect(database_url, 10, Duration::from_secs(30), DEFAULT_STATEMENT_TIMEOUT).await
    }

    /// Connect with explicit pool settings.
    ///
    /// `statement_timeout` is set on every connection so the server cancels
    /// any single query that runs longer; the allocator only checks its own
    /// deadline between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError::DatabaseError`] if the URL is invalid or
    /// the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        statement_timeout: Duration,
    ) -> Result<Self, CounterStoreError> {
        let statement_timeout_ms = statement_timeout.as_millis();
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| CounterStoreError::DatabaseError(format!("Invalid database URL: {e}")))?
            .options([("statement_timeout", statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| CounterStoreError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections,
            statement_timeout_ms = u64::try_from(statement_timeout_ms).unwrap_or(u64::MAX),
            "Connected to counter database"
        );
        Ok(Self::from_pool(pool))
    }

    /// Use an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `jersey_counters` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError::DatabaseError`] if migration fails.
    pub async fn migrate(&self) -> Result<(), CounterStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CounterStoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn fetch(&self, key: &CounterKey) -> Result<Option<CounterSnapshot>, CounterStoreError> {
        let row: Option<CounterRow> = sqlx::query_as(
            r"
            SELECT counter_key, last_assigned, free_numbers, version, updated_at
            FROM jersey_counters
            WHERE counter_key = $1
            ",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("load", &e))?;

        row.map(CounterRow::into_snapshot).transpose()
    }

    async fn current_version(&self, key: &CounterKey) -> Result<Option<Version>, CounterStoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM jersey_counters WHERE counter_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify("version", &e))?;

        row.map(|(v,)| {
            u64::try_from(v)
                .map(Version::new)
                .map_err(|_| CounterStoreError::CorruptedState {
                    key: key.clone(),
                    reason: format!("negative version {v}"),
                })
        })
        .transpose()
    }

    /// Find the commit that moved `key` to `version` with `write_token`.
    ///
    /// Returns `None` if the record is at another version or was written by
    /// someone else.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails or the row is corrupted.
    pub async fn find_commit(
        &self,
        key: &CounterKey,
        version: Version,
        write_token: i64,
    ) -> Result<Option<CounterSnapshot>, CounterStoreError> {
        let Ok(version) = i64::try_from(version.value()) else {
            return Ok(None);
        };
        let row: Option<CounterRow> = sqlx::query_as(
            r"
            SELECT counter_key, last_assigned, free_numbers, version, updated_at
            FROM jersey_counters
            WHERE counter_key = $1 AND version = $2 AND write_token = $3
            ",
        )
        .bind(key.as_str())
        .bind(version)
        .bind(write_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("find_commit", &e))?;

        row.map(CounterRow::into_snapshot).transpose()
    }
}

impl CounterStore for PostgresCounterStore {
    fn initialize(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot> {
        Box::pin(async move {
            let inserted = sqlx::query(
                r"
                INSERT INTO jersey_counters (counter_key)
                VALUES ($1)
                ON CONFLICT (counter_key) DO NOTHING
                ",
            )
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| classify("initialize", &e))?
            .rows_affected();

            if inserted > 0 {
                tracing::info!(counter = %key, "Counter record created");
            }

            self.fetch(&key)
                .await?
                .ok_or(CounterStoreError::NotInitialized(key))
        })
    }

    fn load(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot> {
        Box::pin(async move {
            self.fetch(&key)
                .await?
                .ok_or(CounterStoreError::NotInitialized(key))
        })
    }

    fn compare_and_swap(
        &self,
        key: CounterKey,
        expected: Version,
        state: CounterState,
    ) -> StoreFuture<'_, CounterSnapshot> {
        Box::pin(async move {
            let expected_i64 = i64::try_from(expected.value()).map_err(|_| {
                CounterStoreError::DatabaseError(format!("version {expected} exceeds BIGINT"))
            })?;
            let last_assigned = i64::try_from(state.last_assigned()).map_err(|_| {
                CounterStoreError::DatabaseError(format!(
                    "last_assigned {} exceeds BIGINT",
                    state.last_assigned()
                ))
            })?;
            // Every free number is below last_assigned, so these fit as well.
            let free_numbers: Vec<i64> = state
                .free_numbers_raw()
                .into_iter()
                .filter_map(|n| i64::try_from(n).ok())
                .collect();

            let write_token: i64 = rand::random();

            let result: Result<Option<CounterRow>, sqlx::Error> = sqlx::query_as(
                r"
                UPDATE jersey_counters
                SET last_assigned = $3,
                    free_numbers = $4,
                    version = version + 1,
                    write_token = $5,
                    updated_at = now()
                WHERE counter_key = $1 AND version = $2
                RETURNING counter_key, last_assigned, free_numbers, version, updated_at
                ",
            )
            .bind(key.as_str())
            .bind(expected_i64)
            .bind(last_assigned)
            .bind(&free_numbers)
            .bind(write_token)
            .fetch_optional(&self.pool)
            .await;

            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    let error = classify("compare_and_swap", &e);
                    if error.is_retryable() {
                        // The UPDATE may have committed before the reply was lost.
                        if let Ok(Some(snapshot)) =
                            self.find_commit(&key, expected.next(), write_token).await
                        {
                            tracing::warn!(
                                counter = %key,
                                version = %snapshot.version,
                                "Recovered compare-and-swap after lost acknowledgement"
                            );
                            return Ok(snapshot);
                        }
                    }
                    return Err(error);
                }
            };

            if let Some(row) = row {
                return row.into_snapshot();
            }

            // Nothing matched: either someone else moved the version or the
            // row is gone.
            match self.current_version(&key).await? {
                Some(actual) => {
                    tracing::debug!(counter = %key, %expected, %actual, "Version conflict");
                    Err(CounterStoreError::ConcurrencyConflict {
                        key,
                        expected,
                        actual,
                    })
                }
                None => Err(CounterStoreError::NotInitialized(key)),
            }
        })
    }
}

/// Map a sqlx error to a store error, separating retryable failures.
fn classify(query: &'static str, error: &sqlx::Error) -> CounterStoreError {
    let transient = match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    };

    metrics::counter!(
        "jersey_store_errors_total",
        "query" => query,
        "kind" => if transient { "transient" } else { "permanent" }
    )
    .increment(1);

    if transient {
        tracing::warn!(query, error = %error, "Transient database error");
        CounterStoreError::Transient(format!("{query}: {error}"))
    } else {
        tracing::error!(query, error = %error, "Database error");
        CounterStoreError::DatabaseError(format!("{query}: {error}"))
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code)
}
