use super::{api_key::ApiKeyRecord, AuthError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{collections::BTreeSet, collections::HashMap, str::FromStr};

/// Repository trait for API key persistence.
///
/// Implementations store records as facts (timestamps) only; status is derived by callers.
/// Every method that changes a record must be atomic with respect to concurrent callers.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Persists a new record. Fails if the id or blind index already exists.
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKeyRecord>, AuthError>;

    /// Looks a record up by its blind index regardless of status.
    ///
    /// The caller must still verify the Argon2 hash.
    async fn find_by_blind_index(&self, blind_index: &str)
        -> Result<Option<ApiKeyRecord>, AuthError>;

    /// Returns the record created by rotating `id`, if any.
    async fn find_successor(&self, id: &str) -> Result<Option<ApiKeyRecord>, AuthError>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError>;

    async fn list_all(&self) -> Result<Vec<ApiKeyRecord>, AuthError>;

    /// Sets `revoked_at` if it is not already set and returns the resulting record.
    ///
    /// Returns `None` when no record has this id. Revoking twice keeps the first timestamp.
    async fn revoke(&self, id: &str, at: DateTime<Utc>)
        -> Result<Option<ApiKeyRecord>, AuthError>;

    /// Atomically revokes `predecessor_id` and inserts `successor`.
    ///
    /// Returns `false`, leaving storage untouched, when the predecessor is missing or was
    /// already revoked.
    async fn rotate(
        &self,
        predecessor_id: &str,
        successor: &ApiKeyRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, AuthError>;

    /// Records a successful use of `id`. Unknown ids are ignored.
    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Deletes records revoked or expired strictly before `cutoff`. Returns the count removed.
    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuthError>;
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS api_keys (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        name TEXT,
        key_prefix TEXT NOT NULL,
        secret_hash TEXT NOT NULL,
        blind_index TEXT NOT NULL,
        scopes TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL,
        expires_at TIMESTAMP,
        revoked_at TIMESTAMP,
        last_used_at TIMESTAMP,
        rotated_from_id TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_api_keys_blind_index ON api_keys(blind_index);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_api_keys_rotated_from ON api_keys(rotated_from_id);
    CREATE INDEX IF NOT EXISTS idx_api_keys_owner ON api_keys(owner_id);
";

const SELECT_COLUMNS: &str = "SELECT id, owner_id, name, key_prefix, secret_hash, blind_index, \
     scopes, created_at, expires_at, revoked_at, last_used_at, rotated_from_id FROM api_keys";

/// Durable repository backed by `SQLite`.
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Connects and applies the schema. The database file is created if missing.
    ///
    /// # Errors
    /// Returns `AuthError::DatabaseError` if the URL is invalid or the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, AuthError> {
        if !database_url.starts_with("sqlite:") && database_url != ":memory:" {
            return Err(AuthError::DatabaseError(format!(
                "unsupported database URL scheme: {}",
                database_url.split(':').next().unwrap_or_default()
            )));
        }

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AuthError::DatabaseError(format!(
                            "failed to create database directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
            }
        }

        // Each in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Self::add_missing_columns(&pool).await?;

        Ok(Self { pool })
    }

    /// Brings databases created before `last_used_at` existed up to the current schema.
    async fn add_missing_columns(pool: &Pool<Sqlite>) -> Result<(), AuthError> {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('api_keys') WHERE name = 'last_used_at'",
        )
        .fetch_one(pool)
        .await?;

        if present == 0 {
            sqlx::query("ALTER TABLE api_keys ADD COLUMN last_used_at TIMESTAMP")
                .execute(pool)
                .await?;
        }
        Ok(())
    }

    /// Extracts a non-nullable field from a database row.
    /// Returns `DatabaseError` if field is NULL or cannot be decoded.
    fn get_required<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, AuthError>
    where
        T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
    {
        row.try_get::<T, _>(column)
            .map_err(|e| AuthError::DatabaseError(format!("column '{column}': {e}")))
    }

    fn get_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, AuthError> {
        Ok(Self::get_required::<Option<NaiveDateTime>>(row, column)?
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)))
    }

    fn row_to_record(row: &SqliteRow) -> Result<ApiKeyRecord, AuthError> {
        let scopes_json: String = Self::get_required(row, "scopes")?;
        let scopes: BTreeSet<String> = serde_json::from_str(&scopes_json)
            .map_err(|e| AuthError::DatabaseError(format!("column 'scopes': {e}")))?;

        Ok(ApiKeyRecord {
            id: Self::get_required(row, "id")?,
            owner_id: Self::get_required(row, "owner_id")?,
            name: Self::get_required(row, "name")?,
            key_prefix: Self::get_required(row, "key_prefix")?,
            secret_hash: Self::get_required(row, "secret_hash")?,
            blind_index: Self::get_required(row, "blind_index")?,
            scopes,
            created_at: DateTime::from_naive_utc_and_offset(
                Self::get_required(row, "created_at")?,
                Utc,
            ),
            expires_at: Self::get_timestamp(row, "expires_at")?,
            revoked_at: Self::get_timestamp(row, "revoked_at")?,
            last_used_at: Self::get_timestamp(row, "last_used_at")?,
            rotated_from_id: Self::get_required(row, "rotated_from_id")?,
        })
    }

    fn encode_scopes(record: &ApiKeyRecord) -> Result<String, AuthError> {
        serde_json::to_string(&record.scopes)
            .map_err(|e| AuthError::DatabaseError(format!("failed to encode scopes: {e}")))
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<ApiKeyRecord>, AuthError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause} = ?");
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.map(|row| Self::row_to_record(&row)).transpose()
    }

    async fn insert_with<'e, E>(executor: E, record: &ApiKeyRecord) -> Result<(), AuthError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r"
            INSERT INTO api_keys (id, owner_id, name, key_prefix, secret_hash, blind_index,
                                  scopes, created_at, expires_at, revoked_at, last_used_at,
                                  rotated_from_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.name)
        .bind(&record.key_prefix)
        .bind(&record.secret_hash)
        .bind(&record.blind_index)
        .bind(Self::encode_scopes(record)?)
        .bind(record.created_at.naive_utc())
        .bind(record.expires_at.map(|dt| dt.naive_utc()))
        .bind(record.revoked_at.map(|dt| dt.naive_utc()))
        .bind(record.last_used_at.map(|dt| dt.naive_utc()))
        .bind(&record.rotated_from_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepository for SqliteRepository {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError> {
        Self::insert_with(&self.pool, record).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        self.fetch_one_where("id", id).await
    }

    async fn find_by_blind_index(
        &self,
        blind_index: &str,
    ) -> Result<Option<ApiKeyRecord>, AuthError> {
        self.fetch_one_where("blind_index", blind_index).await
    }

    async fn find_successor(&self, id: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        self.fetch_one_where("rotated_from_id", id).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let sql = format!("{SELECT_COLUMNS} WHERE owner_id = ? ORDER BY created_at DESC, id");
        let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_all(&self) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn revoke(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>, AuthError> {
        sqlx::query(
            r"
            UPDATE api_keys
            SET revoked_at = ?
            WHERE id = ? AND revoked_at IS NULL
            ",
        )
        .bind(at.naive_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await
    }

    async fn rotate(
        &self,
        predecessor_id: &str,
        successor: &ApiKeyRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            r"
            UPDATE api_keys
            SET revoked_at = ?
            WHERE id = ? AND revoked_at IS NULL
            ",
        )
        .bind(at.naive_utc())
        .bind(predecessor_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if revoked != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_with(&mut *tx, successor).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(at.naive_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuthError> {
        let deleted = sqlx::query(
            r"
            DELETE FROM api_keys
            WHERE (revoked_at IS NOT NULL AND revoked_at < ?)
               OR (expires_at IS NOT NULL AND expires_at < ?)
            ",
        )
        .bind(cutoff.naive_utc())
        .bind(cutoff.naive_utc())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }
}

/// Process-local repository for tests and embedding. Contents are lost on drop.
#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find_where(&self, pred: impl Fn(&ApiKeyRecord) -> bool) -> Option<ApiKeyRecord> {
        self.records.read().values().find(|r| pred(r)).cloned()
    }

    fn sorted(mut records: Vec<ApiKeyRecord>) -> Vec<ApiKeyRecord> {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    fn check_unique(
        records: &HashMap<String, ApiKeyRecord>,
        record: &ApiKeyRecord,
    ) -> Result<(), AuthError> {
        let conflict = records.contains_key(&record.id)
            || records.values().any(|existing| {
                existing.blind_index == record.blind_index
                    || (record.rotated_from_id.is_some()
                        && existing.rotated_from_id == record.rotated_from_id)
            });

        if conflict {
            Err(AuthError::DatabaseError("UNIQUE constraint failed: api_keys".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryRepository {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), AuthError> {
        let mut records = self.records.write();
        Self::check_unique(&records, record)?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn find_by_blind_index(
        &self,
        blind_index: &str,
    ) -> Result<Option<ApiKeyRecord>, AuthError> {
        Ok(self.find_where(|r| r.blind_index == blind_index))
    }

    async fn find_successor(&self, id: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        Ok(self.find_where(|r| r.rotated_from_id.as_deref() == Some(id)))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let records =
            self.records.read().values().filter(|r| r.owner_id == owner_id).cloned().collect();
        Ok(Self::sorted(records))
    }

    async fn list_all(&self) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let records = self.records.read().values().cloned().collect();
        Ok(Self::sorted(records))
    }

    async fn revoke(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>, AuthError> {
        let mut records = self.records.write();
        Ok(records.get_mut(id).map(|record| {
            record.revoked_at.get_or_insert(at);
            record.clone()
        }))
    }

    async fn rotate(
        &self,
        predecessor_id: &str,
        successor: &ApiKeyRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let mut records = self.records.write();

        match records.get(predecessor_id) {
            Some(predecessor) if predecessor.revoked_at.is_none() => {}
            _ => return Ok(false),
        }
        Self::check_unique(&records, successor)?;

        if let Some(predecessor) = records.get_mut(predecessor_id) {
            predecessor.revoked_at = Some(at);
        }
        records.insert(successor.id.clone(), successor.clone());
        Ok(true)
    }

    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(record) = self.records.write().get_mut(id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| {
            !(r.revoked_at.is_some_and(|t| t < cutoff) || r.expires_at.is_some_and(|t| t < cutoff))
        });
        Ok((before - records.len()) as u64)
    }
}
