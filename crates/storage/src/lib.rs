use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{RecordId, UserId};

/// Default number of documents returned by one query, matching the hosted
/// store's default list limit.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

pub const USERS_COLLECTION: &str = "users";

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub collection: String,
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
}

impl Record {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityFilter {
    pub field: String,
    pub value: String,
}

impl EqualityFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One page of query results. `total` counts every match, not just the
/// documents returned.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub documents: Vec<Record>,
    pub total: u64,
}

/// Primitive capabilities of the document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_record(&self, collection: &str, id: RecordId, fields: Fields)
        -> Result<Record>;
    /// Documents come back oldest first.
    async fn query_records(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<RecordPage>;
    async fn delete_record(&self, collection: &str, id: &RecordId) -> Result<()>;
    async fn get_record(&self, collection: &str, id: &RecordId) -> Result<Option<Record>>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    page_size: u32,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Creates or renames a user document carrying a `name` field.
    pub async fn upsert_user(&self, collection: &str, user_id: &UserId, name: &str) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert("name".into(), Value::String(name.to_string()));
        let encoded = serde_json::to_string(&fields)?;
        sqlx::query(
            "INSERT INTO records (collection, id, fields, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(collection, id) DO UPDATE SET fields = excluded.fields",
        )
        .bind(collection)
        .bind(user_id.as_str())
        .bind(encoded)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert user '{user_id}'"))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn create_record(
        &self,
        collection: &str,
        id: RecordId,
        fields: Fields,
    ) -> Result<Record> {
        let created_at = Utc::now();
        let encoded = serde_json::to_string(&fields)?;
        sqlx::query("INSERT INTO records (collection, id, fields, created_at) VALUES (?, ?, ?, ?)")
            .bind(collection)
            .bind(id.as_str())
            .bind(encoded)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create record '{id}' in '{collection}'"))?;
        debug!(%collection, %id, "record created");
        Ok(Record {
            id,
            collection: collection.to_string(),
            fields,
            created_at,
        })
    }

    async fn query_records(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<RecordPage> {
        let mut where_clause = String::from("collection = ?");
        let mut paths = Vec::with_capacity(filters.len());
        for filter in filters {
            validate_field_name(&filter.field)?;
            where_clause.push_str(" AND json_extract(fields, ?) = ?");
            paths.push(format!("$.{}", filter.field));
        }

        let count_sql = format!("SELECT COUNT(*) FROM records WHERE {where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(collection);
        for (path, filter) in paths.iter().zip(filters) {
            count_query = count_query.bind(path.as_str()).bind(filter.value.as_str());
        }
        let total = count_query
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to count records in '{collection}'"))?;

        let list_sql = format!(
            "SELECT id, collection, fields, created_at FROM records WHERE {where_clause} ORDER BY seq ASC LIMIT ?"
        );
        let mut list_query = sqlx::query(&list_sql).bind(collection);
        for (path, filter) in paths.iter().zip(filters) {
            list_query = list_query.bind(path.as_str()).bind(filter.value.as_str());
        }
        let rows = list_query
            .bind(self.page_size)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list records in '{collection}'"))?;

        let documents = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordPage {
            documents,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn delete_record(&self, collection: &str, id: &RecordId) -> Result<()> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete record '{id}' from '{collection}'"))?;
        if result.rows_affected() == 0 {
            bail!("record '{id}' not found in '{collection}'");
        }
        debug!(%collection, %id, "record deleted");
        Ok(())
    }

    async fn get_record(&self, collection: &str, id: &RecordId) -> Result<Option<Record>> {
        let row = sqlx::query(
            "SELECT id, collection, fields, created_at FROM records WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load record '{id}' from '{collection}'"))?;
        row.as_ref().map(record_from_row).transpose()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let raw_fields: String = row.try_get(2)?;
    let fields: Fields =
        serde_json::from_str(&raw_fields).context("stored record fields are not a JSON object")?;
    Ok(Record {
        id: RecordId(row.try_get::<String, _>(0)?),
        collection: row.try_get::<String, _>(1)?,
        fields,
        created_at: row.try_get::<DateTime<Utc>, _>(3)?,
    })
}

fn validate_field_name(field: &str) -> Result<()> {
    if field.is_empty()
        || !field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("invalid filter field name '{field}'");
    }
    Ok(())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
