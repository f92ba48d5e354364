use serde_json::{Number, Value};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::ipc::{ReadMode, Row};
use crate::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// The node database, owned by the coordinator process alone.
///
/// The pool sits behind a lock so it can be closed and reopened while
/// requests are paused.
pub struct DatabaseHandle {
    path: PathBuf,
    max_connections: u32,
    pool: RwLock<SqlitePool>,
}

impl DatabaseHandle {
    pub async fn open(path: impl Into<PathBuf>, max_connections: u32) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = connect(&path, max_connections).await?;
        run_migrations(&pool).await?;

        Ok(Self {
            path,
            max_connections,
            pool: RwLock::new(pool),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run one mutation, returning the affected row count.
    pub async fn execute(&self, query: &str, parameters: &[Value]) -> Result<u64> {
        let pool = self.pool.read().await;
        let result = bind_all(sqlx::query(query), parameters)
            .execute(&*pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch(&self, query: &str, parameters: &[Value], mode: ReadMode) -> Result<Vec<Row>> {
        let pool = self.pool.read().await;
        let rows = match mode {
            ReadMode::One => bind_all(sqlx::query(query), parameters)
                .fetch_optional(&*pool)
                .await?
                .into_iter()
                .collect(),
            ReadMode::All => bind_all(sqlx::query(query), parameters)
                .fetch_all(&*pool)
                .await?,
        };
        rows.iter().map(row_to_json).collect()
    }

    /// Close every connection and open a fresh pool on the same file.
    pub async fn reopen(&self) -> Result<()> {
        let mut pool = self.pool.write().await;
        pool.close().await;
        let fresh = connect(&self.path, self.max_connections).await?;
        run_migrations(&fresh).await?;
        *pool = fresh;
        tracing::info!(path = %self.path.display(), "Database reopened");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

async fn connect(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    tracing::info!(
        path = %path.display(),
        max_connections,
        "Database pool initialized"
    );
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Bind JSON parameters positionally. Arrays and objects are bound as their
/// JSON text.
fn bind_all<'q>(mut query: SqliteQuery<'q>, parameters: &'q [Value]) -> SqliteQuery<'q> {
    for parameter in parameters {
        query = match parameter {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => bind_number(query, n),
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn bind_number<'q>(query: SqliteQuery<'q>, n: &Number) -> SqliteQuery<'q> {
    if let Some(i) = n.as_i64() {
        query.bind(i)
    } else if let Some(f) = n.as_f64() {
        query.bind(f)
    } else {
        query.bind(n.to_string())
    }
}

/// Convert a row by its runtime storage classes. BLOBs become hex text.
fn row_to_json(row: &SqliteRow) -> Result<Row> {
    let mut object = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
                    .map_or(Value::Null, Value::Number),
                "BLOB" => Value::String(hex::encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_and_fetch_roundtrip_types() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseHandle::open(dir.path().join("db/node.sqlite"), 2)
            .await
            .unwrap();

        let affected = db
            .execute(
                "INSERT INTO videos (video_id, title, is_streaming, meta, creation_timestamp) VALUES (?, ?, ?, ?, ?)",
                &[
                    json!("abcDEF_-123"),
                    json!("Live"),
                    json!(true),
                    json!({"outputs": {"m3u8": ["720p"]}}),
                    json!(1_700_000_000_000_i64),
                ],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = db
            .fetch(
                "SELECT video_id, title, is_streaming, meta, views FROM videos WHERE video_id = ?",
                &[json!("abcDEF_-123")],
                ReadMode::One,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["video_id"], json!("abcDEF_-123"));
        assert_eq!(row["is_streaming"], json!(1));
        assert_eq!(row["views"], json!(0));
        let meta: Value = serde_json::from_str(row["meta"].as_str().unwrap()).unwrap();
        assert_eq!(meta["outputs"]["m3u8"], json!(["720p"]));
    }

    #[tokio::test]
    async fn test_fetch_one_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseHandle::open(dir.path().join("node.sqlite"), 1).await.unwrap();
        let rows = db
            .fetch("SELECT * FROM videos WHERE video_id = ?", &[json!("nope")], ReadMode::One)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseHandle::open(dir.path().join("node.sqlite"), 1).await.unwrap();
        db.execute("INSERT INTO videos (video_id) VALUES (?)", &[json!("abcDEF_-123")])
            .await
            .unwrap();

        db.reopen().await.unwrap();

        let rows = db
            .fetch("SELECT video_id FROM videos", &[], ReadMode::All)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_statement_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseHandle::open(dir.path().join("node.sqlite"), 1).await.unwrap();
        assert!(db.execute("UPDATE nowhere SET x = 1", &[]).await.is_err());
    }
}
