use crate::types::{
    AnalysisStatus, Entities, IngestError, NewItem, ReadStatus, Result, StoredItem,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence boundary for ingested items. The link column is unique; the
/// store is the authority on duplicates.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_by_link(&self, link: &str) -> Result<Option<StoredItem>>;

    /// Inserts a new item. A link that is already stored fails with
    /// [`IngestError::DuplicateLink`].
    async fn insert(&self, item: &NewItem) -> Result<Uuid>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    link TEXT NOT NULL UNIQUE,
    source_name TEXT NOT NULL,
    published_at TEXT NOT NULL,
    summary TEXT,
    entities TEXT,
    topics TEXT,
    content_type TEXT,
    raw_content TEXT,
    read_status TEXT NOT NULL DEFAULT 'unread',
    analysis_status TEXT NOT NULL DEFAULT 'unprocessed',
    story_group_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_items_source ON items (source_name);
CREATE INDEX IF NOT EXISTS idx_items_published ON items (published_at);
CREATE INDEX IF NOT EXISTS idx_items_analysis_status ON items (analysis_status);
CREATE INDEX IF NOT EXISTS idx_items_story_group ON items (story_group_id);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(3));

        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { db };
        store.init_schema().await?;
        info!("Opened item store: {}", database_url);
        Ok(store)
    }

    /// A private in-memory database. One connection, so every query sees the
    /// same data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.db).await?;
        debug!("Item schema ready");
        Ok(())
    }

    pub async fn recent_items(&self, limit: usize) -> Result<Vec<StoredItem>> {
        let rows = sqlx::query(
            "SELECT * FROM items ORDER BY published_at DESC, created_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn set_read_status(&self, id: Uuid, status: ReadStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET read_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_items(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn find_by_link(&self, link: &str) -> Result<Option<StoredItem>> {
        let row = sqlx::query("SELECT * FROM items WHERE link = ?")
            .bind(link)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert(&self, item: &NewItem) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let entities = item.entities.as_ref().map(serde_json::to_string).transpose()
            .map_err(|e| IngestError::General(format!("encode entities: {}", e)))?;
        let topics = item.topics.as_ref().map(serde_json::to_string).transpose()
            .map_err(|e| IngestError::General(format!("encode topics: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO items (id, title, link, source_name, published_at, summary, entities, topics,
                               content_type, raw_content, read_status, analysis_status, story_group_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.source_name)
        .bind(item.published_at)
        .bind(&item.summary)
        .bind(entities)
        .bind(topics)
        .bind(&item.content_type)
        .bind(&item.raw_content)
        .bind(item.read_status.as_str())
        .bind(item.analysis_status.as_str())
        .bind(&item.story_group_id)
        .bind(Utc::now())
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {
                debug!("Stored item {} ({})", item.link, id);
                Ok(id)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(IngestError::DuplicateLink {
                    link: item.link.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn item_from_row(row: &SqliteRow) -> Result<StoredItem> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| IngestError::General(format!("corrupt item id {}: {}", id, e)))?;

    let entities = row
        .try_get::<Option<String>, _>("entities")?
        .map(|json| serde_json::from_str::<Entities>(&json))
        .transpose()
        .map_err(|e| IngestError::General(format!("decode entities: {}", e)))?;
    let topics = row
        .try_get::<Option<String>, _>("topics")?
        .map(|json| serde_json::from_str::<Vec<String>>(&json))
        .transpose()
        .map_err(|e| IngestError::General(format!("decode topics: {}", e)))?;

    let read_status: String = row.try_get("read_status")?;
    let analysis_status: String = row.try_get("analysis_status")?;

    Ok(StoredItem {
        id,
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        source_name: row.try_get("source_name")?,
        published_at: row.try_get::<DateTime<Utc>, _>("published_at")?,
        summary: row.try_get("summary")?,
        entities,
        topics,
        content_type: row.try_get("content_type")?,
        raw_content: row.try_get("raw_content")?,
        read_status: ReadStatus::parse(&read_status).unwrap_or(ReadStatus::Unread),
        analysis_status: AnalysisStatus::parse(&analysis_status)
            .unwrap_or(AnalysisStatus::Unprocessed),
        story_group_id: row.try_get("story_group_id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}
