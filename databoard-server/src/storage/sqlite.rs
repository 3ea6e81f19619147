//! SQLite storage backend

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use databoard::dashboard::DashboardDocument;
use databoard::dashboard::store::{
    DocumentFilter, DocumentPatch, DocumentStore, DocumentSummary, StoreError, StoreResult,
};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions, sqlite::SqliteRow};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database
    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dashboards (
                id TEXT PRIMARY KEY,
                dashboard_json TEXT NOT NULL,
                size INTEGER NOT NULL,
                last_access TEXT NOT NULL,
                whitelisted INTEGER NOT NULL DEFAULT 0,
                protected INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The eviction sweep walks documents oldest first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dashboards_last_access ON dashboards(last_access)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    StoreError(e.to_string())
}

/// Fixed-width UTC text so string order is time order
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError(format!("bad last_access {:?}: {}", s, e)))
}

fn flag(value: Option<bool>) -> Option<i32> {
    value.map(i32::from)
}

fn row_to_document(row: SqliteRow) -> StoreResult<DashboardDocument> {
    let dashboard_json: String = row.try_get("dashboard_json").map_err(store_err)?;
    let last_access: String = row.try_get("last_access").map_err(store_err)?;
    let size: i64 = row.try_get("size").map_err(store_err)?;

    Ok(DashboardDocument {
        id: row.try_get("id").map_err(store_err)?,
        dashboard: serde_json::from_str(&dashboard_json)
            .map_err(|e| StoreError(format!("stored dashboard is not JSON: {}", e)))?,
        size: size.max(0) as u64,
        last_access: parse_timestamp(&last_access)?,
        whitelisted: row.try_get::<i32, _>("whitelisted").map_err(store_err)? != 0,
        protected: row.try_get::<i32, _>("protected").map_err(store_err)? != 0,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, doc: DashboardDocument) -> StoreResult<()> {
        let dashboard_json = serde_json::to_string(&doc.dashboard)
            .map_err(|e| StoreError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO dashboards (id, dashboard_json, size, last_access, whitelisted, protected)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&dashboard_json)
        .bind(doc.size as i64)
        .bind(timestamp(doc.last_access))
        .bind(doc.whitelisted as i32)
        .bind(doc.protected as i32)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<DashboardDocument>> {
        sqlx::query("SELECT * FROM dashboards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .map(row_to_document)
            .transpose()
    }

    async fn find_and_update(
        &self,
        id: &str,
        filter: &DocumentFilter,
        patch: DocumentPatch,
    ) -> StoreResult<Option<DashboardDocument>> {
        let dashboard_json = patch
            .dashboard
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE dashboards SET
                dashboard_json = COALESCE(?, dashboard_json),
                size = COALESCE(?, size),
                last_access = COALESCE(?, last_access),
                whitelisted = COALESCE(?, whitelisted),
                protected = COALESCE(?, protected)
            WHERE id = ?
              AND (? IS NULL OR whitelisted = ?)
              AND (? IS NULL OR protected = ?)
            RETURNING *
            "#,
        )
        .bind(dashboard_json)
        .bind(patch.size.map(|s| s as i64))
        .bind(patch.last_access.map(timestamp))
        .bind(flag(patch.whitelisted))
        .bind(flag(patch.protected))
        .bind(id)
        .bind(flag(filter.whitelisted))
        .bind(flag(filter.whitelisted))
        .bind(flag(filter.protected))
        .bind(flag(filter.protected))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .map(row_to_document)
        .transpose()
    }

    async fn find_and_delete(
        &self,
        id: &str,
        filter: &DocumentFilter,
    ) -> StoreResult<Option<DashboardDocument>> {
        sqlx::query(
            r#"
            DELETE FROM dashboards
            WHERE id = ?
              AND (? IS NULL OR whitelisted = ?)
              AND (? IS NULL OR protected = ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(flag(filter.whitelisted))
        .bind(flag(filter.whitelisted))
        .bind(flag(filter.protected))
        .bind(flag(filter.protected))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .map(row_to_document)
        .transpose()
    }

    async fn total_size(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COALESCE(SUM(size), 0) AS total FROM dashboards")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let total: i64 = row.try_get("total").map_err(store_err)?;
        Ok(total.max(0) as u64)
    }

    async fn find_sorted(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, size, last_access FROM dashboards
            WHERE (? IS NULL OR whitelisted = ?)
              AND (? IS NULL OR protected = ?)
            ORDER BY last_access ASC, id ASC
            "#,
        )
        .bind(flag(filter.whitelisted))
        .bind(flag(filter.whitelisted))
        .bind(flag(filter.protected))
        .bind(flag(filter.protected))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| {
                let last_access: String = row.try_get("last_access").map_err(store_err)?;
                let size: i64 = row.try_get("size").map_err(store_err)?;
                Ok(DocumentSummary {
                    id: row.try_get("id").map_err(store_err)?,
                    size: size.max(0) as u64,
                    last_access: parse_timestamp(&last_access)?,
                })
            })
            .collect()
    }
}
