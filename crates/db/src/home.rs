use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// A home owned by a user (§4.2 Home Ownership). The relay reads this table;
/// rows are populated by whatever external process owns home provisioning,
/// not by the relay itself.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Home {
    pub home_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait HomeStore: Send + Sync {
    /// Resolve a home by the first 8 hex characters of its id, matched
    /// case-insensitively (§4.8 Scope Router mount prefix).
    async fn get_by_prefix(&self, home_id_prefix: &str) -> anyhow::Result<Option<Home>>;
}

pub struct PgHomeStore {
    pool: PgPool,
}

impl PgHomeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HomeStore for PgHomeStore {
    async fn get_by_prefix(&self, home_id_prefix: &str) -> anyhow::Result<Option<Home>> {
        let prefix = home_id_prefix.to_lowercase();
        let home = sqlx::query_as::<_, Home>(
            "SELECT home_id, user_id, name, updated_at FROM homes
             WHERE lower(home_id::text) LIKE $1 || '%'
             LIMIT 1",
        )
        .bind(&prefix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(home)
    }
}
