//! Session Registry (C5, §4.5): the database-backed record of every live
//! agent and listener session across all processes. This is how a process
//! discovers which instance owns a given agent, and whether a user has any
//! listeners anywhere, without holding state for sockets it doesn't own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homecast_protocol::{AGENT_STALE_SECONDS, LISTENER_STALE_SECONDS};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SessionType {
    Agent,
    Listener,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub instance_id: String,
    pub session_type: SessionType,
    pub agent_id: Option<String>,
    pub name: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Create or refresh an agent session. A reconnect with the same
    /// `agent_id` updates `instance_id` in place rather than inserting a
    /// second row (the unique index on `agent_id` would reject the insert
    /// otherwise, but this also skips the replaced session's old created_at).
    async fn upsert_agent(
        &self,
        user_id: Uuid,
        instance_id: &str,
        agent_id: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Session>;

    /// Create a new listener session; each listener socket gets its own row.
    async fn upsert_listener(
        &self,
        user_id: Uuid,
        instance_id: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Uuid>;

    async fn heartbeat(&self, session_id: Uuid) -> anyhow::Result<bool>;

    async fn heartbeat_by_agent(&self, agent_id: &str) -> anyhow::Result<bool>;

    async fn delete(&self, session_id: Uuid) -> anyhow::Result<bool>;

    async fn delete_by_agent(&self, agent_id: &str) -> anyhow::Result<bool>;

    /// Remove every session row owned by `instance_id` (process shutdown).
    async fn delete_by_instance(&self, instance_id: &str) -> anyhow::Result<u64>;

    /// `true` iff at least one non-stale listener session exists for `user_id`,
    /// on any process.
    async fn user_has_active_listeners(&self, user_id: Uuid) -> anyhow::Result<bool>;

    /// Which instance currently owns `agent_id`, if any and non-stale.
    async fn agent_location(&self, agent_id: &str) -> anyhow::Result<Option<String>>;

    /// First non-stale agent session owned by `user_id`, if any. Used to
    /// resolve "the" agent for a user when a caller addresses a user scope
    /// rather than a specific agent id.
    async fn agent_for_user(&self, user_id: Uuid) -> anyhow::Result<Option<String>>;

    /// All non-stale agent ids owned by `user_id`, for fan-out notifications.
    async fn agents_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<String>>;

    /// Delete sessions whose heartbeat predates the stale window for their type.
    async fn garbage_collect_stale(&self) -> anyhow::Result<u64>;
}

pub struct PgSessionRegistry {
    pool: PgPool,
}

impl PgSessionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRegistry for PgSessionRegistry {
    async fn upsert_agent(
        &self,
        user_id: Uuid,
        instance_id: &str,
        agent_id: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Session> {
        let session = sqlx::query_as::<_, Session>(
            "INSERT INTO sessions (user_id, instance_id, session_type, agent_id, name, last_heartbeat)
             VALUES ($1, $2, 'agent', $3, $4, now())
             ON CONFLICT (agent_id) WHERE agent_id IS NOT NULL DO UPDATE SET
               instance_id = excluded.instance_id,
               user_id = excluded.user_id,
               name = COALESCE(excluded.name, sessions.name),
               last_heartbeat = now()
             RETURNING id, user_id, instance_id, session_type, agent_id, name, last_heartbeat, created_at",
        )
        .bind(user_id)
        .bind(instance_id)
        .bind(agent_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    async fn upsert_listener(
        &self,
        user_id: Uuid,
        instance_id: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            "INSERT INTO sessions (user_id, instance_id, session_type, name, last_heartbeat)
             VALUES ($1, $2, 'listener', $3, now())
             RETURNING id",
        )
        .bind(user_id)
        .bind(instance_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id.0)
    }

    async fn heartbeat(&self, session_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE sessions SET last_heartbeat = now() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat_by_agent(&self, agent_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE sessions SET last_heartbeat = now() WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, session_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_agent(&self, agent_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_instance(&self, instance_id: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        let n = result.rows_affected();
        if n > 0 {
            tracing::info!(count = n, instance_id, "cleared sessions for instance");
        }
        Ok(n)
    }

    async fn user_has_active_listeners(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sessions
             WHERE user_id = $1 AND session_type = 'listener'
               AND last_heartbeat > now() - ($2 || ' seconds')::interval
             LIMIT 1",
        )
        .bind(user_id)
        .bind(LISTENER_STALE_SECONDS.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn agent_location(&self, agent_id: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT instance_id FROM sessions
             WHERE agent_id = $1 AND session_type = 'agent'
               AND last_heartbeat > now() - ($2 || ' seconds')::interval",
        )
        .bind(agent_id)
        .bind(AGENT_STALE_SECONDS.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(instance,)| instance))
    }

    async fn agent_for_user(&self, user_id: Uuid) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT agent_id FROM sessions
             WHERE user_id = $1 AND session_type = 'agent'
               AND last_heartbeat > now() - ($2 || ' seconds')::interval
             LIMIT 1",
        )
        .bind(user_id)
        .bind(AGENT_STALE_SECONDS.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(agent_id,)| agent_id))
    }

    async fn agents_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT agent_id FROM sessions
             WHERE user_id = $1 AND session_type = 'agent'
               AND last_heartbeat > now() - ($2 || ' seconds')::interval",
        )
        .bind(user_id)
        .bind(AGENT_STALE_SECONDS.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(agent_id,)| agent_id).collect())
    }

    async fn garbage_collect_stale(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE
               (session_type = 'agent' AND last_heartbeat < now() - ($1 || ' seconds')::interval)
            OR (session_type = 'listener' AND last_heartbeat < now() - ($2 || ' seconds')::interval)",
        )
        .bind(AGENT_STALE_SECONDS.to_string())
        .bind(LISTENER_STALE_SECONDS.to_string())
        .execute(&self.pool)
        .await?;
        let n = result.rows_affected();
        if n > 0 {
            tracing::info!(count = n, "garbage collected stale sessions");
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_type_round_trips_through_matching_variants() {
        assert_eq!(SessionType::Agent, SessionType::Agent);
        assert_ne!(SessionType::Agent, SessionType::Listener);
    }
}
