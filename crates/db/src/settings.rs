use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Per-user authentication policy for scoped routes (§4.2 User Settings).
///
/// Missing or malformed settings default both flags to `true` — the relay
/// fails closed, not open.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ScopeAuthPolicy {
    pub home_auth_required: bool,
    pub user_scope_auth_required: bool,
}

impl Default for ScopeAuthPolicy {
    fn default() -> Self {
        Self {
            home_auth_required: true,
            user_scope_auth_required: true,
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<ScopeAuthPolicy>;
}

pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<ScopeAuthPolicy> {
        let row = sqlx::query_as::<_, ScopeAuthPolicy>(
            "SELECT home_auth_required, user_scope_auth_required
             FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_closed() {
        let policy = ScopeAuthPolicy::default();
        assert!(policy.home_auth_required);
        assert!(policy.user_scope_auth_required);
    }
}
