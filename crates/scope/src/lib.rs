//! Scope Router (C9, §4.8): resolves the `/home/{homeID}/...` and
//! `/user/...` mount prefixes to an owning user, decides whether the
//! request needs a bearer token, and (together with [`rewrite`]) splices
//! live home state into a buffered response when a tool description asks
//! for it.
//!
//! The original implementation threads `home_id`/`user_id`/auth context
//! through Python `contextvars` set on entry and cleared in a `finally`
//! block. Here they're just a plain struct returned from `resolve_home`/
//! `resolve_user` and passed explicitly to whatever needs them — no ambient
//! state to leak between requests or forget to clear.

pub mod error;
mod prefix;
pub mod rewrite;

use std::sync::Arc;

use homecast_auth::{extract_bearer, TokenAuthority};
use homecast_db::{HomeStore, ScopeAuthPolicy, SettingsStore};
use uuid::Uuid;

pub use error::{Error, Result};
pub use prefix::validate_home_id;
pub use rewrite::{splice_state, STATE_PLACEHOLDER};

/// Context resolved for a request scoped to a specific home.
#[derive(Debug, Clone)]
pub struct HomeScope {
    pub home_id: Uuid,
    pub home_id_prefix: String,
    pub user_id: Uuid,
}

/// Context resolved for a request scoped to "the current user" (no home).
#[derive(Debug, Clone)]
pub struct UserScope {
    pub user_id: Uuid,
}

pub struct ScopeRouter {
    homes: Arc<dyn HomeStore>,
    settings: Arc<dyn SettingsStore>,
    tokens: Arc<TokenAuthority>,
}

impl ScopeRouter {
    pub fn new(homes: Arc<dyn HomeStore>, settings: Arc<dyn SettingsStore>, tokens: Arc<TokenAuthority>) -> Self {
        Self {
            homes,
            settings,
            tokens,
        }
    }

    /// Resolve and authorize a `/home/{prefix}/...` request (§4.8 steps 1-4).
    pub async fn resolve_home(&self, raw_prefix: &str, auth_header: Option<&str>) -> Result<HomeScope> {
        let prefix = validate_home_id(raw_prefix)?;

        let home = self
            .homes
            .get_by_prefix(&prefix)
            .await
            .map_err(|_| Error::HomeNotFound(prefix.clone()))?
            .ok_or_else(|| Error::HomeNotFound(prefix.clone()))?;

        let policy = self.settings.get(home.user_id).await.unwrap_or_default();
        if policy.home_auth_required {
            self.require_valid_token(auth_header, None)?;
        }

        Ok(HomeScope {
            home_id: home.home_id,
            home_id_prefix: prefix,
            user_id: home.user_id,
        })
    }

    /// Resolve and authorize the user-scoped endpoint. Unlike the home
    /// scope, the token's subject must equal `user_id` exactly (§4.8 step 4).
    pub async fn resolve_user(&self, user_id: Uuid, auth_header: Option<&str>) -> Result<UserScope> {
        let policy: ScopeAuthPolicy = self.settings.get(user_id).await.unwrap_or_default();
        if policy.user_scope_auth_required {
            self.require_valid_token(auth_header, Some(user_id))?;
        }
        Ok(UserScope { user_id })
    }

    fn require_valid_token(&self, auth_header: Option<&str>, expected_subject: Option<Uuid>) -> Result<()> {
        let token = extract_bearer(auth_header).map_err(|_| Error::AuthRequired)?;
        let claims = self.tokens.verify(token).map_err(|_| Error::InvalidToken)?;
        if let Some(expected) = expected_subject
            && claims.sub != expected.to_string()
        {
            return Err(Error::SubjectMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use homecast_db::Home;

    struct StubHomes {
        home: Option<Home>,
    }

    #[async_trait]
    impl HomeStore for StubHomes {
        async fn get_by_prefix(&self, _prefix: &str) -> anyhow::Result<Option<Home>> {
            Ok(self.home.clone())
        }
    }

    struct StubSettings {
        policy: ScopeAuthPolicy,
    }

    #[async_trait]
    impl SettingsStore for StubSettings {
        async fn get(&self, _user_id: Uuid) -> anyhow::Result<ScopeAuthPolicy> {
            Ok(self.policy)
        }
    }

    fn router(home: Option<Home>, policy: ScopeAuthPolicy) -> ScopeRouter {
        let config = homecast_config::RelayConfig {
            bind_port: 0,
            database_url: String::new(),
            cors_allow_list: vec![],
            bus_url: String::new(),
            topic_prefix: "x".into(),
            force_bus: false,
            token_secret: secrecy::Secret::new("s3cret".into()),
            token_algorithm: "HS256".into(),
            token_ttl_hours: 1,
            db_startup_policy: homecast_config::DbStartupPolicy::Off,
        };
        ScopeRouter::new(
            Arc::new(StubHomes { home }),
            Arc::new(StubSettings { policy }),
            Arc::new(TokenAuthority::from_config(&config)),
        )
    }

    fn sample_home(user_id: Uuid) -> Home {
        Home {
            home_id: Uuid::new_v4(),
            user_id,
            name: "Main House".into(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_home_prefix_is_not_found() {
        let r = router(None, ScopeAuthPolicy::default());
        let err = r.resolve_home("a7f2b910", None).await.unwrap_err();
        assert!(matches!(err, Error::HomeNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_prefix_rejected_before_lookup() {
        let r = router(None, ScopeAuthPolicy::default());
        let err = r.resolve_home("not-hex!!", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHomeId(_)));
    }

    #[tokio::test]
    async fn no_auth_required_skips_token_check() {
        let user_id = Uuid::new_v4();
        let home = sample_home(user_id);
        let policy = ScopeAuthPolicy {
            home_auth_required: false,
            user_scope_auth_required: true,
        };
        let r = router(Some(home), policy);
        let scope = r.resolve_home("a7f2b910", None).await.unwrap();
        assert_eq!(scope.user_id, user_id);
    }

    #[tokio::test]
    async fn auth_required_but_missing_token_fails() {
        let user_id = Uuid::new_v4();
        let home = sample_home(user_id);
        let r = router(Some(home), ScopeAuthPolicy::default());
        let err = r.resolve_home("a7f2b910", None).await.unwrap_err();
        assert!(matches!(err, Error::AuthRequired));
    }

    #[tokio::test]
    async fn user_scope_requires_matching_subject() {
        let user_id = Uuid::new_v4();
        let r = router(None, ScopeAuthPolicy::default());
        let token = r.tokens.issue(Uuid::new_v4()).unwrap();
        let header = format!("Bearer {token}");
        let err = r.resolve_user(user_id, Some(&header)).await.unwrap_err();
        assert!(matches!(err, Error::SubjectMismatch));
    }

    #[tokio::test]
    async fn user_scope_accepts_matching_subject() {
        let user_id = Uuid::new_v4();
        let r = router(None, ScopeAuthPolicy::default());
        let token = r.tokens.issue(user_id).unwrap();
        let header = format!("Bearer {token}");
        let scope = r.resolve_user(user_id, Some(&header)).await.unwrap();
        assert_eq!(scope.user_id, user_id);
    }
}
