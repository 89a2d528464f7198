//! Session lifecycle: parse, mirror, verify, destroy.
//!
//! The manager owns the single in-memory session, mirrors its tokens into
//! the key-value store for tamper detection, and wipes the response cache
//! on every session boundary — a new session must never see a prior
//! user's cache. Sessions are replaced wholesale, never patched.

use std::sync::{Arc, Mutex};

use compass_core::{mirror, Clock, CompassResult, ParsedToken, Session, SessionPolicy};
use compass_store::{CacheStore, KeyValueStore};

/// Manages the current session and its tamper-detection mirror.
pub struct SessionManager {
    kv: Arc<dyn KeyValueStore>,
    cache: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    session: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        cache: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            kv,
            cache,
            clock,
            policy,
            session: Mutex::new(None),
        }
    }

    /// Establish a session from freshly issued tokens.
    ///
    /// On success the previous session (if any) is replaced, the cache is
    /// cleared, and both tokens are mirrored for later integrity checks.
    /// On rejection any existing session is torn down as well — a failed
    /// login never leaves a half-valid state behind.
    ///
    /// # Errors
    /// The precise [`AuthError`] explaining the rejection; callers can
    /// distinguish malformed tokens from expiry from unknown providers.
    pub async fn initialize(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> CompassResult<Session> {
        let now_ms = self.clock.now_ms();
        let parsed = match ParsedToken::parse(access_token, &self.policy, now_ms) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "session initialization rejected");
                self.destroy().await?;
                return Err(err.into());
            }
        };

        let session = Session::from_token(&parsed, access_token, refresh_token, &self.policy);

        // A new session must never observe the previous user's cache.
        self.cache.clear();

        self.kv
            .set(mirror::ACCESS_TOKEN_KEY, &session.access_token)
            .await?;
        self.kv
            .set(mirror::REFRESH_TOKEN_KEY, &session.refresh_token)
            .await?;

        self.store_session(Some(session.clone()));
        tracing::info!(
            user_id = %session.user_id,
            username = %session.username,
            provider = %parsed.provider,
            "session established"
        );

        Ok(session)
    }

    /// Compare the in-memory tokens against the persisted mirror.
    ///
    /// Any divergence is treated as tampering: the session, mirror, and
    /// cache are all cleared and `false` is returned. Returns `false`
    /// (without side effects) when no session is active.
    pub async fn validate_integrity(&self) -> CompassResult<bool> {
        let Some(session) = self.peek_session() else {
            return Ok(false);
        };

        let mirrored_access = self.kv.get(mirror::ACCESS_TOKEN_KEY).await?;
        let mirrored_refresh = self.kv.get(mirror::REFRESH_TOKEN_KEY).await?;

        let intact = mirrored_access.as_deref() == Some(session.access_token.as_str())
            && mirrored_refresh.as_deref() == Some(session.refresh_token.as_str());

        if !intact {
            tracing::error!(
                security = true,
                user_id = %session.user_id,
                "session token mirror mismatch, clearing session"
            );
            self.destroy().await?;
            return Ok(false);
        }

        Ok(true)
    }

    /// The current session, or None (clearing all state) once expired.
    pub async fn current_session(&self) -> Option<Session> {
        let session = self.peek_session()?;
        if session.is_expired(self.clock.now_ms()) {
            tracing::info!(user_id = %session.user_id, "session expired");
            // Mirror cleanup is best-effort; an unreadable store must not
            // resurrect an expired session.
            if let Err(err) = self.destroy().await {
                tracing::warn!(error = %err, "failed to clear expired session mirror");
            }
            return None;
        }
        Some(session)
    }

    /// Explicit logout: destroy session, mirror, and cache.
    pub async fn logout(&self) -> CompassResult<()> {
        if let Some(session) = self.peek_session() {
            tracing::info!(user_id = %session.user_id, "session logged out");
        }
        self.destroy().await
    }

    /// Whether a session is currently held (without expiry side effects).
    pub fn has_session(&self) -> bool {
        self.peek_session().is_some()
    }

    async fn destroy(&self) -> CompassResult<()> {
        self.store_session(None);
        self.cache.clear();
        self.kv.remove(mirror::ACCESS_TOKEN_KEY).await?;
        self.kv.remove(mirror::REFRESH_TOKEN_KEY).await?;
        Ok(())
    }

    fn peek_session(&self) -> Option<Session> {
        match self.session.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    fn store_session(&self, session: Option<Session>) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = session;
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("has_session", &self.has_session())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::{AuthError, CachePolicy, EpochMs, ManualClock};
    use compass_store::{InMemoryKeyValueStore, ScopedCacheKey};
    use serde_json::json;
    use std::time::Duration;

    const NOW_MS: EpochMs = 1_700_000_000_000;

    fn make_token(user_id: &str, issued_at_ms: EpochMs) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        format!(
            "github_{}_{}_{}",
            user_id,
            issued_at_ms,
            STANDARD.encode(br#"{"username":"octocat"}"#)
        )
    }

    struct Fixture {
        manager: SessionManager,
        kv: Arc<InMemoryKeyValueStore>,
        cache: Arc<CacheStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::shared(NOW_MS);
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let cache = Arc::new(CacheStore::new(clock.clone(), CachePolicy::default()));
        let manager = SessionManager::new(
            kv.clone(),
            cache.clone(),
            clock.clone(),
            SessionPolicy::default(),
        );
        Fixture {
            manager,
            kv,
            cache,
            clock,
        }
    }

    #[tokio::test]
    async fn test_initialize_builds_session_and_mirror() {
        let f = fixture();
        let token = make_token("111", NOW_MS - 1000);

        let session = f.manager.initialize(&token, "refresh-1").await.unwrap();
        assert_eq!(session.user_id, "111");
        assert_eq!(session.username, "octocat");

        assert_eq!(
            f.kv.get(mirror::ACCESS_TOKEN_KEY).await.unwrap(),
            Some(token)
        );
        assert_eq!(
            f.kv.get(mirror::REFRESH_TOKEN_KEY).await.unwrap(),
            Some("refresh-1".to_string())
        );
        assert!(f.manager.has_session());
    }

    #[tokio::test]
    async fn test_initialize_clears_previous_cache() {
        let f = fixture();
        let key = ScopedCacheKey::for_user("github.profile", &json!({}), "999");
        f.cache
            .set(key.clone(), json!({"id": 999}), Duration::from_secs(600), None);

        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();

        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_rejects_malformed_and_clears_state() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();

        let err = f.manager.initialize("not-a-token", "refresh").await;
        assert!(matches!(
            err,
            Err(compass_core::CompassError::Auth(
                AuthError::MalformedToken { .. }
            ))
        ));
        assert!(!f.manager.has_session());
        assert_eq!(f.kv.get(mirror::ACCESS_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_integrity_holds_when_mirror_matches() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();
        assert!(f.manager.validate_integrity().await.unwrap());
        assert!(f.manager.has_session());
    }

    #[tokio::test]
    async fn test_tamper_detection_clears_session() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();

        // Simulate another tab/process overwriting the persisted copy.
        f.kv.set(mirror::ACCESS_TOKEN_KEY, "tampered-value")
            .await
            .unwrap();

        assert!(!f.manager.validate_integrity().await.unwrap());
        assert!(!f.manager.has_session());
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_missing_mirror_counts_as_tampering() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();
        f.kv.remove(mirror::REFRESH_TOKEN_KEY).await.unwrap();

        assert!(!f.manager.validate_integrity().await.unwrap());
        assert!(!f.manager.has_session());
    }

    #[tokio::test]
    async fn test_integrity_without_session_is_false() {
        let f = fixture();
        assert!(!f.manager.validate_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_session_clears_on_read() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();

        assert!(f.manager.current_session().await.is_some());

        // Jump past the token lifetime.
        f.clock.advance_ms(25 * 60 * 60 * 1000);
        assert!(f.manager.current_session().await.is_none());
        assert!(!f.manager.has_session());
        assert_eq!(f.kv.get(mirror::ACCESS_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh")
            .await
            .unwrap();

        f.manager.logout().await.unwrap();
        assert!(!f.manager.has_session());
        assert!(f.cache.is_empty());
        assert_eq!(f.kv.get(mirror::ACCESS_TOKEN_KEY).await.unwrap(), None);
        assert_eq!(f.kv.get(mirror::REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_session_switch_replaces_wholesale() {
        let f = fixture();
        f.manager
            .initialize(&make_token("111", NOW_MS), "refresh-1")
            .await
            .unwrap();
        let second = f
            .manager
            .initialize(&make_token("222", NOW_MS), "refresh-2")
            .await
            .unwrap();

        assert_eq!(second.user_id, "222");
        let current = f.manager.current_session().await.unwrap();
        assert_eq!(current.user_id, "222");
        assert_eq!(current.refresh_token, "refresh-2");
    }
}
