//! In-memory server-side sessions and short-lived OIDC login state.
//!
//! A [`SessionStore`] is built once at startup and shared through
//! `AppState`. Both maps sit behind one reader/writer lock; lookups take the
//! read side, every mutation (including the consume-on-read of a login state)
//! takes the write side.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::random_urlsafe;
use crate::error::{Error, Result};

pub const SESSION_TTL: TimeDelta = TimeDelta::hours(24);
pub const STATE_TTL: TimeDelta = TimeDelta::minutes(10);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

const ID_BYTES: usize = 32;

/// Tokens returned by the identity provider at login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub provider_token: ProviderToken,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
struct PendingLogin {
    pkce_verifier: String,
    created_at: DateTime<Utc>,
}

impl PendingLogin {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= STATE_TTL
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    states: HashMap<String, PendingLogin>,
}

#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<Inner>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_session(&self, user_id: i64, provider_token: ProviderToken) -> String {
        self.create_session_at(user_id, provider_token, Utc::now())
    }

    pub fn create_session_at(
        &self,
        user_id: i64,
        provider_token: ProviderToken,
        now: DateTime<Utc>,
    ) -> String {
        let id = random_urlsafe(ID_BYTES);
        let session = Session {
            id: id.clone(),
            user_id,
            provider_token,
            created_at: now,
            expires_at: now + SESSION_TTL,
        };
        self.write().sessions.insert(id.clone(), session);
        id
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.get_session_at(id, Utc::now())
    }

    pub fn get_session_at(&self, id: &str, now: DateTime<Utc>) -> Result<Session> {
        let inner = self.read();
        let session = inner.sessions.get(id).ok_or(Error::NotFound)?;
        if session.is_expired_at(now) {
            return Err(Error::Expired);
        }
        Ok(session.clone())
    }

    pub fn delete_session(&self, id: &str) {
        self.write().sessions.remove(id);
    }

    pub fn store_state(&self, state: &str, pkce_verifier: &str) {
        self.store_state_at(state, pkce_verifier, Utc::now());
    }

    pub fn store_state_at(&self, state: &str, pkce_verifier: &str, now: DateTime<Utc>) {
        self.write().states.insert(
            state.to_string(),
            PendingLogin {
                pkce_verifier: pkce_verifier.to_string(),
                created_at: now,
            },
        );
    }

    /// Consumes a login state and returns its PKCE verifier. A state can be
    /// taken at most once, whether or not it has expired.
    pub fn take_state(&self, state: &str) -> Result<String> {
        self.take_state_at(state, Utc::now())
    }

    pub fn take_state_at(&self, state: &str, now: DateTime<Utc>) -> Result<String> {
        let pending = self.write().states.remove(state).ok_or(Error::NotFound)?;
        if pending.is_expired_at(now) {
            return Err(Error::Expired);
        }
        Ok(pending.pkce_verifier)
    }

    /// Drops expired sessions and stale login states. Returns how many
    /// entries were removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.write();
        let before = inner.sessions.len() + inner.states.len();
        inner.sessions.retain(|_, s| !s.is_expired_at(now));
        inner.states.retain(|_, s| !s.is_expired_at(now));
        before - (inner.sessions.len() + inner.states.len())
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Runs [`SessionStore::sweep_at`] every `interval` until the runtime
    /// shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.sweep_at(Utc::now());
                if removed > 0 {
                    tracing::debug!(removed, "swept expired sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> ProviderToken {
        ProviderToken {
            access_token: "access".to_string(),
            token_type: "Bearer".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_session_lifetime() {
        let store = SessionStore::new();
        let now = Utc::now();
        let id = store.create_session_at(7, token(), now);

        let session = store.get_session_at(&id, now + TimeDelta::hours(23)).unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(session.provider_token.access_token, "access");

        let expired = store.get_session_at(&id, now + TimeDelta::hours(24));
        assert!(matches!(expired, Err(Error::Expired)));
    }

    #[test]
    fn test_session_ids_are_random_and_urlsafe() {
        let store = SessionStore::new();
        let a = store.create_session(1, token());
        let b = store.create_session(1, token());
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_delete_session_is_idempotent() {
        let store = SessionStore::new();
        let id = store.create_session(1, token());
        store.delete_session(&id);
        store.delete_session(&id);
        assert!(matches!(store.get_session(&id), Err(Error::NotFound)));
    }

    #[test]
    fn test_state_is_single_use() {
        let store = SessionStore::new();
        store.store_state("s1", "verifier");
        assert_eq!(store.take_state("s1").unwrap(), "verifier");
        assert!(matches!(store.take_state("s1"), Err(Error::NotFound)));
    }

    #[test]
    fn test_state_expires_after_ten_minutes() {
        let store = SessionStore::new();
        let now = Utc::now();
        store.store_state_at("s1", "v1", now);
        store.store_state_at("s2", "v2", now);

        assert!(store.take_state_at("s1", now + TimeDelta::minutes(9)).is_ok());
        assert!(matches!(
            store.take_state_at("s2", now + TimeDelta::minutes(10)),
            Err(Error::Expired)
        ));
        // an expired state is gone too
        assert!(matches!(store.take_state("s2"), Err(Error::NotFound)));
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let store = SessionStore::new();
        let now = Utc::now();
        let old = store.create_session_at(1, token(), now - TimeDelta::hours(25));
        let fresh = store.create_session_at(2, token(), now);
        store.store_state_at("old", "v", now - TimeDelta::minutes(11));
        store.store_state_at("new", "v", now);

        assert_eq!(store.sweep_at(now), 2);
        assert!(matches!(store.get_session_at(&old, now), Err(Error::NotFound)));
        assert!(store.get_session_at(&fresh, now).is_ok());
        assert!(store.take_state_at("new", now).is_ok());
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_concurrent_state_consumption_succeeds_once() {
        let store = Arc::new(SessionStore::new());
        store.store_state("race", "verifier");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.take_state("race").is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_periodically() {
        let store = Arc::new(SessionStore::new());
        store.create_session_at(1, token(), Utc::now() - TimeDelta::hours(48));

        let handle = store.clone().spawn_sweeper(SWEEP_INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.session_count(), 0);
        handle.abort();
    }
}
