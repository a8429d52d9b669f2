//! Secure token persistence
//!
//! [`SecureStore`] is the platform key-value contract (keychain, keystore,
//! in-memory for tests). [`TokenStore`] layers the four token fields on top of
//! it and keeps an in-memory snapshot that readers can consult without
//! awaiting the backend.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::types::TokenState;

/// Keys under which the token fields are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    AccessToken,
    RefreshToken,
    IssuedAt,
    ExpiresIn,
}

impl StoreKey {
    /// Every key, in persistence order.
    pub const ALL: [StoreKey; 4] =
        [StoreKey::AccessToken, StoreKey::RefreshToken, StoreKey::IssuedAt, StoreKey::ExpiresIn];

    /// Name used by the backing store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::AccessToken => "accessToken",
            StoreKey::RefreshToken => "refreshToken",
            StoreKey::IssuedAt => "sessionIssued",
            StoreKey::ExpiresIn => "sessionExpires",
        }
    }
}

/// Errors raised by a [`SecureStore`] backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("secure store unavailable: {0}")]
    Unavailable(String),

    #[error("stored value for {key} is corrupt: {value:?}")]
    Corrupt { key: &'static str, value: String },
}

/// Platform key-value store for secrets.
///
/// `set` with `None` deletes the key; deleting a missing key is not an error.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: StoreKey, value: Option<&str>) -> Result<(), StoreError>;
}

/// Token state persisted in a [`SecureStore`] and mirrored in memory.
///
/// The snapshot is swapped as one value, so readers never observe a mix of
/// old and new fields. Mutations are serialized so persistence writes from
/// concurrent replacements never interleave.
///
/// Every new session origin (`load`, `replace`, `take`) advances the store's
/// epoch. A refresh commits through [`TokenStore::replace_if`] with the epoch
/// it read, so its result is dropped once the session it belonged to has
/// ended or been replaced.
pub struct TokenStore {
    backend: Arc<dyn SecureStore>,
    snapshot: RwLock<Current>,
    write_lock: Mutex<()>,
    access_tx: watch::Sender<Option<String>>,
}

#[derive(Default)]
struct Current {
    state: TokenState,
    epoch: u64,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.snapshot.read();
        f.debug_struct("TokenStore")
            .field("has_session", &current.state.has_session())
            .field("epoch", &current.epoch)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn SecureStore>) -> Self {
        let (access_tx, _) = watch::channel(None);
        Self {
            backend,
            snapshot: RwLock::new(Current::default()),
            write_lock: Mutex::new(()),
            access_tx,
        }
    }

    /// Copy of the current in-memory state.
    #[must_use]
    pub fn snapshot(&self) -> TokenState {
        self.snapshot.read().state.clone()
    }

    /// Current state together with the epoch it belongs to, read atomically.
    #[must_use]
    pub fn snapshot_with_epoch(&self) -> (TokenState, u64) {
        let current = self.snapshot.read();
        (current.state.clone(), current.epoch)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.snapshot.read().epoch
    }

    /// Receiver that observes every access token change.
    #[must_use]
    pub fn subscribe_access_token(&self) -> watch::Receiver<Option<String>> {
        self.access_tx.subscribe()
    }

    /// Read the persisted fields into memory.
    ///
    /// An access token stored without provenance is loaded as already
    /// expired so the first request refreshes it.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend fails or an integer field does
    /// not parse.
    pub async fn load(&self) -> Result<TokenState, StoreError> {
        let _guard = self.write_lock.lock().await;

        let access_token = self.backend.get(StoreKey::AccessToken).await?;
        let refresh_token = self.backend.get(StoreKey::RefreshToken).await?;
        let issued_at = self.read_seconds(StoreKey::IssuedAt).await?;
        let expires_in = self.read_seconds(StoreKey::ExpiresIn).await?;

        let mut state = TokenState { access_token, refresh_token, issued_at, expires_in };
        if state.access_token.is_some() && !state.has_provenance() {
            warn!("stored access token has no issue time or lifetime; treating it as expired");
            state.issued_at = Some(0);
            state.expires_in = Some(0);
        }

        debug!(has_session = state.has_session(), "loaded token state from secure store");
        self.publish(state.clone());
        Ok(state)
    }

    /// Persist all four fields, then swap the snapshot and broadcast.
    ///
    /// On a backend failure the in-memory snapshot is left unchanged.
    ///
    /// # Errors
    /// Returns the first [`StoreError`] raised by the backend.
    pub async fn replace(&self, state: TokenState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.persist(&state).await?;
        self.publish(state);
        Ok(())
    }

    /// Persist and publish `state` only if the store is still at `epoch`.
    ///
    /// Returns `Ok(false)` without writing when the epoch moved before the
    /// write started. If it moves while the backend is written, the snapshot
    /// is left alone; the purge that accompanies a sign-out is serialized
    /// behind this call and removes the persisted copy.
    ///
    /// # Errors
    /// Returns the first [`StoreError`] raised by the backend.
    pub async fn replace_if(&self, epoch: u64, state: TokenState) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.epoch() != epoch {
            debug!(epoch, "session changed before commit; dropping token update");
            return Ok(false);
        }
        self.persist(&state).await?;

        let access_token = state.access_token.clone();
        {
            let mut current = self.snapshot.write();
            if current.epoch != epoch {
                debug!(epoch, "session changed during commit; dropping token update");
                return Ok(false);
            }
            current.state = state;
        }
        self.access_tx.send_replace(access_token);
        Ok(true)
    }

    /// Clear the in-memory snapshot immediately and return what it held.
    ///
    /// Call [`TokenStore::purge`] to delete the persisted copy.
    pub fn take(&self) -> TokenState {
        let previous = {
            let mut current = self.snapshot.write();
            current.epoch = current.epoch.wrapping_add(1);
            std::mem::take(&mut current.state)
        };
        self.access_tx.send_replace(None);
        previous
    }

    /// Delete all four persisted fields.
    ///
    /// # Errors
    /// Returns the first [`StoreError`] raised by the backend.
    pub async fn purge(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        for key in StoreKey::ALL {
            self.backend.set(key, None).await?;
        }
        Ok(())
    }

    /// [`TokenStore::take`] followed by [`TokenStore::purge`].
    ///
    /// # Errors
    /// Returns the first [`StoreError`] raised by the backend; memory is
    /// cleared regardless.
    pub async fn clear(&self) -> Result<TokenState, StoreError> {
        let previous = self.take();
        self.purge().await?;
        Ok(previous)
    }

    async fn persist(&self, state: &TokenState) -> Result<(), StoreError> {
        let issued_at = state.issued_at.map(|value| value.to_string());
        let expires_in = state.expires_in.map(|value| value.to_string());

        self.backend.set(StoreKey::AccessToken, state.access_token.as_deref()).await?;
        self.backend.set(StoreKey::RefreshToken, state.refresh_token.as_deref()).await?;
        self.backend.set(StoreKey::IssuedAt, issued_at.as_deref()).await?;
        self.backend.set(StoreKey::ExpiresIn, expires_in.as_deref()).await?;
        Ok(())
    }

    async fn read_seconds(&self, key: StoreKey) -> Result<Option<i64>, StoreError> {
        match self.backend.get(key).await? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| StoreError::Corrupt { key: key.as_str(), value: raw }),
        }
    }

    fn publish(&self, state: TokenState) {
        let access_token = state.access_token.clone();
        {
            let mut current = self.snapshot.write();
            current.epoch = current.epoch.wrapping_add(1);
            current.state = state;
        }
        self.access_tx.send_replace(access_token);
    }
}
