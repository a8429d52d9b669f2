//! Token persistence in the system keyring
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keyline_common::auth::{SecureStore, StoreError, StoreKey};
use keyring::Entry;
use tracing::debug;

/// Keyring service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "com.keyline.app";

/// [`SecureStore`] backed by the platform keychain via `keyring`.
///
/// One keyring entry per [`StoreKey`], created up front and reused so every
/// read and write for a key goes through the same credential.
pub struct KeyringSecureStore {
    service: String,
    entries: HashMap<StoreKey, Arc<Entry>>,
}

impl std::fmt::Debug for KeyringSecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringSecureStore").field("service", &self.service).finish_non_exhaustive()
    }
}

impl KeyringSecureStore {
    /// Open the keyring entries for `service`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the platform keyring rejects
    /// the entry names.
    pub fn new(service: impl Into<String>) -> Result<Self, StoreError> {
        let service = service.into();
        let mut entries = HashMap::with_capacity(StoreKey::ALL.len());
        for key in StoreKey::ALL {
            let entry = Entry::new(&service, key.as_str())
                .map_err(|e| StoreError::Unavailable(format!("Failed to access keyring: {e}")))?;
            entries.insert(key, Arc::new(entry));
        }
        Ok(Self { service, entries })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: StoreKey) -> Result<Arc<Entry>, StoreError> {
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("no keyring entry for {}", key.as_str())))
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let entry = self.entry(key)?;
        run_blocking(move || match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("Failed to read {}: {e}", key.as_str()))),
        })
        .await
    }

    async fn set(&self, key: StoreKey, value: Option<&str>) -> Result<(), StoreError> {
        let entry = self.entry(key)?;
        let value = value.map(str::to_owned);
        run_blocking(move || match value {
            Some(value) => entry
                .set_password(&value)
                .map_err(|e| StoreError::Unavailable(format!("Failed to store {}: {e}", key.as_str()))),
            None => match entry.delete_credential() {
                Ok(()) => Ok(()),
                Err(keyring::Error::NoEntry) => {
                    debug!(key = key.as_str(), "nothing to delete in keyring");
                    Ok(())
                }
                Err(e) => {
                    Err(StoreError::Unavailable(format!("Failed to delete {}: {e}", key.as_str())))
                }
            },
        })
        .await
    }
}

/// Keychain calls block on platform IPC; keep them off the async workers.
async fn run_blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable(format!("keyring task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_store() -> KeyringSecureStore {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        KeyringSecureStore::new("com.keyline.test").expect("keyring store")
    }

    #[tokio::test]
    async fn missing_entry_reads_as_none() {
        let store = mock_store();
        assert_eq!(store.get(StoreKey::RefreshToken).await.expect("get"), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips_per_key() {
        let store = mock_store();
        store.set(StoreKey::AccessToken, Some("access")).await.expect("set");
        store.set(StoreKey::ExpiresIn, Some("3600")).await.expect("set");

        assert_eq!(store.get(StoreKey::AccessToken).await.expect("get").as_deref(), Some("access"));
        assert_eq!(store.get(StoreKey::ExpiresIn).await.expect("get").as_deref(), Some("3600"));
        assert_eq!(store.get(StoreKey::IssuedAt).await.expect("get"), None);
    }

    #[tokio::test]
    async fn deleting_is_idempotent() {
        let store = mock_store();
        store.set(StoreKey::AccessToken, Some("access")).await.expect("set");

        store.set(StoreKey::AccessToken, None).await.expect("delete");
        store.set(StoreKey::AccessToken, None).await.expect("delete again");

        assert_eq!(store.get(StoreKey::AccessToken).await.expect("get"), None);
    }
}
