use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const KEY_ACCESS_TOKEN: &str = "accessToken";
pub const KEY_REFRESH_TOKEN: &str = "refreshToken";

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret storage is unavailable")]
    Unavailable,
    #[error("failed to write secret `{key}`")]
    Write { key: String },
}

/// Opaque async key-value store for credentials.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Never fails: I/O errors read as absent.
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError>;
    /// Best-effort.
    async fn delete(&self, key: &str);
}

fn normalize(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// OS keychain / secret service, one entry per key under a shared service name.
#[derive(Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(&self.service, key)
    }

    pub fn is_available(&self) -> bool {
        let Ok(entry) = self.entry(KEY_ACCESS_TOKEN) else {
            return false;
        };

        match entry.get_password() {
            Ok(_) => true,
            Err(keyring::Error::NoEntry) => true,
            Err(keyring::Error::BadEncoding(_)) => true,
            Err(keyring::Error::Ambiguous(_)) => true,
            Err(keyring::Error::NoStorageAccess(_)) => false,
            Err(keyring::Error::PlatformFailure(_)) => false,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> Option<String> {
        let entry = match self.entry(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "keyring entry unavailable");
                return None;
            }
        };

        match entry.get_password() {
            Ok(pwd) => normalize(pwd),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring read failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        let entry = self.entry(key).map_err(|_| SecretStoreError::Unavailable)?;
        entry.set_password(value).map_err(|_| SecretStoreError::Write {
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) {
        if let Ok(entry) = self.entry(key) {
            if let Err(e) = entry.delete_credential() {
                debug!(key, error = %e, "keyring delete skipped");
            }
        };
    }
}

/// Process-memory store; used when no keychain is reachable and in tests.
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.lock().await.get(key).cloned().and_then(normalize)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) {
        self.values.lock().await.remove(key);
    }
}

/// The access/refresh token pair as kept in a [`SecretStore`].
#[derive(Clone)]
pub struct TokenStorage {
    store: Arc<dyn SecretStore>,
}

impl TokenStorage {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub async fn get_access_token(&self) -> Option<String> {
        self.store.get(KEY_ACCESS_TOKEN).await
    }

    pub async fn get_refresh_token(&self) -> Option<String> {
        self.store.get(KEY_REFRESH_TOKEN).await
    }

    /// Writes both tokens; `false` if either write failed.
    pub async fn save(&self, access_token: &str, refresh_token: &str) -> bool {
        let (access, refresh) = tokio::join!(
            self.store.set(KEY_ACCESS_TOKEN, access_token),
            self.store.set(KEY_REFRESH_TOKEN, refresh_token),
        );
        match (access, refresh) {
            (Ok(()), Ok(())) => true,
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to persist token pair");
                false
            }
        }
    }

    pub async fn clear(&self) {
        self.store.delete(KEY_ACCESS_TOKEN).await;
        self.store.delete(KEY_REFRESH_TOKEN).await;
    }
}
