//! Credential rotation sync against a shared key-value store.
//!
//! Best-effort side channel: after each job the current credential blob is
//! mirrored to a remote store if it changed since the last sync. Remote
//! failures are logged and swallowed; they never affect job outcome. With
//! no store configured the component is inert.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::CredentialError;

/// Key under which the credential snapshot lives in the remote store.
const CREDENTIAL_KEY: &str = "agent-dispatch:credentials";

/// Remote key-value store boundary.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. Absent and unavailable both come back as `None` at the
    /// call sites in this module; only transport errors are `Err`.
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;
}

/// Upstash-style REST key-value store.
pub struct RestKvStore {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl RestKvStore {
    pub fn new(base_url: String, token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[derive(Deserialize)]
struct RestResult {
    result: Option<String>,
}

#[async_trait]
impl KvStore for RestKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let resp = self
            .http
            .get(format!("{}/get/{key}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CredentialError::Rejected {
                op: "get".into(),
                key: key.into(),
            });
        }
        let body: RestResult = resp
            .json()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;
        Ok(body.result)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let resp = self
            .http
            .post(format!("{}/set/{key}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CredentialError::Rejected {
                op: "set".into(),
                key: key.into(),
            });
        }
        Ok(())
    }
}

struct CredentialState {
    /// Current credential blob; rotated by the auth subsystem.
    current: String,
    /// Blob as of the last successful push, `None` before the first one.
    last_synced: Option<String>,
}

/// Mirrors rotated credentials to the remote store.
pub struct CredentialSync {
    store: Option<Arc<dyn KvStore>>,
    state: Mutex<CredentialState>,
}

impl CredentialSync {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            store,
            state: Mutex::new(CredentialState {
                current: String::new(),
                last_synced: None,
            }),
        }
    }

    /// Adopt the remote snapshot if one exists, otherwise seed from the
    /// statically supplied token. Remote failures degrade to the seed.
    pub async fn load_or_seed(&self, seed: &str) {
        let remote = match &self.store {
            Some(store) => match store.get(CREDENTIAL_KEY).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "Credential snapshot fetch failed, seeding locally");
                    None
                }
            },
            None => None,
        };

        let mut state = self.state.lock().await;
        match remote {
            Some(snapshot) => {
                tracing::info!("Adopted remote credential snapshot");
                state.last_synced = Some(snapshot.clone());
                state.current = snapshot;
            }
            None => {
                state.current = seed.to_string();
                state.last_synced = None;
            }
        }
    }

    /// Replace the current credential blob (called by the auth subsystem
    /// when a token rotates).
    pub async fn rotate(&self, blob: String) {
        self.state.lock().await.current = blob;
    }

    /// Push the current blob to the remote store if it changed since the
    /// last sync. Called after every job; never raises.
    pub async fn sync_if_changed(&self) {
        let Some(store) = &self.store else { return };

        let pending = {
            let state = self.state.lock().await;
            if state.last_synced.as_deref() == Some(state.current.as_str()) {
                return;
            }
            state.current.clone()
        };

        match store.set(CREDENTIAL_KEY, &pending).await {
            Ok(()) => {
                self.state.lock().await.last_synced = Some(pending);
                tracing::info!("Synced rotated credentials to remote store");
            }
            Err(e) => {
                // Marker stays stale so the next job retries the push.
                tracing::warn!(error = %e, "Credential sync failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryKv {
        values: std::sync::Mutex<HashMap<String, String>>,
        fail: AtomicBool,
        sets: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for MemoryKv {
        async fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CredentialError::Http("down".into()));
            }
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CredentialError::Http("down".into()));
            }
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn adopts_remote_snapshot_when_present() {
        let kv = Arc::new(MemoryKv::default());
        kv.values
            .lock()
            .unwrap()
            .insert(CREDENTIAL_KEY.to_string(), "remote-blob".to_string());

        let sync = CredentialSync::new(Some(kv.clone()));
        sync.load_or_seed("seed-token").await;

        // Already in sync with remote: nothing to push.
        sync.sync_if_changed().await;
        assert_eq!(kv.sets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn seeds_locally_and_pushes_once() {
        let kv = Arc::new(MemoryKv::default());
        let sync = CredentialSync::new(Some(kv.clone()));
        sync.load_or_seed("seed-token").await;

        sync.sync_if_changed().await;
        assert_eq!(
            kv.values.lock().unwrap().get(CREDENTIAL_KEY).map(String::as_str),
            Some("seed-token")
        );

        // Unchanged: second call is a no-op.
        sync.sync_if_changed().await;
        assert_eq!(kv.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pushes_rotated_credentials() {
        let kv = Arc::new(MemoryKv::default());
        let sync = CredentialSync::new(Some(kv.clone()));
        sync.load_or_seed("seed-token").await;
        sync.sync_if_changed().await;

        sync.rotate("rotated-blob".to_string()).await;
        sync.sync_if_changed().await;
        assert_eq!(
            kv.values.lock().unwrap().get(CREDENTIAL_KEY).map(String::as_str),
            Some("rotated-blob")
        );
    }

    #[tokio::test]
    async fn retries_push_after_remote_failure() {
        let kv = Arc::new(MemoryKv::default());
        kv.fail.store(true, Ordering::SeqCst);

        let sync = CredentialSync::new(Some(kv.clone()));
        sync.load_or_seed("seed-token").await;
        sync.sync_if_changed().await;
        assert!(kv.values.lock().unwrap().is_empty());

        kv.fail.store(false, Ordering::SeqCst);
        sync.sync_if_changed().await;
        assert_eq!(
            kv.values.lock().unwrap().get(CREDENTIAL_KEY).map(String::as_str),
            Some("seed-token")
        );
    }

    #[tokio::test]
    async fn inert_without_a_store() {
        let sync = CredentialSync::new(None);
        sync.load_or_seed("seed-token").await;
        sync.sync_if_changed().await;
    }
}
