//! Credential store and its persistence backends.
//!
//! The store is the only owner of the session credential. It is injected into
//! the pipeline at construction; readers take cheap snapshots, writers replace
//! the whole pair at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use super::types::Credential;
use crate::error::Result;

/// Name of the entry holding the session credential.
pub const DEFAULT_ENTRY: &str = "user";

/// Durable storage for the session credential.
#[async_trait]
pub trait CredentialPersistence: Send + Sync {
    /// Read the persisted credential, if any.
    async fn load(&self) -> Result<Option<Credential>>;

    /// Persist `credential`, or remove the entry when `None`.
    async fn save(&self, credential: Option<&Credential>) -> Result<()>;
}

/// Thread-safe holder of the current credential.
pub struct CredentialStore {
    tx: watch::Sender<Option<Credential>>,
    persistence: Option<Arc<dyn CredentialPersistence>>,
    /// Serializes writers so publish and persist happen in the same order.
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Create a store that lives only in memory.
    pub fn in_memory(initial: Option<Credential>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            persistence: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store hydrated from `persistence`.
    ///
    /// A persisted credential with an empty token is treated as absent, as is
    /// an entry or file the backend cannot decode.
    pub async fn open(persistence: Arc<dyn CredentialPersistence>) -> Result<Self> {
        let initial = match persistence.load().await? {
            Some(credential) if credential.validate().is_ok() => Some(credential),
            Some(_) => {
                warn!("Ignoring persisted credential with an empty token");
                None
            }
            None => None,
        };
        debug!(authenticated = initial.is_some(), "Credential store opened");

        let (tx, _) = watch::channel(initial);
        Ok(Self {
            tx,
            persistence: Some(persistence),
            write_lock: Mutex::new(()),
        })
    }

    /// Snapshot of the current credential.
    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Replace the stored pair.
    ///
    /// The new value is visible to readers before it is persisted; a persistence
    /// error is returned but does not roll the in-memory value back.
    pub async fn replace(&self, credential: Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.tx.send_replace(Some(credential.clone()));
        self.persist(Some(&credential)).await
    }

    /// Replace the stored pair only if it still carries `expected_access`.
    ///
    /// Returns `false` without writing when the session changed in the meantime
    /// (logout, a new login, or another renewal).
    pub async fn replace_if_current(
        &self,
        expected_access: &str,
        credential: Credential,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let matches = self
            .tx
            .borrow()
            .as_ref()
            .is_some_and(|current| current.access_token() == expected_access);
        if !matches {
            return Ok(false);
        }
        self.tx.send_replace(Some(credential.clone()));
        self.persist(Some(&credential)).await?;
        Ok(true)
    }

    /// Forget the credential (logout, account deletion).
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.tx.send_replace(None);
        self.persist(None).await
    }

    /// Receive every change to the stored credential.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }

    async fn persist(&self, credential: Option<&Credential>) -> Result<()> {
        match &self.persistence {
            Some(persistence) => persistence.save(credential).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("authenticated", &self.is_authenticated())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

/// Stores the credential as one named entry of a JSON object file.
///
/// Other entries in the file are left untouched.
#[derive(Debug, Clone)]
pub struct FileCredentialPersistence {
    path: PathBuf,
    entry: String,
}

impl FileCredentialPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entry: DEFAULT_ENTRY.to_string(),
        }
    }

    /// Use a different entry name.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Default::default()),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Default::default());
        }
        match serde_json::from_slice(&raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!(path = %self.path.display(), "Credential file is not a JSON object; starting empty");
                Ok(Default::default())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Credential file is not valid JSON; starting empty");
                Ok(Default::default())
            }
        }
    }
}

#[async_trait]
impl CredentialPersistence for FileCredentialPersistence {
    async fn load(&self) -> Result<Option<Credential>> {
        let mut document = self.read_document().await?;
        match document.remove(&self.entry) {
            Some(value) if !value.is_null() => match serde_json::from_value(value) {
                Ok(credential) => Ok(Some(credential)),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        entry = %self.entry,
                        error = %e,
                        "Ignoring undecodable credential entry"
                    );
                    Ok(None)
                }
            },
            _ => Ok(None),
        }
    }

    async fn save(&self, credential: Option<&Credential>) -> Result<()> {
        let mut document = self.read_document().await?;
        match credential {
            Some(credential) => {
                document.insert(self.entry.clone(), serde_json::to_value(credential)?);
            }
            None => {
                document.remove(&self.entry);
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write to a sibling file first so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&serde_json::Value::Object(document))?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), present = credential.is_some(), "Credential persisted");
        Ok(())
    }
}
