use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::action_log::LogEntry;
use super::recorder::SessionReport;
use crate::domain::UserSettings;

/// State that survives a restart. The overload ledger and manual override
/// are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub settings: Option<UserSettings>,
    #[serde(default)]
    pub action_log: Vec<LogEntry>,
    #[serde(default)]
    pub last_session: Option<SessionReport>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedState>>;
    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON file store. Writes go to a temporary file that is then renamed over
/// the target so a crash never leaves a truncated file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Handle to the background saver. Cloning is cheap.
#[derive(Clone)]
pub struct SaveHandle {
    tx: Arc<watch::Sender<Option<PersistedState>>>,
}

impl SaveHandle {
    /// Queue a snapshot. Only the latest snapshot inside a debounce window is written.
    pub fn request(&self, state: PersistedState) {
        self.tx.send_replace(Some(state));
    }
}

/// Spawn the debounced saver task. It exits when every handle is dropped.
pub fn spawn_saver(store: Arc<dyn SettingsStore>, debounce: Duration) -> SaveHandle {
    let (tx, mut rx) = watch::channel::<Option<PersistedState>>(None);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            tokio::time::sleep(debounce).await;
            let snapshot = rx.borrow_and_update().clone();
            let Some(snapshot) = snapshot else {
                continue;
            };
            match store.save(&snapshot).await {
                Ok(()) => debug!(entries = snapshot.action_log.len(), "state persisted"),
                Err(e) => warn!(error = %e, "failed to persist state"),
            }
        }
        debug!("saver stopped");
    });
    SaveHandle { tx: Arc::new(tx) }
}
