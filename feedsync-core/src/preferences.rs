use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::FeedApi;
use crate::coordinator::RequestCoordinator;
use crate::error::SyncError;
use crate::models::Preferences;

/// Singleton cache of the user's preferences.
///
/// Changes are published on a watch channel; the auto-refresh scheduler follows it.
#[derive(Clone)]
pub struct PreferencesStore {
    api: Arc<dyn FeedApi>,
    tx: Arc<watch::Sender<Preferences>>,
    initialized: Arc<watch::Sender<bool>>,
    requests: Arc<RequestCoordinator<(), Preferences>>,
}

impl PreferencesStore {
    pub fn new(api: Arc<dyn FeedApi>) -> Self {
        let (tx, _rx) = watch::channel(Preferences::default());
        let (initialized, _rx) = watch::channel(false);
        Self {
            api,
            tx: Arc::new(tx),
            initialized: Arc::new(initialized),
            requests: Arc::new(RequestCoordinator::new()),
        }
    }

    /// Loads the preferences once; later calls are answered locally unless forced.
    pub async fn fetch(&self, force: bool) -> Result<Preferences, SyncError> {
        if !force && *self.initialized.borrow() {
            return Ok(self.current());
        }

        let api = Arc::clone(&self.api);
        let tx = Arc::clone(&self.tx);
        let initialized = Arc::clone(&self.initialized);
        self.requests
            .coalesce((), move || async move {
                let prefs = api.get_preferences().await.map_err(|e| {
                    warn!(error = %e, "failed to fetch preferences");
                    SyncError::from(e)
                })?;
                publish(&tx, prefs.clone());
                initialized.send_replace(true);
                Ok(prefs)
            })
            .await
    }

    /// Stores `prefs` on the server and adopts the server's answer.
    pub async fn save(&self, prefs: &Preferences) -> Result<Preferences, SyncError> {
        let saved = self.api.put_preferences(prefs).await?;
        publish(&self.tx, saved.clone());
        self.initialized.send_replace(true);
        Ok(saved)
    }

    /// Forgets the loaded preferences; the next [`fetch`](Self::fetch) reaches the server.
    pub fn reset(&self) {
        publish(&self.tx, Preferences::default());
        self.initialized.send_replace(false);
    }

    pub fn current(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }
}

// Subscribers are only woken when a value actually changed.
fn publish(tx: &watch::Sender<Preferences>, prefs: Preferences) {
    let changed = tx.send_if_modified(|current| {
        if *current == prefs {
            false
        } else {
            *current = prefs;
            true
        }
    });
    debug!(changed, "preferences updated");
}
