use tokio::sync::watch;

/// Source of the bearer credential. Storage of the credential is owned elsewhere.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    fn has_token(&self) -> bool {
        self.token().is_some()
    }
}

/// In-memory credential holder; subscribers are told when it changes.
#[derive(Debug)]
pub struct TokenStore {
    tx: watch::Sender<Option<String>>,
}

impl TokenStore {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial.filter(|t| !t.is_empty()));
        Self { tx }
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        self.tx.send_replace((!token.is_empty()).then_some(token));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialProvider for TokenStore {
    fn token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}
