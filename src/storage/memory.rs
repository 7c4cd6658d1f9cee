//! In-process session store.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::SessionState;
use crate::storage::SessionStore;

/// Session store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    state: Mutex<Option<SessionState>>,
    saves: Mutex<usize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted jar.
    pub fn with_state(state: SessionState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    /// Currently stored jar.
    pub fn snapshot(&self) -> Option<SessionState> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<SessionState>> {
        let state = self.state.lock().map_err(AppError::store)?;
        Ok(state.clone())
    }

    async fn save(&self, state: &SessionState) -> Result<()> {
        *self.state.lock().map_err(AppError::store)? = Some(state.clone());
        *self.saves.lock().map_err(AppError::store)? += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_counts_saves() {
        let store = MemorySessionStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(&SessionState::default()).await.unwrap();
        store.save(&SessionState::default()).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().await.unwrap(), Some(SessionState::default()));
    }
}
