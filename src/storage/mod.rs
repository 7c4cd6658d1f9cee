//! Session jar persistence.
//!
//! The jar is read once at job start and overwritten after every successful
//! fetch. A store location must belong to a single job at a time; nothing
//! here locks across processes.
//!
//! ## Backends
//!
//! - [`FileSessionStore`]: JSON file, atomic replace on write
//! - [`MemorySessionStore`]: process-local, for tests and embedding

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::SessionState;

// Re-export for convenience
pub use local::FileSessionStore;
pub use memory::MemorySessionStore;

/// Durable key-value home of the session jar.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted jar, `None` when nothing was stored yet.
    async fn load(&self) -> Result<Option<SessionState>>;

    /// Replace the persisted jar.
    async fn save(&self, state: &SessionState) -> Result<()>;
}
