//! Leader election between contexts sharing one device.
//!
//! Only the holder of the device lock opens the store and talks to the
//! authority. Everyone else forwards writes over the bus.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Held leadership. Dropping it releases the lock.
pub struct LeaderGuard {
    name: String,
    _held: Box<dyn Any + Send + Sync>,
}

impl LeaderGuard {
    pub fn new(name: impl Into<String>, held: impl Any + Send + Sync) -> Self {
        Self {
            name: name.into(),
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        debug!(lock = %self.name, "leadership released");
    }
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard").field("name", &self.name).finish()
    }
}

/// Named mutual exclusion across contexts.
pub trait LeaderLock: Send + Sync + 'static {
    /// Wait until `name` is free and take it.
    fn acquire(&self, name: &str) -> impl Future<Output = LeaderGuard> + Send;

    /// Take `name` if nobody holds it.
    fn try_acquire(&self, name: &str) -> Option<LeaderGuard>;
}

/// In-process locks, one async mutex per name.
#[derive(Clone, Debug, Default)]
pub struct LocalLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }
}

impl LeaderLock for LocalLocks {
    async fn acquire(&self, name: &str) -> LeaderGuard {
        let held = self.lock_for(name).lock_owned().await;
        debug!(lock = %name, "leadership acquired");
        LeaderGuard::new(name, held)
    }

    fn try_acquire(&self, name: &str) -> Option<LeaderGuard> {
        let held = self.lock_for(name).try_lock_owned().ok()?;
        debug!(lock = %name, "leadership acquired");
        Some(LeaderGuard::new(name, held))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn one_holder_per_name() {
        let locks = LocalLocks::new();
        let first = locks.try_acquire("quire/phone").unwrap();
        assert!(locks.try_acquire("quire/phone").is_none());
        assert!(locks.try_acquire("quire/laptop").is_some());

        let waiting = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("quire/phone").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.name(), "quire/phone");
    }
}
