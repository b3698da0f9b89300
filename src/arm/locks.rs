//! Named mutexes that serialize operations touching the same Azure object.
//!
//! Updating a disk attached to a VM, and creating or deleting that VM, must not
//! interleave; both take the lock named after the VM.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of named async locks.
#[derive(Debug, Default, Clone)]
pub struct Locks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held lock; released on drop.
pub type LockGuard = OwnedMutexGuard<()>;

impl Locks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name` within `resource_type`.
    pub async fn by_name(&self, name: &str, resource_type: &str) -> LockGuard {
        let key = format!("{}.{}", resource_type, name);
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        debug!(lock = %key, "acquiring lock");
        mutex.lock_owned().await
    }

    /// Acquire the lock for an ARM ID, case-insensitively.
    pub async fn by_id(&self, id: &str) -> LockGuard {
        self.by_name(&id.to_ascii_lowercase(), "id").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_serializes() {
        let locks = Locks::new();
        let guard = locks.by_name("vm1", "azurerm_virtual_machine").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.by_name("vm1", "azurerm_virtual_machine").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = Locks::new();
        let _a = locks.by_name("vm1", "azurerm_virtual_machine").await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.by_name("vm2", "azurerm_virtual_machine"),
        )
        .await;
        assert!(b.is_ok());
    }
}
