//! In-process retained store.
//!
//! Mirrors the broker semantics closely enough to stand in for it in tests
//! and offline runs: `get` waits for a value up to the timeout and `set`
//! retains the last value per topic.

use super::SharedStore;
use crate::error::{Result, ThermostatError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    changed: Notify,
    available: AtomicBool,
    timeout: Duration,
}

impl MemoryStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            available: AtomicBool::new(true),
            timeout,
        }
    }

    /// Simulate losing (or regaining) the transport.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Retained value of `topic` without waiting.
    pub fn peek(&self, topic: &str) -> Option<String> {
        self.values.lock().get(topic).cloned()
    }

    fn check_available(&self, topic: &str) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ThermostatError::StoreUnavailable(format!(
                "store offline while accessing {}",
                topic
            )))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, topic: &str) -> Result<String> {
        self.check_available(topic)?;
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            // Register before checking so a concurrent set cannot be missed
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.peek(topic) {
                return Ok(value);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ThermostatError::StoreUnavailable(format!(
                    "no retained value for {} within {:?}",
                    topic, self.timeout
                )));
            }
            self.check_available(topic)?;
        }
    }

    async fn set(&self, topic: &str, value: &str) -> Result<()> {
        self.check_available(topic)?;
        self.values
            .lock()
            .insert(topic.to_string(), value.to_string());
        self.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_set_then_get_returns_value() {
        let store = MemoryStore::default();
        assert_ok!(store.set("room/roomtemp", "23.312").await);
        assert_eq!(assert_ok!(store.get("room/roomtemp").await), "23.312");
    }

    #[tokio::test]
    async fn test_last_value_wins() {
        let store = MemoryStore::default();
        store.set("room/hyst", "3").await.unwrap();
        store.set("room/hyst", "2.5").await.unwrap();
        assert_eq!(store.get("room/hyst").await.unwrap(), "2.5");
    }

    #[tokio::test]
    async fn test_get_times_out_without_value() {
        let store = MemoryStore::new(Duration::from_millis(10));
        let err = assert_err!(store.get("room/setpointtemp").await);
        assert!(matches!(err, ThermostatError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_get_waits_for_late_writer() {
        let store = Arc::new(MemoryStore::new(Duration::from_secs(2)));
        let writer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set("room/gpiofan", "18").await.unwrap();
        });
        assert_eq!(store.get("room/gpiofan").await.unwrap(), "18");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_store_fails_both_ways() {
        let store = MemoryStore::default();
        store.set("room/hyst", "3").await.unwrap();
        store.set_available(false);
        assert_err!(store.get("room/hyst").await);
        assert_err!(store.set("room/hyst", "4").await);

        store.set_available(true);
        assert_eq!(store.get("room/hyst").await.unwrap(), "3");
    }
}
