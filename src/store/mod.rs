//! Persistence boundary for alerts and notification attempts.
//!
//! The storage engine itself is out of scope; the pipeline invokes this
//! trait as a side effect of state transitions. Store failures are
//! logged and never block dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{AlertId, AlertRecord, NotificationAttempt};

/// Error from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Update referenced an alert the store does not know
    #[error("unknown alert {0}")]
    UnknownAlert(AlertId),

    /// Backend-specific failure
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Write-side boundary invoked on alert state transitions.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a newly created alert.
    async fn create_alert(&self, record: &AlertRecord) -> Result<(), StoreError>;

    /// Persist the current state of an existing alert.
    async fn update_alert(&self, record: &AlertRecord) -> Result<(), StoreError>;

    /// Persist one notification attempt outcome.
    async fn append_notification_attempt(
        &self,
        attempt: &NotificationAttempt,
    ) -> Result<(), StoreError>;
}

/// In-memory store, used for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<HashMap<AlertId, AlertRecord>>,
    attempts: RwLock<Vec<NotificationAttempt>>,
}

impl InMemoryAlertStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored alert.
    pub fn get_alert(&self, alert_id: &AlertId) -> Option<AlertRecord> {
        self.alerts.read().get(alert_id).cloned()
    }

    /// All attempts recorded for an alert, in append order.
    pub fn attempts_for(&self, alert_id: &AlertId) -> Vec<NotificationAttempt> {
        self.attempts
            .read()
            .iter()
            .filter(|a| &a.alert_id == alert_id)
            .cloned()
            .collect()
    }

    /// Number of stored alerts.
    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn create_alert(&self, record: &AlertRecord) -> Result<(), StoreError> {
        self.alerts.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn update_alert(&self, record: &AlertRecord) -> Result<(), StoreError> {
        let mut alerts = self.alerts.write();
        // Transitions are validated by the single-writer driver task;
        // the store only mirrors the record.
        let stored = alerts
            .get_mut(&record.id)
            .ok_or(StoreError::UnknownAlert(record.id))?;
        *stored = record.clone();
        Ok(())
    }

    async fn append_notification_attempt(
        &self,
        attempt: &NotificationAttempt,
    ) -> Result<(), StoreError> {
        self.attempts.write().push(attempt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertStatus, DecisionSource, UserId};

    #[tokio::test]
    async fn test_create_and_update() {
        let store = InMemoryAlertStore::new();
        let mut record = AlertRecord::new(UserId::from("u1"), None, DecisionSource::Fused);
        let id = record.id;

        store.create_alert(&record).await.unwrap();
        record.transition(AlertStatus::Dispatching).unwrap();
        store.update_alert(&record).await.unwrap();

        assert_eq!(
            store.get_alert(&id).unwrap().status(),
            AlertStatus::Dispatching
        );
    }

    #[tokio::test]
    async fn test_update_unknown_alert_fails() {
        let store = InMemoryAlertStore::new();
        let record = AlertRecord::new(UserId::from("u1"), None, DecisionSource::Fused);
        let err = store.update_alert(&record).await;
        assert!(matches!(err, Err(StoreError::UnknownAlert(_))));
    }
}
