//! Event-triggered handlers
//!
//! Both handlers react to object-created events on the ingest bucket and are
//! independent of each other and of the main chain. They are at-least-once:
//! a redelivered event produces the same artifacts again. Handlers are never
//! retried; a failed handler leaves no output.

mod replicate;
mod transform;

pub use replicate::Replicator;
pub use transform::{TransformHandler, TransformOutcome};

use crate::storage::{ObjectCreated, ObjectLocation};
use eyre::Result;

/// Result of dispatching one event to both handlers
#[derive(Debug)]
pub struct Dispatch {
    pub event: ObjectCreated,
    pub transform: Result<TransformOutcome>,
    pub replicate: Result<ObjectLocation>,
}

impl Dispatch {
    pub fn is_ok(&self) -> bool {
        self.transform.is_ok() && self.replicate.is_ok()
    }
}

/// Fans each event out to the transformer and the replicator
#[derive(Clone)]
pub struct EventRouter {
    transform: TransformHandler,
    replicate: Replicator,
}

impl EventRouter {
    pub fn new(transform: TransformHandler, replicate: Replicator) -> Self {
        Self {
            transform,
            replicate,
        }
    }

    /// Run both handlers for `event` concurrently and wait for both
    pub async fn dispatch(&self, event: ObjectCreated) -> Dispatch {
        log::debug!("Dispatching {}", event.location);
        let (transform, replicate) = tokio::join!(
            self.transform.handle(&event),
            self.replicate.handle(&event)
        );

        if let Err(e) = &transform {
            log::error!("Transform of {} failed: {:#}", event.location, e);
        }
        if let Err(e) = &replicate {
            log::error!("Archive copy of {} failed: {:#}", event.location, e);
        }

        Dispatch {
            event,
            transform,
            replicate,
        }
    }

    /// Dispatch a batch of events, one at a time
    pub async fn dispatch_all(&self, events: Vec<ObjectCreated>) -> Vec<Dispatch> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.dispatch(event).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::storage::{ExistenceGate, LocalObjectStore, ObjectStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn router(store: Arc<dyn ObjectStore>) -> EventRouter {
        let gate = ExistenceGate::new(GateConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ));
        EventRouter::new(
            TransformHandler::new(store.clone(), "transform", gate.clone()),
            Replicator::new(store, "archive", gate),
        )
    }

    #[tokio::test]
    async fn test_dispatch_runs_both_handlers() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(temp.path()).unwrap());
        let raw = ObjectLocation::new("ingest", "response_data_01082023101500.json");
        store.put(&raw, br#"{"results": []}"#.to_vec()).await.unwrap();

        let dispatch = router(store.clone())
            .dispatch(ObjectCreated { location: raw })
            .await;
        assert!(dispatch.is_ok());
        assert_eq!(store.list("transform").await.unwrap(), vec!["response_data_01082023101500.csv"]);
        assert_eq!(store.list("archive").await.unwrap(), vec!["response_data_01082023101500.json"]);
    }

    #[tokio::test]
    async fn test_handler_failures_are_independent() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(temp.path()).unwrap());
        let raw = ObjectLocation::new("ingest", "response_data_01082023101500.json");
        store.put(&raw, b"not json".to_vec()).await.unwrap();

        let dispatch = router(store.clone())
            .dispatch(ObjectCreated { location: raw })
            .await;
        assert!(dispatch.transform.is_err());
        assert!(dispatch.replicate.is_ok());
        assert!(store.list("transform").await.unwrap().is_empty());
    }
}
