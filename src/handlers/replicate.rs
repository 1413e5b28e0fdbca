//! Archive copy of raw artifacts

use crate::storage::{ExistenceGate, ObjectCreated, ObjectLocation, ObjectStore};
use eyre::Result;
use std::sync::Arc;

/// Copies every new raw artifact, unmodified, into the archive bucket
#[derive(Clone)]
pub struct Replicator {
    store: Arc<dyn ObjectStore>,
    archive_bucket: String,
    gate: ExistenceGate,
}

impl Replicator {
    pub fn new(store: Arc<dyn ObjectStore>, archive_bucket: impl Into<String>, gate: ExistenceGate) -> Self {
        Self {
            store,
            archive_bucket: archive_bucket.into(),
            gate,
        }
    }

    /// Copy the event's object to the archive bucket under the same key
    ///
    /// Waits for the source to be visible first. An existing archive copy is
    /// overwritten.
    pub async fn handle(&self, event: &ObjectCreated) -> Result<ObjectLocation> {
        let source = &event.location;
        self.gate.wait(self.store.as_ref(), source).await?;

        let target = source.in_bucket(&self.archive_bucket);
        self.store.copy(source, &target).await?;
        log::info!("Archived {} to {}", source, target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::error::{ErrorKind, kind_of};
    use crate::storage::LocalObjectStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn replicator(store: Arc<dyn ObjectStore>) -> Replicator {
        let gate = ExistenceGate::new(GateConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ));
        Replicator::new(store, "archive", gate)
    }

    #[tokio::test]
    async fn test_copy_is_byte_for_byte() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(temp.path()).unwrap());
        let raw = ObjectLocation::new("ingest", "response_data_01082023101500.json");
        let body = b"{\n    \"results\": []\n}\xff".to_vec();
        store.put(&raw, body.clone()).await.unwrap();

        let replicator = replicator(store.clone());
        let target = replicator.handle(&ObjectCreated { location: raw.clone() }).await.unwrap();
        assert_eq!(target, ObjectLocation::new("archive", "response_data_01082023101500.json"));
        assert_eq!(store.get(&target).await.unwrap(), body);

        // Redelivery overwrites with the same bytes
        replicator.handle(&ObjectCreated { location: raw }).await.unwrap();
        assert_eq!(store.get(&target).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_missing_source_times_out() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(temp.path()).unwrap());

        let err = replicator(store.clone())
            .handle(&ObjectCreated::new("ingest", "gone.json"))
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Timeout));
        assert!(store.list("archive").await.unwrap().is_empty());
    }
}
