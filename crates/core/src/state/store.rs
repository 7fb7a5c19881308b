//! # Snapshot Store
//!
//! Durable home for engine snapshots, keyed by a fixed namespace per
//! aggregate. The engines only produce and consume JSON; the medium is
//! behind `SnapshotStore`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use super::db::FlowDb;

/// One persisted aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Canvas,
    Runs,
    Pipelines,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Self::Canvas, Self::Runs, Self::Pipelines];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Canvas => "canvas",
            Self::Runs => "runs",
            Self::Pipelines => "pipelines",
        }
    }
}

impl std::str::FromStr for Namespace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown snapshot namespace: {s}"))
    }
}

/// Where snapshots are kept
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, namespace: Namespace, data: &str) -> Result<()>;

    async fn load(&self, namespace: Namespace) -> Result<Option<String>>;

    async fn clear(&self, namespace: Namespace) -> Result<()>;
}

#[async_trait]
impl SnapshotStore for FlowDb {
    async fn save(&self, namespace: Namespace, data: &str) -> Result<()> {
        self.save_snapshot(namespace, data)
    }

    async fn load(&self, namespace: Namespace) -> Result<Option<String>> {
        self.load_snapshot(namespace)
    }

    async fn clear(&self, namespace: Namespace) -> Result<()> {
        self.delete_snapshot(namespace).map(|_| ())
    }
}

/// Process-local store; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<Namespace, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, namespace: Namespace, data: &str) -> Result<()> {
        self.data
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .insert(namespace, data.to_string());
        Ok(())
    }

    async fn load(&self, namespace: Namespace) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .get(&namespace)
            .cloned())
    }

    async fn clear(&self, namespace: Namespace) -> Result<()> {
        self.data
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .remove(&namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    #[test]
    fn test_namespace_names() {
        for ns in Namespace::ALL {
            assert_eq!(ns.as_str().parse::<Namespace>().ok(), Some(ns));
        }
        let err = "settings".parse::<Namespace>().unwrap_err();
        assert!(err.to_string().contains("settings"));
    }

    #[tokio::test]
    async fn test_stores_behave_alike() {
        let stores: Vec<Arc<dyn SnapshotStore>> = vec![
            Arc::new(MemoryStore::new()),
            Arc::new(FlowDb::open_in_memory().unwrap()),
        ];

        for store in stores {
            assert!(assert_ok!(store.load(Namespace::Pipelines).await).is_none());
            assert_ok!(store.save(Namespace::Pipelines, "[1]").await);
            assert_ok!(store.save(Namespace::Runs, "[2]").await);
            assert_eq!(
                assert_ok!(store.load(Namespace::Pipelines).await).as_deref(),
                Some("[1]")
            );

            assert_ok!(store.clear(Namespace::Pipelines).await);
            assert!(store.load(Namespace::Pipelines).await.unwrap().is_none());
            assert!(store.load(Namespace::Runs).await.unwrap().is_some());
        }
    }
}
