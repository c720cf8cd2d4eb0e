//! In-memory application repository

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::entities::Application;
use crate::domain::error::{DomainError, Result};
use crate::domain::ports::ApplicationRepository;

/// Repository keeping resolved applications in memory, in insertion order.
/// Insertion order is the start order, so `list` preserves it.
#[derive(Clone)]
pub struct InMemoryApplicationRepository {
    inner: Arc<RwLock<Store>>,
}

#[derive(Default)]
struct Store {
    by_id: HashMap<String, Application>,
    order: Vec<String>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Store::default())),
        }
    }
}

impl Default for InMemoryApplicationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn save(&self, application: Application) -> Result<()> {
        let mut store = self.inner.write().await;
        if !store.by_id.contains_key(&application.id) {
            store.order.push(application.id.clone());
        }
        store.by_id.insert(application.id.clone(), application);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Application> {
        self.inner
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or(DomainError::ApplicationNotFound)
    }

    async fn list(&self) -> Result<Vec<Application>> {
        let store = self.inner.read().await;
        Ok(store
            .order
            .iter()
            .filter_map(|id| store.by_id.get(id).cloned())
            .collect())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.inner.read().await.by_id.contains_key(id))
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.inner.write().await;
        store.by_id.clear();
        store.order.clear();
        Ok(())
    }
}
