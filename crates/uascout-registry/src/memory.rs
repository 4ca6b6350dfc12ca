//! In-memory registry store backed by `DashMap`.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RegistryError, Result};
use crate::repository::{Entity, Repository};

/// Thread safe in-memory repository.
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct InMemoryRepository<T> {
    items: Arc<DashMap<String, T>>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn stamp(mut entity: T) -> T {
        entity.set_generation_id(Some(Uuid::new_v4().simple().to_string()));
        entity
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.items.get(id).map(|item| item.value().clone()))
    }

    async fn add(&self, entity: T) -> Result<T> {
        match self.items.entry(entity.id().to_string()) {
            Entry::Occupied(_) => Err(RegistryError::conflict(entity.id())),
            Entry::Vacant(slot) => {
                let entity = Self::stamp(entity);
                slot.insert(entity.clone());
                Ok(entity)
            }
        }
    }

    async fn update(&self, entity: T) -> Result<T> {
        match self.items.entry(entity.id().to_string()) {
            Entry::Occupied(mut slot) => {
                if let Some(expected) = entity.generation_id() {
                    if slot.get().generation_id() != Some(expected) {
                        return Err(RegistryError::out_of_date(entity.id()));
                    }
                }
                let entity = Self::stamp(entity);
                slot.insert(entity.clone());
                Ok(entity)
            }
            Entry::Vacant(slot) => {
                let entity = Self::stamp(entity);
                slot.insert(entity.clone());
                Ok(entity)
            }
        }
    }

    async fn list_by_discoverer(&self, discoverer_id: &str) -> Result<Vec<T>> {
        Ok(self
            .items
            .iter()
            .filter(|item| item.value().discoverer_id() == Some(discoverer_id))
            .map(|item| item.value().clone())
            .collect())
    }

    async fn list(&self) -> Result<Vec<T>> {
        Ok(self.items.iter().map(|item| item.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::update_with;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uascout_core::EndpointInfoModel;

    fn endpoint(id: &str, discoverer: &str) -> EndpointInfoModel {
        EndpointInfoModel {
            id: id.to_string(),
            application_id: "uas1".to_string(),
            endpoint_url: "opc.tcp://h:4840".to_string(),
            alternative_urls: Default::default(),
            security_mode: None,
            security_policy: None,
            security_level: None,
            authentication_methods: Vec::new(),
            certificate_thumbprint: None,
            discoverer_id: Some(discoverer.to_string()),
            site_id: None,
            visibility: Default::default(),
            not_seen_since: None,
            generation_id: None,
        }
    }

    #[tokio::test]
    async fn test_add_assigns_generation_and_rejects_duplicates() {
        let repo = InMemoryRepository::new();
        let added = repo.add(endpoint("uat1", "d1")).await.unwrap();
        assert!(added.generation_id.is_some());

        let err = repo.add(endpoint("uat1", "d1")).await.unwrap_err();
        assert_eq!(err, RegistryError::conflict("uat1"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_update_checks_generation_of_existing_entity() {
        let repo = InMemoryRepository::new();
        let added = repo.add(endpoint("uat1", "d1")).await.unwrap();

        let mut stale = added.clone();
        stale.generation_id = Some("stale".to_string());
        let err = repo.update(stale).await.unwrap_err();
        assert_eq!(err, RegistryError::out_of_date("uat1"));

        let mut fresh = added.clone();
        fresh.security_level = Some(3);
        let written = repo.update(fresh).await.unwrap();
        assert_ne!(written.generation_id, added.generation_id);

        // the old generation is now stale as well
        let err = repo.update(added).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_update_inserts_missing_entity_with_any_generation() {
        let repo = InMemoryRepository::new();
        let mut entity = endpoint("uat9", "d1");
        entity.generation_id = Some("whatever".to_string());

        let written = repo.update(entity).await.unwrap();
        assert_ne!(written.generation_id.as_deref(), Some("whatever"));
        assert!(repo.get("uat9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_by_discoverer() {
        let repo = InMemoryRepository::new();
        repo.add(endpoint("uat1", "d1")).await.unwrap();
        repo.add(endpoint("uat2", "d1")).await.unwrap();
        repo.add(endpoint("uat3", "d2")).await.unwrap();

        assert_eq!(repo.list_by_discoverer("d1").await.unwrap().len(), 2);
        assert_eq!(repo.list_by_discoverer("d2").await.unwrap().len(), 1);
        assert!(repo.list_by_discoverer("d3").await.unwrap().is_empty());
        assert_eq!(repo.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_with_skips_unchanged_and_missing() {
        let repo = InMemoryRepository::new();
        let added = repo.add(endpoint("uat1", "d1")).await.unwrap();

        let unchanged = update_with(&repo, "uat1", 3, |_: &mut EndpointInfoModel| false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.generation_id, added.generation_id);

        let missing = update_with(&repo, "nope", 3, |_: &mut EndpointInfoModel| true)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    /// Repository whose first writes lose against a concurrent writer.
    struct Contended {
        inner: InMemoryRepository<EndpointInfoModel>,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl Repository<EndpointInfoModel> for Contended {
        async fn get(&self, id: &str) -> Result<Option<EndpointInfoModel>> {
            self.inner.get(id).await
        }

        async fn add(&self, entity: EndpointInfoModel) -> Result<EndpointInfoModel> {
            self.inner.add(entity).await
        }

        async fn update(&self, entity: EndpointInfoModel) -> Result<EndpointInfoModel> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Err(RegistryError::out_of_date(entity.id.clone()));
            }
            self.inner.update(entity).await
        }

        async fn list_by_discoverer(&self, id: &str) -> Result<Vec<EndpointInfoModel>> {
            self.inner.list_by_discoverer(id).await
        }

        async fn list(&self) -> Result<Vec<EndpointInfoModel>> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_update_with_retries_conflicts() {
        let repo = Contended {
            inner: InMemoryRepository::new(),
            conflicts: AtomicUsize::new(2),
        };
        repo.add(endpoint("uat1", "d1")).await.unwrap();

        let mut calls = 0;
        let written = update_with(&repo, "uat1", 3, |e: &mut EndpointInfoModel| {
            calls += 1;
            e.security_level = Some(7);
            true
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(written.security_level, Some(7));
        assert_eq!(calls, 3);

        repo.conflicts.store(5, Ordering::SeqCst);
        let err = update_with(&repo, "uat1", 2, |e: &mut EndpointInfoModel| {
            e.security_level = Some(8);
            true
        })
        .await
        .unwrap_err();
        assert_eq!(
            err,
            RegistryError::RetriesExhausted {
                id: "uat1".to_string(),
                attempts: 2
            }
        );
    }
}
