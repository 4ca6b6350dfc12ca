//! Storage contract of the registry.
//!
//! Entities carry a generation id that changes on every write. A write that
//! supplies a generation id acts as a conditional update and fails with
//! [`RegistryError::ResourceOutOfDate`] when the stored entity moved on.

use async_trait::async_trait;
use tracing::debug;
use uascout_core::{ApplicationInfoModel, EndpointInfoModel};

use crate::error::{RegistryError, Result};

/// Default number of attempts of [`update_with`]
pub const DEFAULT_MAX_UPDATE_RETRIES: usize = 3;

/// An entity the registry stores.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Discoverer that owns the entity
    fn discoverer_id(&self) -> Option<&str>;

    /// Generation of the stored copy the entity was read from
    fn generation_id(&self) -> Option<&str>;

    fn set_generation_id(&mut self, generation_id: Option<String>);
}

impl Entity for ApplicationInfoModel {
    fn id(&self) -> &str {
        &self.application_id
    }

    fn discoverer_id(&self) -> Option<&str> {
        self.discoverer_id.as_deref()
    }

    fn generation_id(&self) -> Option<&str> {
        self.generation_id.as_deref()
    }

    fn set_generation_id(&mut self, generation_id: Option<String>) {
        self.generation_id = generation_id;
    }
}

impl Entity for EndpointInfoModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn discoverer_id(&self) -> Option<&str> {
        self.discoverer_id.as_deref()
    }

    fn generation_id(&self) -> Option<&str> {
        self.generation_id.as_deref()
    }

    fn set_generation_id(&mut self, generation_id: Option<String>) {
        self.generation_id = generation_id;
    }
}

/// Entity storage with optimistic concurrency.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// Inserts a new entity and returns it with its generation id.
    ///
    /// Fails with [`RegistryError::ResourceConflict`] if the id is taken.
    async fn add(&self, entity: T) -> Result<T>;

    /// Writes an entity and returns it with its new generation id.
    ///
    /// When the entity carries a generation id and a stored copy exists, the
    /// ids must match. An entity that does not exist yet is inserted whatever
    /// generation id it carries.
    async fn update(&self, entity: T) -> Result<T>;

    /// Returns all entities owned by a discoverer.
    async fn list_by_discoverer(&self, discoverer_id: &str) -> Result<Vec<T>>;

    async fn list(&self) -> Result<Vec<T>>;
}

/// Read-modify-write of a single entity.
///
/// `patch` returns whether it changed the entity; unchanged entities are not
/// written. Conditional write conflicts are retried up to `max_attempts`
/// times with a fresh read. Returns `None` if the entity does not exist.
pub async fn update_with<T, R, F>(
    repository: &R,
    id: &str,
    max_attempts: usize,
    mut patch: F,
) -> Result<Option<T>>
where
    T: Entity,
    R: Repository<T> + ?Sized,
    F: FnMut(&mut T) -> bool + Send,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let Some(current) = repository.get(id).await? else {
            return Ok(None);
        };
        let mut entity = current.clone();
        if !patch(&mut entity) {
            return Ok(Some(current));
        }
        match repository.update(entity).await {
            Ok(written) => return Ok(Some(written)),
            Err(e) if e.is_retryable() => {
                debug!(id, attempt, "Conflicting update, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(RegistryError::RetriesExhausted {
        id: id.to_string(),
        attempts: max_attempts,
    })
}
