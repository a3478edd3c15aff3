use crate::entity::Entity;
use crate::tokens::EntityKey;
use crate::value::Record;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Persistence state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    New,
    Unmodified,
    Modified,
    Deleted,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::New => "New",
            EntityState::Unmodified => "Unmodified",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    New,
    Persisted,
    Deleted,
}

/// An entity together with its identity and the field values last seen on
/// the server.
///
/// `Modified` is not stored: a persisted entity is modified exactly when one
/// of its writable fields differs from the snapshot.
pub struct Tracked<E: Entity> {
    entity: E,
    key: Option<String>,
    lifecycle: Lifecycle,
    snapshot: Record,
}

impl<E: Entity> Tracked<E> {
    /// Wraps a fresh, never-persisted instance.
    pub fn new(entity: E) -> Self {
        Self {
            entity,
            key: None,
            lifecycle: Lifecycle::New,
            snapshot: Record::new(),
        }
    }

    pub(crate) fn materialized(entity: E, key: Option<String>) -> Self {
        let snapshot = entity.to_record();
        Self {
            entity,
            key,
            lifecycle: Lifecycle::Persisted,
            snapshot,
        }
    }

    pub fn state(&self) -> EntityState {
        match self.lifecycle {
            Lifecycle::New => EntityState::New,
            Lifecycle::Deleted => EntityState::Deleted,
            Lifecycle::Persisted if self.changed_fields().is_empty() => EntityState::Unmodified,
            Lifecycle::Persisted => EntityState::Modified,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn identity(&self) -> Option<EntityKey> {
        self.key.as_ref().map(|id| EntityKey::new(E::KIND, id.clone()))
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    pub fn into_inner(self) -> E {
        self.entity
    }

    pub fn snapshot(&self) -> &Record {
        &self.snapshot
    }

    /// Every writable field with its current value.
    pub fn writable_record(&self) -> Record {
        E::fields()
            .iter()
            .filter(|field| field.is_writable())
            .map(|field| (field.name().to_string(), field.get(&self.entity)))
            .collect()
    }

    /// Writable fields whose current value differs from the snapshot.
    pub fn changed_fields(&self) -> Record {
        E::fields()
            .iter()
            .filter(|field| field.is_writable())
            .filter_map(|field| {
                let current = field.get(&self.entity);
                match self.snapshot.get(field.name()) {
                    Some(previous) if *previous == current => None,
                    _ => Some((field.name().to_string(), current)),
                }
            })
            .collect()
    }

    /// Records a successful insert or update.
    pub(crate) fn mark_persisted(&mut self, key: Option<String>) {
        if key.is_some() {
            self.key = key;
        }
        self.lifecycle = Lifecycle::Persisted;
        self.snapshot = self.entity.to_record();
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.lifecycle = Lifecycle::Deleted;
    }
}

impl<E: Entity> Deref for Tracked<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

impl<E: Entity> DerefMut for Tracked<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.entity
    }
}

impl<E: Entity + fmt::Debug> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("entity", &self.entity)
            .finish()
    }
}
