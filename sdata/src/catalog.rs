//! Explicit registry of entity kinds and the resolver built over it.
//!
//! Kinds are registered once at startup with their resource path and a
//! factory. Lookups are deterministic: a kind with no registration fails with
//! [`SDataError::UnknownResourceKind`], a kind registered more than once fails
//! with [`SDataError::AmbiguousType`].

use crate::entity::Entity;
use crate::error::{SDataError, SDataResult};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

type Factory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

#[derive(Clone)]
pub struct CatalogEntry {
    kind: String,
    resource_path: String,
    type_id: TypeId,
    type_name: &'static str,
    factory: Factory,
}

impl CatalogEntry {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("kind", &self.kind)
            .field("resource_path", &self.resource_path)
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under its own kind name.
    pub fn register<E: Entity>(&mut self, resource_path: impl Into<String>) -> &mut Self {
        self.register_as::<E>(E::KIND, resource_path)
    }

    /// Registers `E` as the concrete type for `kind`.
    pub fn register_as<E: Entity>(
        &mut self,
        kind: impl Into<String>,
        resource_path: impl Into<String>,
    ) -> &mut Self {
        self.entries.push(CatalogEntry {
            kind: kind.into(),
            resource_path: resource_path.into(),
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            factory: Arc::new(|| Box::new(E::default()) as Box<dyn Any + Send>),
        });
        self
    }

    pub fn with<E: Entity>(mut self, resource_path: impl Into<String>) -> Self {
        self.register::<E>(resource_path);
        self
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps entity kinds to resource paths and concrete types.
///
/// The kind index is built from the catalog on first use and kept for the
/// resolver's lifetime.
pub struct ResourceResolver {
    catalog: Arc<Catalog>,
    index: OnceLock<HashMap<String, Vec<usize>>>,
}

impl ResourceResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            index: OnceLock::new(),
        }
    }

    fn index(&self) -> &HashMap<String, Vec<usize>> {
        self.index.get_or_init(|| {
            let mut index: HashMap<String, Vec<usize>> = HashMap::new();
            for (position, entry) in self.catalog.entries.iter().enumerate() {
                index.entry(entry.kind.clone()).or_default().push(position);
            }
            debug!("Built resource kind index with {} kinds", index.len());
            index
        })
    }

    pub fn entry(&self, kind: &str) -> SDataResult<&CatalogEntry> {
        match self.index().get(kind).map(Vec::as_slice) {
            None | Some([]) => Err(SDataError::UnknownResourceKind(kind.to_string())),
            Some([position]) => Ok(&self.catalog.entries[*position]),
            Some(positions) => Err(SDataError::AmbiguousType {
                kind: kind.to_string(),
                reason: format!(
                    "{} registrations: {}",
                    positions.len(),
                    positions
                        .iter()
                        .map(|p| self.catalog.entries[*p].type_name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }

    pub fn resource_path(&self, kind: &str) -> SDataResult<&str> {
        Ok(self.entry(kind)?.resource_path())
    }

    /// Creates a fresh instance of the concrete type registered for `E::KIND`.
    pub fn instantiate<E: Entity>(&self) -> SDataResult<E> {
        let entry = self.entry(E::KIND)?;
        if entry.type_id != TypeId::of::<E>() {
            return Err(SDataError::AmbiguousType {
                kind: E::KIND.to_string(),
                reason: format!(
                    "registered as {}, requested as {}",
                    entry.type_name,
                    std::any::type_name::<E>()
                ),
            });
        }
        (entry.factory)()
            .downcast::<E>()
            .map(|boxed| *boxed)
            .map_err(|_| SDataError::AmbiguousType {
                kind: E::KIND.to_string(),
                reason: format!("factory did not produce {}", entry.type_name),
            })
    }
}
