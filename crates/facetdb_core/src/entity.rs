//! Entity handles, plain entity data, and sleeping references.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use facetdb_codec::{Guid, Reference, Value};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Plain entity state: identity, tags, and attributes.
///
/// This is what drivers read and write and what the entity cache stores.
/// `Clone` is a deep copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityData {
    /// Guid, absent until first save.
    pub guid: Option<Guid>,
    /// Creation time, Unix seconds.
    pub cdate: Option<f64>,
    /// Last save time, Unix seconds.
    pub mdate: Option<f64>,
    /// Tags, in insertion order, duplicate-free.
    pub tags: Vec<String>,
    /// Attribute values by name.
    pub attrs: BTreeMap<String, Value>,
}

/// Hydrates sleeping references.
///
/// Implemented by the database facade and injected into entities, so
/// waking a reference needs no process globals.
pub trait Resolve: Send + Sync {
    /// Fetch the stored data for a guid of a registered class.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ReferenceBroken`] when the target row no longer
    /// exists, or with the underlying backend error.
    fn resolve(&self, guid: Guid, class: &str) -> Result<EntityData>;
}

struct EntityInner {
    class: String,
    data: EntityData,
    sleeping: bool,
    resolver: Option<Arc<dyn Resolve>>,
    ref_cache: HashMap<Guid, Entity>,
}

/// A shared handle to one entity.
///
/// Cloning a handle shares state: two clones observe each other's writes.
/// [`deep_copy`](Entity::deep_copy) makes an independent entity. Accessors
/// take `&self` and lock internally.
///
/// An entity decoded from a stored reference starts asleep, holding only
/// its guid and class. The first accessor that needs more wakes it through
/// the injected resolver, so reference graphs, including cycles, hydrate
/// lazily one hop at a time.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<Mutex<EntityInner>>,
}

impl Entity {
    /// Create a fresh, unsaved entity of a class.
    ///
    /// Entities made this way attach to a database on first save; prefer
    /// [`Database::new_entity`](crate::Database::new_entity), which also
    /// verifies the class is registered.
    pub fn new(class: impl Into<String>) -> Self {
        Entity::build(class.into(), EntityData::default(), false, None)
    }

    pub(crate) fn from_data(
        class: String,
        data: EntityData,
        resolver: Option<Arc<dyn Resolve>>,
    ) -> Self {
        Entity::build(class, data, false, resolver)
    }

    pub(crate) fn sleeping(reference: &Reference, resolver: Arc<dyn Resolve>) -> Self {
        let data = EntityData {
            guid: Some(reference.guid),
            ..EntityData::default()
        };
        Entity::build(reference.class.clone(), data, true, Some(resolver))
    }

    fn build(
        class: String,
        data: EntityData,
        sleeping: bool,
        resolver: Option<Arc<dyn Resolve>>,
    ) -> Self {
        Entity {
            inner: Arc::new(Mutex::new(EntityInner {
                class,
                data,
                sleeping,
                resolver,
                ref_cache: HashMap::new(),
            })),
        }
    }

    /// Class name of this entity.
    pub fn class(&self) -> String {
        self.inner.lock().class.clone()
    }

    /// Guid, if this entity has been saved.
    pub fn guid(&self) -> Option<Guid> {
        self.inner.lock().data.guid
    }

    /// Whether this handle is a sleeping reference that has not hydrated.
    pub fn is_asleep(&self) -> bool {
        self.inner.lock().sleeping
    }

    /// Whether two handles share the same underlying entity state.
    pub fn same_handle(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creation time in Unix seconds, if saved.
    pub fn cdate(&self) -> Result<Option<f64>> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.cdate)
    }

    /// Last save time in Unix seconds, if saved.
    pub fn mdate(&self) -> Result<Option<f64>> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.mdate)
    }

    /// The entity's tags.
    pub fn tags(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.tags.clone())
    }

    /// Whether the entity carries the tag.
    pub fn has_tag(&self, tag: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.tags.iter().any(|t| t == tag))
    }

    /// Add a tag. Duplicates and empty strings are ignored.
    pub fn add_tag(&self, tag: impl Into<String>) -> Result<()> {
        let tag = tag.into();
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        if !tag.is_empty() && !inner.data.tags.iter().any(|t| *t == tag) {
            inner.data.tags.push(tag);
        }
        Ok(())
    }

    /// Add several tags.
    pub fn add_tags<I, S>(&self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.add_tag(tag)?;
        }
        Ok(())
    }

    /// Remove a tag if present.
    pub fn remove_tag(&self, tag: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        inner.data.tags.retain(|t| t != tag);
        Ok(())
    }

    /// Read an attribute value.
    pub fn attr(&self, name: &str) -> Result<Option<Value>> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.attrs.get(name).cloned())
    }

    /// Set an attribute value.
    pub fn set_attr(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        inner.data.attrs.insert(name.into(), value.into());
        Ok(())
    }

    /// Delete an attribute if present.
    pub fn del_attr(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        inner.data.attrs.remove(name);
        Ok(())
    }

    /// Names of every set attribute.
    pub fn attr_names(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.attrs.keys().cloned().collect())
    }

    /// A deep snapshot of the entity's data.
    pub fn data(&self) -> Result<EntityData> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(inner.data.clone())
    }

    /// A reference to this entity, once it has been saved.
    pub fn reference(&self) -> Option<Reference> {
        let inner = self.inner.lock();
        inner.data.guid.map(|guid| Reference::new(guid, inner.class.clone()))
    }

    /// Read an attribute holding a reference as an entity handle.
    ///
    /// Repeated reads of the same reference return the same handle, so
    /// callers share hydration state. Returns `Ok(None)` when the
    /// attribute is unset or not a reference.
    ///
    /// # Errors
    ///
    /// Fails when this entity is not attached to a database.
    pub fn attr_entity(&self, name: &str) -> Result<Option<Entity>> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        let Some(Value::Ref(reference)) = inner.data.attrs.get(name).cloned() else {
            return Ok(None);
        };
        if let Some(existing) = inner.ref_cache.get(&reference.guid) {
            return Ok(Some(existing.clone()));
        }
        let resolver = inner.resolver.clone().ok_or_else(|| {
            Error::invalid_parameters("entity is not attached to a database")
        })?;
        let child = Entity::sleeping(&reference, resolver);
        inner.ref_cache.insert(reference.guid, child.clone());
        Ok(Some(child))
    }

    /// An independent copy of this entity with fresh reference state.
    pub fn deep_copy(&self) -> Result<Entity> {
        let mut inner = self.inner.lock();
        wake(&mut inner)?;
        Ok(Entity::build(
            inner.class.clone(),
            inner.data.clone(),
            false,
            inner.resolver.clone(),
        ))
    }

    pub(crate) fn attach(&self, resolver: Arc<dyn Resolve>) {
        let mut inner = self.inner.lock();
        if inner.resolver.is_none() {
            inner.resolver = Some(resolver);
        }
    }

    pub(crate) fn write_back(&self, guid: Guid, cdate: f64, mdate: f64) {
        let mut inner = self.inner.lock();
        inner.data.guid = Some(guid);
        inner.data.cdate = Some(cdate);
        inner.data.mdate = Some(mdate);
        inner.sleeping = false;
    }
}

fn wake(inner: &mut EntityInner) -> Result<()> {
    if !inner.sleeping {
        return Ok(());
    }
    let (Some(guid), Some(resolver)) = (inner.data.guid, inner.resolver.clone()) else {
        return Err(Error::invalid_parameters(
            "sleeping entity is missing its guid or resolver",
        ));
    };
    let data = resolver.resolve(guid, &inner.class)?;
    inner.data = data;
    inner.sleeping = false;
    Ok(())
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Entity")
            .field("class", &inner.class)
            .field("guid", &inner.data.guid)
            .field("sleeping", &inner.sleeping)
            .finish_non_exhaustive()
    }
}
