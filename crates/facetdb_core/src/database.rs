//! The database facade.
//!
//! [`Database`] owns a driver, the class registry, and the entity cache,
//! and runs the full find pipeline: validate selectors, compile for the
//! driver's dialect, execute, decode and cache candidate rows, re-check
//! whatever the backend evaluated inexactly, and window in process when
//! the backend could not.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info, trace, warn};

use facetdb_codec::{from_stored, to_stored, Facets, Guid, Reference, Value};

use crate::cache::EntityCache;
use crate::config::Config;
use crate::driver::{AttrWrite, Driver, EntityRecord, EntityRow, ImportItem};
use crate::entity::{Entity, EntityData, Resolve};
use crate::error::{Error, Result};
use crate::query::{compile, passes_inexact};
use crate::registry::{is_valid_etype, ClassRegistry};
use crate::selector::{validate, FindOptions, Return, Selector};

/// Attribute names that address identity columns in selectors and can
/// never be stored as data.
const RESERVED_ATTRS: [&str; 3] = ["guid", "cdate", "mdate"];

struct Inner {
    config: Config,
    driver: Box<dyn Driver>,
    registry: RwLock<ClassRegistry>,
    cache: Mutex<EntityCache>,
    open: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn etype_of(&self, class: &str) -> Result<String> {
        Ok(self.registry.read().resolve(class)?.to_string())
    }

    fn decode_row(&self, class: &str, row: EntityRow) -> Result<EntityData> {
        let guid = row.guid;
        if row.attrs.is_some() {
            if let Some(hit) = self.cache.lock().pull(guid, class) {
                return Ok(hit);
            }
        }
        let mut attrs = BTreeMap::new();
        if let Some(pairs) = &row.attrs {
            for (name, stored) in pairs {
                let value = from_stored(stored).map_err(|source| {
                    Error::corrupted(guid, format!("attribute {name}: {source}"))
                })?;
                attrs.insert(name.clone(), value);
            }
        }
        let data = EntityData {
            guid: Some(guid),
            cdate: Some(row.cdate),
            mdate: Some(row.mdate),
            tags: row.tags,
            attrs,
        };
        if row.attrs.is_some() {
            self.cache.lock().push(guid, class, &data);
        }
        Ok(data)
    }

    fn execute_find(
        &self,
        options: &FindOptions,
        selectors: &[Selector],
    ) -> Result<Vec<EntityData>> {
        self.ensure_open()?;
        let etype = self.etype_of(&options.class)?;
        validate(selectors)?;
        let compiled = compile(
            self.driver.dialect(),
            &self.config.table_prefix,
            &etype,
            selectors,
            options,
        )?;
        debug!(
            "find {}: {} selectors, coverage {}",
            options.class,
            selectors.len(),
            if compiled.full_coverage { "full" } else { "partial" },
        );
        trace!("find sql: {}", compiled.sql);

        let rows = self.driver.select(&etype, &compiled)?;
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let data = self.decode_row(&options.class, row)?;
            if !compiled.full_coverage
                && !passes_inexact(selectors, &compiled.selector_exact, &data)
            {
                continue;
            }
            results.push(data);
        }
        if !compiled.full_coverage {
            results = window(results, options.limit, options.offset);
        }
        Ok(results)
    }

    fn fetch_data(&self, class: &str, guid: Guid) -> Result<Option<EntityData>> {
        let options = FindOptions::new(class).limit(1);
        let selectors = [Selector::and().guid([guid])];
        let mut rows = self.execute_find(&options, &selectors)?;
        Ok(rows.pop())
    }
}

impl Resolve for Inner {
    fn resolve(&self, guid: Guid, class: &str) -> Result<EntityData> {
        self.fetch_data(class, guid)?
            .ok_or(Error::ReferenceBroken { guid })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            info!("database dropped while open, closing");
        }
    }
}

/// A handle to one entity store.
///
/// `Clone` shares the underlying driver, registry, and cache; the handle
/// is cheap to pass around and safe to use from multiple threads.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Open a database over a driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] when the configured table
    /// prefix contains characters that cannot appear in a table name.
    pub fn open(driver: Box<dyn Driver>, config: Config) -> Result<Database> {
        if !is_valid_etype(&config.table_prefix) {
            return Err(Error::invalid_parameters(format!(
                "invalid table prefix {:?}: lowercase letters, digits, and underscores only",
                config.table_prefix
            )));
        }
        info!(
            "database open, table prefix {:?}, cache limit {}",
            config.table_prefix, config.cache_limit,
        );
        let cache = EntityCache::new(config.cache_threshold, config.cache_limit);
        Ok(Database {
            inner: Arc::new(Inner {
                config,
                driver,
                registry: RwLock::new(ClassRegistry::new()),
                cache: Mutex::new(cache),
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Close the database. Idempotent; later operations fail with
    /// [`Error::Closed`]. Clones of this handle close with it.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            info!("database closed");
        }
    }

    /// Whether the database accepts operations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn resolver(&self) -> Arc<dyn Resolve> {
        self.inner.clone()
    }

    /// Register an entity class under an etype, the key that names its
    /// backend tables. Re-registering a class replaces its etype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] on a closed database and
    /// [`Error::InvalidParameters`] for an invalid class name or etype.
    pub fn register_class(
        &self,
        class: impl Into<String>,
        etype: impl Into<String>,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        let class = class.into();
        let etype = etype.into();
        self.inner.registry.write().register(class.clone(), etype.clone())?;
        debug!("registered class {class} as etype {etype}");
        Ok(())
    }

    /// Create a fresh, unsaved entity of a registered class, attached to
    /// this database so its references resolve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unregistered class.
    pub fn new_entity(&self, class: &str) -> Result<Entity> {
        self.inner.ensure_open()?;
        self.inner.etype_of(class)?;
        let entity = Entity::new(class);
        entity.attach(self.resolver());
        Ok(entity)
    }

    /// Find entities matching every selector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] for invalid selectors and
    /// driver errors as they are.
    pub fn find(&self, options: &FindOptions, selectors: &[Selector]) -> Result<Vec<Entity>> {
        let options = options.clone().ret(Return::Entity);
        let results = self.inner.execute_find(&options, selectors)?;
        Ok(results
            .into_iter()
            .map(|data| self.hydrate(&options.class, data))
            .collect())
    }

    /// Find guids of entities matching every selector. Skips decoding
    /// attribute data entirely when the backend covered all selectors.
    ///
    /// # Errors
    ///
    /// Same as [`Database::find`].
    pub fn find_guids(&self, options: &FindOptions, selectors: &[Selector]) -> Result<Vec<Guid>> {
        let options = options.clone().ret(Return::Guid);
        let results = self.inner.execute_find(&options, selectors)?;
        Ok(results.into_iter().filter_map(|data| data.guid).collect())
    }

    /// The first entity matching every selector, in the requested order.
    ///
    /// # Errors
    ///
    /// Same as [`Database::find`].
    pub fn get(&self, options: &FindOptions, selectors: &[Selector]) -> Result<Option<Entity>> {
        let options = options.clone().limit(1);
        Ok(self.find(&options, selectors)?.into_iter().next())
    }

    /// Load one entity by guid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unregistered class and
    /// driver errors as they are.
    pub fn get_by_guid(&self, class: &str, guid: Guid) -> Result<Option<Entity>> {
        Ok(self
            .inner
            .fetch_data(class, guid)?
            .map(|data| self.hydrate(class, data)))
    }

    /// A sleeping handle for a stored reference. No backend access
    /// happens until something reads through the handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] on a closed database.
    pub fn entity_from_reference(&self, reference: &Reference) -> Result<Entity> {
        self.inner.ensure_open()?;
        Ok(Entity::sleeping(reference, self.resolver()))
    }

    fn hydrate(&self, class: &str, data: EntityData) -> Entity {
        Entity::from_data(class.to_string(), data, Some(self.resolver()))
    }

    /// Persist an entity.
    ///
    /// A new entity gets a fresh random guid and creation time. An
    /// existing one is replaced only if untouched since it was loaded;
    /// otherwise nothing is written and [`Error::WriteConflict`] names
    /// the guid so the caller can reload, reapply, and retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] for tags or attribute names
    /// the store cannot hold, [`Error::WriteConflict`] on a lost race,
    /// and driver errors as they are.
    pub fn save(&self, entity: &Entity) -> Result<()> {
        self.inner.ensure_open()?;
        let class = entity.class();
        let etype = self.inner.etype_of(&class)?;
        let data = entity.data()?;
        validate_tags(&data.tags)?;
        validate_attr_names(&data.attrs)?;

        let attrs = data
            .attrs
            .iter()
            .map(|(name, value)| {
                Ok(AttrWrite {
                    name: name.clone(),
                    stored: to_stored(value)?,
                    facets: Facets::of(value),
                })
            })
            .collect::<Result<Vec<AttrWrite>>>()?;
        let now = now_secs();

        match data.guid {
            Some(guid) => {
                let Some(expected_mdate) = data.mdate else {
                    return Err(Error::invalid_parameters(
                        "entity has a guid but no modification time",
                    ));
                };
                let record = EntityRecord {
                    guid,
                    cdate: data.cdate.unwrap_or(now),
                    mdate: now,
                    tags: data.tags,
                    attrs,
                };
                if !self.inner.driver.update(&etype, &record, expected_mdate)? {
                    warn!("write conflict on {class} {guid}");
                    return Err(Error::WriteConflict { guid });
                }
                self.inner.cache.lock().clean(guid);
                entity.write_back(guid, record.cdate, record.mdate);
                debug!("updated {class} {guid}");
            }
            None => {
                let mut rng = rand::thread_rng();
                loop {
                    let guid = Guid::new(rng.gen_range(1..=Guid::MAX));
                    let record = EntityRecord {
                        guid,
                        cdate: now,
                        mdate: now,
                        tags: data.tags.clone(),
                        attrs: attrs.clone(),
                    };
                    if self.inner.driver.create(&etype, &record)? {
                        entity.attach(self.resolver());
                        entity.write_back(guid, now, now);
                        debug!("created {class} {guid}");
                        break;
                    }
                    trace!("guid {guid} taken, retrying");
                }
            }
        }
        Ok(())
    }

    /// Delete an entity. An unsaved entity deletes nothing.
    ///
    /// # Errors
    ///
    /// Driver errors as they are.
    pub fn delete(&self, entity: &Entity) -> Result<bool> {
        match entity.guid() {
            Some(guid) => self.delete_guid(&entity.class(), guid),
            None => Ok(false),
        }
    }

    /// Delete an entity by guid. Returns `Ok(false)` when nothing was
    /// stored under it.
    ///
    /// # Errors
    ///
    /// Driver errors as they are.
    pub fn delete_guid(&self, class: &str, guid: Guid) -> Result<bool> {
        self.inner.ensure_open()?;
        let etype = self.inner.etype_of(class)?;
        let deleted = self.inner.driver.delete(&etype, guid)?;
        self.inner.cache.lock().clean(guid);
        if deleted {
            debug!("deleted {class} {guid}");
        }
        Ok(deleted)
    }

    /// Read a UID counter, `None` if it was never incremented or set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] for an empty name and driver
    /// errors as they are.
    pub fn uid(&self, name: &str) -> Result<Option<u64>> {
        self.inner.ensure_open()?;
        require_uid_name(name)?;
        self.inner.driver.uid_get(name)
    }

    /// Atomically increment a UID counter and return the new value. The
    /// first increment of a name yields 1.
    ///
    /// # Errors
    ///
    /// Same as [`Database::uid`].
    pub fn new_uid(&self, name: &str) -> Result<u64> {
        self.inner.ensure_open()?;
        require_uid_name(name)?;
        let value = self.inner.driver.uid_new(name)?;
        debug!("uid {name} -> {value}");
        Ok(value)
    }

    /// Set a UID counter to an explicit value.
    ///
    /// # Errors
    ///
    /// Same as [`Database::uid`].
    pub fn set_uid(&self, name: &str, value: u64) -> Result<()> {
        self.inner.ensure_open()?;
        require_uid_name(name)?;
        self.inner.driver.uid_set(name, value)
    }

    /// Rename a UID counter, keeping its value. Renaming an absent name
    /// is a no-op; an existing target is replaced.
    ///
    /// # Errors
    ///
    /// Same as [`Database::uid`].
    pub fn rename_uid(&self, old: &str, new: &str) -> Result<()> {
        self.inner.ensure_open()?;
        require_uid_name(old)?;
        require_uid_name(new)?;
        self.inner.driver.uid_rename(old, new)
    }

    /// Remove a UID counter. The next increment of the name restarts at
    /// 1.
    ///
    /// # Errors
    ///
    /// Same as [`Database::uid`].
    pub fn delete_uid(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        require_uid_name(name)?;
        self.inner.driver.uid_delete(name)
    }

    /// Every UID counter, sorted by name.
    ///
    /// # Errors
    ///
    /// Driver errors as they are.
    pub fn uid_list(&self) -> Result<Vec<(String, u64)>> {
        self.inner.ensure_open()?;
        self.inner.driver.uid_list()
    }

    /// Write one imported entity, preserving its guid and timestamps
    /// exactly and replacing any previous rows under that guid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] when the data has no guid or
    /// timestamps, plus everything [`Database::import`] returns.
    pub fn apply_imported_entity(&self, class: &str, data: &EntityData) -> Result<()> {
        self.inner.ensure_open()?;
        let etype = self.inner.etype_of(class)?;
        let record = import_record(data)?;
        self.import(vec![ImportItem::Entity { etype, record }])
    }

    /// Write one imported UID counter.
    ///
    /// # Errors
    ///
    /// Everything [`Database::import`] returns.
    pub fn apply_imported_counter(&self, name: &str, value: u64) -> Result<()> {
        require_uid_name(name)?;
        self.import(vec![ImportItem::Counter {
            name: name.to_string(),
            value,
        }])
    }

    /// Apply a batch of imported items in one driver transaction.
    /// Entities and counters replace whatever shares their identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] for an invalid etype or
    /// malformed item; nothing is applied when any item fails.
    pub fn import(&self, items: Vec<ImportItem>) -> Result<()> {
        self.inner.ensure_open()?;
        for item in &items {
            match item {
                ImportItem::Entity { etype, record } => {
                    if etype.is_empty() || !is_valid_etype(etype) {
                        return Err(Error::invalid_parameters(format!(
                            "invalid etype {etype:?} in import"
                        )));
                    }
                    validate_tags(&record.tags)?;
                }
                ImportItem::Counter { name, .. } => require_uid_name(name)?,
            }
        }
        self.inner.driver.import_batch(&items)?;
        let mut cache = self.inner.cache.lock();
        let mut entities = 0usize;
        for item in &items {
            if let ImportItem::Entity { record, .. } = item {
                cache.clean(record.guid);
                entities += 1;
            }
        }
        drop(cache);
        info!("imported {} entities, {} items total", entities, items.len());
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("open", &self.is_open())
            .field("table_prefix", &self.inner.config.table_prefix)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

fn window(results: Vec<EntityData>, limit: Option<usize>, offset: usize) -> Vec<EntityData> {
    results
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

fn validate_tags(tags: &[String]) -> Result<()> {
    for tag in tags {
        if tag.is_empty() {
            return Err(Error::invalid_parameters("empty tag"));
        }
        if tag.contains(',') {
            return Err(Error::invalid_parameters(format!(
                "tag {tag:?} contains a comma"
            )));
        }
    }
    Ok(())
}

fn validate_attr_names(attrs: &BTreeMap<String, Value>) -> Result<()> {
    for name in attrs.keys() {
        if name.is_empty() {
            return Err(Error::invalid_parameters("empty attribute name"));
        }
        if name.contains(',') {
            return Err(Error::invalid_parameters(format!(
                "attribute name {name:?} contains a comma"
            )));
        }
        if RESERVED_ATTRS.contains(&name.as_str()) {
            return Err(Error::invalid_parameters(format!(
                "attribute name {name:?} is reserved"
            )));
        }
    }
    Ok(())
}

fn require_uid_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_parameters("empty uid name"));
    }
    Ok(())
}

fn import_record(data: &EntityData) -> Result<EntityRecord> {
    let (Some(guid), Some(cdate), Some(mdate)) = (data.guid, data.cdate, data.mdate) else {
        return Err(Error::invalid_parameters(
            "imported entity needs guid, cdate, and mdate",
        ));
    };
    validate_attr_names(&data.attrs)?;
    let attrs = data
        .attrs
        .iter()
        .map(|(name, value)| {
            Ok(AttrWrite {
                name: name.clone(),
                stored: to_stored(value)?,
                facets: Facets::of(value),
            })
        })
        .collect::<Result<Vec<AttrWrite>>>()?;
    Ok(EntityRecord {
        guid,
        cdate,
        mdate,
        tags: data.tags.clone(),
        attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Bind, CompiledFind, DialectKind};
    use std::collections::HashMap;

    /// An in-memory driver for facade tests. It understands just enough
    /// of a compiled find to serve guid lookups; everything else returns
    /// all rows of the etype and relies on the in-process evaluator.
    #[derive(Default)]
    struct MemDriver {
        entities: Mutex<HashMap<(String, u64), EntityRecord>>,
        uids: Mutex<HashMap<String, u64>>,
        collide_first_create: AtomicBool,
    }

    impl MemDriver {
        fn row(record: &EntityRecord, with_attrs: bool) -> EntityRow {
            EntityRow {
                guid: record.guid,
                cdate: record.cdate,
                mdate: record.mdate,
                tags: record.tags.clone(),
                attrs: with_attrs.then(|| {
                    record
                        .attrs
                        .iter()
                        .map(|attr| (attr.name.clone(), attr.stored.clone()))
                        .collect()
                }),
            }
        }
    }

    impl Driver for MemDriver {
        fn dialect(&self) -> DialectKind {
            DialectKind::Sqlite
        }

        fn select(&self, etype: &str, query: &CompiledFind) -> Result<Vec<EntityRow>> {
            let entities = self.entities.lock();
            let guid_probe = if query.sql.contains("e.guid IN") {
                query.binds.iter().find_map(|bind| match bind {
                    Bind::Int(guid) => Some(*guid as u64),
                    _ => None,
                })
            } else {
                None
            };
            let mut rows: Vec<EntityRow> = entities
                .iter()
                .filter(|((e, guid), _)| {
                    e == etype && guid_probe.map_or(true, |probe| *guid == probe)
                })
                .map(|(_, record)| Self::row(record, query.select_data))
                .collect();
            rows.sort_by(|a, b| a.cdate.total_cmp(&b.cdate));
            Ok(rows)
        }

        fn create(&self, etype: &str, record: &EntityRecord) -> Result<bool> {
            if self.collide_first_create.swap(false, Ordering::SeqCst) {
                return Ok(false);
            }
            let mut entities = self.entities.lock();
            let key = (etype.to_string(), record.guid.get());
            if entities.contains_key(&key) {
                return Ok(false);
            }
            entities.insert(key, record.clone());
            Ok(true)
        }

        fn update(&self, etype: &str, record: &EntityRecord, expected_mdate: f64) -> Result<bool> {
            let mut entities = self.entities.lock();
            let key = (etype.to_string(), record.guid.get());
            match entities.get(&key) {
                Some(existing) if existing.mdate == expected_mdate => {
                    entities.insert(key, record.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        fn delete(&self, etype: &str, guid: Guid) -> Result<bool> {
            Ok(self
                .entities
                .lock()
                .remove(&(etype.to_string(), guid.get()))
                .is_some())
        }

        fn uid_get(&self, name: &str) -> Result<Option<u64>> {
            Ok(self.uids.lock().get(name).copied())
        }

        fn uid_new(&self, name: &str) -> Result<u64> {
            let mut uids = self.uids.lock();
            let value = uids.entry(name.to_string()).or_insert(0);
            *value += 1;
            Ok(*value)
        }

        fn uid_set(&self, name: &str, value: u64) -> Result<()> {
            self.uids.lock().insert(name.to_string(), value);
            Ok(())
        }

        fn uid_rename(&self, old: &str, new: &str) -> Result<()> {
            let mut uids = self.uids.lock();
            if let Some(value) = uids.remove(old) {
                uids.insert(new.to_string(), value);
            }
            Ok(())
        }

        fn uid_delete(&self, name: &str) -> Result<()> {
            self.uids.lock().remove(name);
            Ok(())
        }

        fn uid_list(&self) -> Result<Vec<(String, u64)>> {
            let mut list: Vec<(String, u64)> = self
                .uids
                .lock()
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect();
            list.sort();
            Ok(list)
        }

        fn import_batch(&self, items: &[ImportItem]) -> Result<()> {
            for item in items {
                match item {
                    ImportItem::Entity { etype, record } => {
                        self.entities
                            .lock()
                            .insert((etype.clone(), record.guid.get()), record.clone());
                    }
                    ImportItem::Counter { name, value } => {
                        self.uids.lock().insert(name.clone(), *value);
                    }
                }
            }
            Ok(())
        }
    }

    fn open_db() -> Database {
        let db = Database::open(Box::new(MemDriver::default()), Config::new()).unwrap();
        db.register_class("Person", "person").unwrap();
        db
    }

    #[test]
    fn save_assigns_guid_and_timestamps() {
        let db = open_db();
        let entity = db.new_entity("Person").unwrap();
        entity.set_attr("name", "Ann").unwrap();
        entity.add_tag("person").unwrap();
        assert!(entity.guid().is_none());

        db.save(&entity).unwrap();
        let guid = entity.guid().unwrap();
        assert!(guid.get() >= 1);
        assert!(entity.cdate().unwrap().is_some());
        assert_eq!(entity.cdate().unwrap(), entity.mdate().unwrap());
    }

    #[test]
    fn save_retries_on_guid_collision() {
        let db = Database::open(
            Box::new(MemDriver {
                collide_first_create: AtomicBool::new(true),
                ..MemDriver::default()
            }),
            Config::new(),
        )
        .unwrap();
        db.register_class("Person", "person").unwrap();

        let entity = db.new_entity("Person").unwrap();
        db.save(&entity).unwrap();
        assert!(entity.guid().is_some());
    }

    #[test]
    fn stale_update_is_a_write_conflict() {
        let db = open_db();
        let entity = db.new_entity("Person").unwrap();
        entity.set_attr("n", 1i64).unwrap();
        db.save(&entity).unwrap();
        let guid = entity.guid().unwrap();

        let other = db.get_by_guid("Person", guid).unwrap().unwrap();
        other.set_attr("n", 2i64).unwrap();
        db.save(&other).unwrap();

        entity.set_attr("n", 3i64).unwrap();
        let err = db.save(&entity).unwrap_err();
        assert!(matches!(err, Error::WriteConflict { guid: g } if g == guid));

        // Reload, reapply, retry.
        let fresh = db.get_by_guid("Person", guid).unwrap().unwrap();
        fresh.set_attr("n", 3i64).unwrap();
        db.save(&fresh).unwrap();
        assert_eq!(
            fresh.attr("n").unwrap(),
            Some(Value::Int(3))
        );
    }

    #[test]
    fn find_round_trips_attributes() {
        let db = open_db();
        let entity = db.new_entity("Person").unwrap();
        entity.add_tag("person").unwrap();
        entity.set_attr("age", 25i64).unwrap();
        db.save(&entity).unwrap();

        let found = db.find(&FindOptions::new("Person"), &[]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].guid(), entity.guid());
        assert_eq!(found[0].attr("age").unwrap(), Some(Value::Int(25)));
        assert!(found[0].has_tag("person").unwrap());
    }

    #[test]
    fn inexact_selectors_filter_in_process() {
        let db = open_db();
        for nums in [vec![1i64, 2], vec![3i64, 4]] {
            let entity = db.new_entity("Person").unwrap();
            entity.set_attr("nums", nums).unwrap();
            db.save(&entity).unwrap();
        }

        let found = db
            .find(
                &FindOptions::new("Person"),
                &[Selector::and().contains("nums", 2i64)],
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].attr("nums").unwrap(),
            Some(Value::from(vec![1i64, 2]))
        );
    }

    #[test]
    fn reserved_and_malformed_names_rejected_at_save() {
        let db = open_db();
        for name in ["cdate", "mdate", "guid", "with,comma"] {
            let entity = db.new_entity("Person").unwrap();
            entity.set_attr(name, 1i64).unwrap();
            let err = db.save(&entity).unwrap_err();
            assert!(matches!(err, Error::InvalidParameters { .. }), "{name}");
        }

        let entity = db.new_entity("Person").unwrap();
        entity.add_tag("a,b").unwrap();
        let err = db.save(&entity).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters { .. }));
    }

    #[test]
    fn delete_then_get_is_none() {
        let db = open_db();
        let entity = db.new_entity("Person").unwrap();
        db.save(&entity).unwrap();
        let guid = entity.guid().unwrap();

        assert!(db.delete(&entity).unwrap());
        assert!(!db.delete_guid("Person", guid).unwrap());
        assert!(db.get_by_guid("Person", guid).unwrap().is_none());
    }

    #[test]
    fn sleeping_reference_wakes_through_database() {
        let db = open_db();
        let target = db.new_entity("Person").unwrap();
        target.set_attr("name", "Ann").unwrap();
        db.save(&target).unwrap();
        let reference = target.reference().unwrap();

        let handle = db.entity_from_reference(&reference).unwrap();
        assert!(handle.is_asleep());
        assert_eq!(handle.attr("name").unwrap(), Some(Value::from("Ann")));
        assert!(!handle.is_asleep());
    }

    #[test]
    fn broken_reference_surfaces() {
        let db = open_db();
        let handle = db
            .entity_from_reference(&Reference::new(Guid::new(404), "Person"))
            .unwrap();
        let err = handle.attr("name").unwrap_err();
        assert!(matches!(err, Error::ReferenceBroken { guid } if guid.get() == 404));
    }

    #[test]
    fn closed_database_rejects_operations() {
        let db = open_db();
        let entity = db.new_entity("Person").unwrap();
        db.close();
        db.close();
        assert!(!db.is_open());
        assert!(matches!(db.save(&entity).unwrap_err(), Error::Closed));
        assert!(matches!(
            db.find(&FindOptions::new("Person"), &[]).unwrap_err(),
            Error::Closed
        ));
        assert!(matches!(db.new_uid("n").unwrap_err(), Error::Closed));
    }

    #[test]
    fn unregistered_class_fails_fast() {
        let db = open_db();
        let err = db.find(&FindOptions::new("Ghost"), &[]).unwrap_err();
        assert!(matches!(err, Error::ClassNotFound { class } if class == "Ghost"));
    }

    #[test]
    fn uid_counters() {
        let db = open_db();
        assert_eq!(db.uid("seq").unwrap(), None);
        assert_eq!(db.new_uid("seq").unwrap(), 1);
        assert_eq!(db.new_uid("seq").unwrap(), 2);
        db.set_uid("seq", 10).unwrap();
        assert_eq!(db.new_uid("seq").unwrap(), 11);
        db.rename_uid("seq", "order").unwrap();
        assert_eq!(db.uid("seq").unwrap(), None);
        assert_eq!(db.uid("order").unwrap(), Some(11));
        db.delete_uid("order").unwrap();
        assert_eq!(db.new_uid("order").unwrap(), 1);
        assert_eq!(db.uid_list().unwrap(), vec![("order".to_string(), 1)]);
        assert!(matches!(
            db.uid("").unwrap_err(),
            Error::InvalidParameters { .. }
        ));
    }

    #[test]
    fn import_preserves_identity() {
        let db = open_db();
        let data = EntityData {
            guid: Some(Guid::new(77)),
            cdate: Some(100.0),
            mdate: Some(200.0),
            tags: vec!["person".to_string()],
            attrs: [("name".to_string(), Value::from("Imported"))]
                .into_iter()
                .collect(),
        };
        db.apply_imported_entity("Person", &data).unwrap();
        db.apply_imported_counter("seq", 9).unwrap();

        let loaded = db.get_by_guid("Person", Guid::new(77)).unwrap().unwrap();
        assert_eq!(loaded.cdate().unwrap(), Some(100.0));
        assert_eq!(loaded.mdate().unwrap(), Some(200.0));
        assert_eq!(loaded.attr("name").unwrap(), Some(Value::from("Imported")));
        assert_eq!(db.uid("seq").unwrap(), Some(9));

        let err = db
            .apply_imported_entity("Person", &EntityData::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameters { .. }));
    }

    #[test]
    fn get_respects_order_and_limit() {
        let db = open_db();
        let mut guids = Vec::new();
        for age in [30i64, 40, 50] {
            let entity = db.new_entity("Person").unwrap();
            entity.set_attr("age", age).unwrap();
            db.save(&entity).unwrap();
            guids.push(entity.guid().unwrap());
        }
        let first = db.get(&FindOptions::new("Person"), &[]).unwrap().unwrap();
        assert_eq!(first.guid(), Some(guids[0]));
    }
}
