//! Process-local entity cache.

use std::collections::HashMap;

use facetdb_codec::Guid;
use tracing::trace;

use crate::entity::EntityData;

/// Count-based entity cache.
///
/// Every pull and push increments the access count of the guid involved;
/// counts are never decremented and survive invalidation. Once a guid's
/// count reaches the threshold, pushes store a deep copy of its data per
/// class. When the number of distinct cached guids would exceed the limit,
/// the cached guid with the lowest access count is evicted first.
///
/// The cache stores plain [`EntityData`], never entity handles, so cached
/// copies carry no hydration state and hits always rebuild fresh awake
/// entities.
#[derive(Debug)]
pub struct EntityCache {
    threshold: u32,
    limit: usize,
    counts: HashMap<Guid, u64>,
    entries: HashMap<Guid, HashMap<String, EntityData>>,
}

impl EntityCache {
    /// Create a cache with a promotion threshold and a capacity in
    /// distinct guids. A limit of zero disables storage; counts are still
    /// tracked.
    #[must_use]
    pub fn new(threshold: u32, limit: usize) -> Self {
        EntityCache {
            threshold,
            limit,
            counts: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Record an access and return the cached data for a guid and class.
    pub fn pull(&mut self, guid: Guid, class: &str) -> Option<EntityData> {
        *self.counts.entry(guid).or_insert(0) += 1;
        self.entries
            .get(&guid)
            .and_then(|per_class| per_class.get(class))
            .cloned()
    }

    /// Record an access and store a copy once the guid is hot enough.
    pub fn push(&mut self, guid: Guid, class: &str, data: &EntityData) {
        let count = self.counts.entry(guid).or_insert(0);
        *count += 1;
        if self.limit == 0 || *count < u64::from(self.threshold) {
            return;
        }
        if !self.entries.contains_key(&guid) && self.entries.len() >= self.limit {
            self.evict_coldest();
        }
        self.entries
            .entry(guid)
            .or_default()
            .insert(class.to_string(), data.clone());
        trace!("cached entity {} for class {}", guid, class);
    }

    /// Drop every cached copy for a guid. Its access count survives.
    pub fn clean(&mut self, guid: Guid) {
        self.entries.remove(&guid);
    }

    /// Number of distinct cached guids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a guid is cached for a class.
    #[must_use]
    pub fn contains(&self, guid: Guid, class: &str) -> bool {
        self.entries
            .get(&guid)
            .is_some_and(|per_class| per_class.contains_key(class))
    }

    fn evict_coldest(&mut self) {
        let coldest = self
            .entries
            .keys()
            .min_by_key(|guid| self.counts.get(guid).copied().unwrap_or(0))
            .copied();
        if let Some(guid) = coldest {
            self.entries.remove(&guid);
            trace!("evicted entity {} from cache", guid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(guid: u64) -> EntityData {
        EntityData {
            guid: Some(Guid::new(guid)),
            cdate: Some(1.0),
            mdate: Some(1.0),
            tags: vec!["t".to_string()],
            attrs: Default::default(),
        }
    }

    #[test]
    fn stores_only_at_threshold() {
        let mut cache = EntityCache::new(3, 10);
        let guid = Guid::new(1);

        cache.push(guid, "person", &data(1));
        cache.push(guid, "person", &data(1));
        assert!(cache.pull(guid, "person").is_none());

        cache.push(guid, "person", &data(1));
        assert!(cache.pull(guid, "person").is_some());
    }

    #[test]
    fn pulls_count_toward_promotion() {
        let mut cache = EntityCache::new(3, 10);
        let guid = Guid::new(1);

        assert!(cache.pull(guid, "person").is_none());
        assert!(cache.pull(guid, "person").is_none());
        // Third access is a push, which reaches the threshold and stores.
        cache.push(guid, "person", &data(1));
        assert!(cache.contains(guid, "person"));
    }

    #[test]
    fn threshold_of_one_stores_immediately() {
        let mut cache = EntityCache::new(1, 10);
        cache.push(Guid::new(1), "person", &data(1));
        assert!(cache.contains(Guid::new(1), "person"));
    }

    #[test]
    fn zero_limit_disables_storage() {
        let mut cache = EntityCache::new(1, 0);
        cache.push(Guid::new(1), "person", &data(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_accessed() {
        let mut cache = EntityCache::new(1, 2);

        // Guid 1 is hot, guid 2 is lukewarm, guid 3 arrives last.
        for _ in 0..5 {
            cache.push(Guid::new(1), "person", &data(1));
        }
        cache.push(Guid::new(2), "person", &data(2));
        assert_eq!(cache.len(), 2);

        cache.push(Guid::new(3), "person", &data(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(Guid::new(1), "person"));
        assert!(!cache.contains(Guid::new(2), "person"));
        assert!(cache.contains(Guid::new(3), "person"));
    }

    #[test]
    fn clean_drops_copies_but_keeps_counts() {
        let mut cache = EntityCache::new(2, 10);
        let guid = Guid::new(1);

        cache.push(guid, "person", &data(1));
        cache.push(guid, "person", &data(1));
        assert!(cache.contains(guid, "person"));

        cache.clean(guid);
        assert!(!cache.contains(guid, "person"));

        // The count survived, so one push re-caches immediately.
        cache.push(guid, "person", &data(1));
        assert!(cache.contains(guid, "person"));
    }

    #[test]
    fn classes_cached_separately() {
        let mut cache = EntityCache::new(1, 10);
        let guid = Guid::new(1);

        cache.push(guid, "person", &data(1));
        assert!(cache.contains(guid, "person"));
        assert!(!cache.contains(guid, "user"));

        cache.push(guid, "user", &data(1));
        assert!(cache.contains(guid, "user"));
    }

    #[test]
    fn pull_returns_deep_copy() {
        let mut cache = EntityCache::new(1, 10);
        let guid = Guid::new(1);
        cache.push(guid, "person", &data(1));

        let mut copy = cache.pull(guid, "person").unwrap();
        copy.tags.push("mutated".to_string());

        let fresh = cache.pull(guid, "person").unwrap();
        assert_eq!(fresh.tags, vec!["t".to_string()]);
    }
}
