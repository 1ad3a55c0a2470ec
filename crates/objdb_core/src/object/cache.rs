//! Per-transaction object identity cache.

use crate::object::{AnyObject, WeakObject};
use crate::types::Oid;
use std::collections::HashMap;
use tracing::debug;

/// Lifecycle state of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectState {
    /// Loaded and unchanged since.
    Read,
    /// Must be written before commit.
    Dirty,
    /// Row erased in this transaction; never written again.
    Deleted,
}

/// Transaction-local bookkeeping for one live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObjectMetadata {
    pub id: Oid,
    pub state: ObjectState,
}

impl ObjectMetadata {
    pub(crate) const fn new(id: Oid, state: ObjectState) -> Self {
        Self { id, state }
    }
}

#[derive(Debug)]
enum Representation {
    /// Strong handles; used while few objects are tracked.
    Small {
        by_oid: HashMap<Oid, AnyObject>,
        by_identity: HashMap<usize, (AnyObject, ObjectMetadata)>,
    },
    /// Weak handles; the application owns the instances.
    Large {
        by_oid: HashMap<Oid, WeakObject>,
        by_identity: HashMap<usize, (WeakObject, ObjectMetadata)>,
        compact_mark: usize,
    },
}

/// Bidirectional map between live instances and oids.
///
/// Identity is the instance's allocation address. The map keeps a handle
/// beside every address key (strong while small, weak once large), so an
/// address can never be reused by another instance while it is a key.
#[derive(Debug)]
pub(crate) struct ObjectCache {
    repr: Representation,
    threshold: usize,
}

impl ObjectCache {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            repr: Representation::Small {
                by_oid: HashMap::new(),
                by_identity: HashMap::new(),
            },
            threshold,
        }
    }

    /// Returns the live instance stored under `oid`.
    pub(crate) fn lookup_by_oid(&self, oid: Oid) -> Option<AnyObject> {
        match &self.repr {
            Representation::Small { by_oid, .. } => by_oid.get(&oid).cloned(),
            Representation::Large { by_oid, .. } => by_oid.get(&oid).and_then(WeakObject::upgrade),
        }
    }

    pub(crate) fn metadata(&self, obj: &AnyObject) -> Option<ObjectMetadata> {
        let key = obj.identity();
        match &self.repr {
            Representation::Small { by_identity, .. } => by_identity.get(&key).map(|(_, m)| *m),
            Representation::Large { by_identity, .. } => by_identity.get(&key).map(|(_, m)| *m),
        }
    }

    pub(crate) fn metadata_mut(&mut self, obj: &AnyObject) -> Option<&mut ObjectMetadata> {
        let key = obj.identity();
        match &mut self.repr {
            Representation::Small { by_identity, .. } => by_identity.get_mut(&key).map(|(_, m)| m),
            Representation::Large { by_identity, .. } => by_identity.get_mut(&key).map(|(_, m)| m),
        }
    }

    /// Tracks `obj`. A non-zero id also makes it reachable by oid.
    pub(crate) fn insert(&mut self, obj: &AnyObject, metadata: ObjectMetadata) {
        let key = obj.identity();
        match &mut self.repr {
            Representation::Small {
                by_oid,
                by_identity,
            } => {
                if !metadata.id.is_none() {
                    by_oid.insert(metadata.id, obj.clone());
                }
                by_identity.insert(key, (obj.clone(), metadata));
                if by_identity.len() > self.threshold {
                    self.upgrade();
                }
            }
            Representation::Large {
                by_oid,
                by_identity,
                ..
            } => {
                if !metadata.id.is_none() {
                    by_oid.insert(metadata.id, obj.downgrade());
                }
                by_identity.insert(key, (obj.downgrade(), metadata));
                self.compact_if_needed();
            }
        }
    }

    /// Gives a tracked object its storage id.
    pub(crate) fn assign_oid(&mut self, obj: &AnyObject, oid: Oid) {
        if let Some(metadata) = self.metadata_mut(obj) {
            metadata.id = oid;
        }
        match &mut self.repr {
            Representation::Small { by_oid, .. } => {
                by_oid.insert(oid, obj.clone());
            }
            Representation::Large { by_oid, .. } => {
                by_oid.insert(oid, obj.downgrade());
                self.compact_if_needed();
            }
        }
    }

    /// Stops resolving `oid`; the identity entry keeps its metadata.
    pub(crate) fn remove_oid(&mut self, oid: Oid) {
        match &mut self.repr {
            Representation::Small { by_oid, .. } => {
                by_oid.remove(&oid);
            }
            Representation::Large { by_oid, .. } => {
                by_oid.remove(&oid);
            }
        }
    }

    /// Forgets an instance entirely, used when its load failed.
    pub(crate) fn forget(&mut self, obj: &AnyObject) {
        let key = obj.identity();
        let removed = match &mut self.repr {
            Representation::Small { by_identity, .. } => by_identity.remove(&key).map(|(_, m)| m),
            Representation::Large { by_identity, .. } => by_identity.remove(&key).map(|(_, m)| m),
        };
        if let Some(metadata) = removed {
            if !metadata.id.is_none() {
                self.remove_oid(metadata.id);
            }
        }
    }

    #[cfg(test)]
    fn is_large(&self) -> bool {
        matches!(self.repr, Representation::Large { .. })
    }

    /// Number of tracked instances, including collected ones not yet compacted.
    #[cfg(test)]
    fn len(&self) -> usize {
        match &self.repr {
            Representation::Small { by_identity, .. } => by_identity.len(),
            Representation::Large { by_identity, .. } => by_identity.len(),
        }
    }

    fn upgrade(&mut self) {
        let Representation::Small {
            by_oid,
            by_identity,
        } = &mut self.repr
        else {
            return;
        };
        let by_oid: HashMap<_, _> = by_oid
            .drain()
            .map(|(oid, obj)| (oid, obj.downgrade()))
            .collect();
        let by_identity: HashMap<_, _> = by_identity
            .drain()
            .map(|(key, (obj, metadata))| (key, (obj.downgrade(), metadata)))
            .collect();
        debug!(tracked = by_identity.len(), "object cache switched to weak handles");
        let compact_mark = (tracked(&by_oid, &by_identity) * 2).max(self.threshold);
        self.repr = Representation::Large {
            by_oid,
            by_identity,
            compact_mark,
        };
    }

    fn compact_if_needed(&mut self) {
        if let Representation::Large {
            by_oid,
            by_identity,
            compact_mark,
        } = &self.repr
        {
            if tracked(by_oid, by_identity) >= *compact_mark {
                self.compact();
            }
        }
    }

    /// Drops entries whose instances were released by the application.
    fn compact(&mut self) {
        let threshold = self.threshold;
        if let Representation::Large {
            by_oid,
            by_identity,
            compact_mark,
        } = &mut self.repr
        {
            let before = tracked(&*by_oid, &*by_identity);
            by_oid.retain(|_, weak| !weak.is_dead());
            by_identity.retain(|_, (weak, _)| !weak.is_dead());
            let live = tracked(&*by_oid, &*by_identity);
            *compact_mark = (live * 2).max(threshold);
            debug!(removed = before - live, live, "object cache compacted");
        }
    }
}

/// Entries held by the larger of the two maps; instances without an oid
/// only appear in `by_identity`.
fn tracked<O, I>(by_oid: &HashMap<Oid, O>, by_identity: &HashMap<usize, I>) -> usize {
    by_oid.len().max(by_identity.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(id: u64) -> ObjectMetadata {
        ObjectMetadata::new(Oid::new(id), ObjectState::Read)
    }

    #[test]
    fn lookup_uses_reference_identity() {
        let mut cache = ObjectCache::new(30);
        let a = AnyObject::new(String::from("same"));
        let b = AnyObject::new(String::from("same"));
        cache.insert(&a, read(1));

        assert!(AnyObject::ptr_eq(&cache.lookup_by_oid(Oid::new(1)).unwrap(), &a));
        assert_eq!(cache.metadata(&a), Some(read(1)));
        assert_eq!(cache.metadata(&b), None);
    }

    #[test]
    fn crossing_threshold_keeps_every_mapping() {
        let mut cache = ObjectCache::new(30);
        let objects: Vec<AnyObject> = (0..31).map(AnyObject::new).collect();
        for (i, obj) in objects.iter().enumerate() {
            assert!(!cache.is_large());
            cache.insert(obj, read(i as u64 + 1));
        }
        assert!(cache.is_large());
        for (i, obj) in objects.iter().enumerate() {
            let found = cache.lookup_by_oid(Oid::new(i as u64 + 1)).unwrap();
            assert!(AnyObject::ptr_eq(&found, obj));
            assert_eq!(cache.metadata(obj).unwrap().id, Oid::new(i as u64 + 1));
        }
    }

    #[test]
    fn large_cache_drops_released_instances() {
        let mut cache = ObjectCache::new(2);
        let kept: Vec<AnyObject> = (0..3).map(AnyObject::new).collect();
        for (i, obj) in kept.iter().enumerate() {
            cache.insert(obj, read(i as u64 + 1));
        }
        assert!(cache.is_large());

        let released = AnyObject::new(99);
        cache.insert(&released, read(50));
        drop(released);
        assert!(cache.lookup_by_oid(Oid::new(50)).is_none());

        cache.compact();
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup_by_oid(Oid::new(1)).is_some());
    }

    #[test]
    fn assign_and_forget() {
        let mut cache = ObjectCache::new(30);
        let obj = AnyObject::new(1u8);
        cache.insert(&obj, ObjectMetadata::new(Oid::NONE, ObjectState::Dirty));
        assert!(cache.lookup_by_oid(Oid::NONE).is_none());

        cache.assign_oid(&obj, Oid::new(7));
        assert_eq!(cache.metadata(&obj).unwrap().id, Oid::new(7));
        assert!(cache.lookup_by_oid(Oid::new(7)).is_some());

        cache.remove_oid(Oid::new(7));
        assert!(cache.lookup_by_oid(Oid::new(7)).is_none());
        assert!(cache.metadata(&obj).is_some());

        cache.forget(&obj);
        assert!(cache.metadata(&obj).is_none());
    }

    #[test]
    fn released_instances_without_oid_are_compacted() {
        let mut cache = ObjectCache::new(2);
        let kept: Vec<AnyObject> = (0..3).map(AnyObject::new).collect();
        for (i, obj) in kept.iter().enumerate() {
            cache.insert(obj, read(i as u64 + 1));
        }
        assert!(cache.is_large());

        for i in 0..100 {
            let fresh = AnyObject::new(i);
            cache.insert(&fresh, ObjectMetadata::new(Oid::NONE, ObjectState::Dirty));
        }
        assert!(cache.len() <= 8, "{} entries tracked", cache.len());
        for obj in &kept {
            assert!(cache.metadata(obj).is_some());
        }
    }
}
