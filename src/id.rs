//! Runtime type → dense id assignment.
//!
//! Each storage owns one [`TypeIdMap`]. Ids start at zero, are handed out in
//! first-use order and never change for the lifetime of the map, so they can
//! index plain `Vec`s.

use std::{
    any::{self, TypeId},
    collections::HashMap,
};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

pub type ComponentId = usize;
pub type ResourceId = usize;
pub type EventId = usize;
pub type StageId = usize;

#[derive(Debug, Default)]
pub struct TypeIdMap {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashMap<TypeId, usize>,
    names: Vec<&'static str>,
}

impl TypeIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                ids: HashMap::with_capacity(capacity),
                names: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Returns the id of `T`, assigning the next free one on first use.
    pub fn id_of<T: ?Sized + 'static>(&self) -> usize {
        let type_id = TypeId::of::<T>();
        let inner = self.inner.upgradable_read();

        if let Some(&id) = inner.ids.get(&type_id) {
            return id;
        }

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        let id = inner.names.len();
        inner.ids.insert(type_id, id);
        inner.names.push(any::type_name::<T>());
        id
    }

    /// Returns the id of `T` only if it was already assigned.
    pub fn get<T: ?Sized + 'static>(&self) -> Option<usize> {
        self.inner.read().ids.get(&TypeId::of::<T>()).copied()
    }

    pub fn name(&self, id: usize) -> Option<&'static str> {
        self.inner.read().names.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every assignment. Only sound to call when nothing indexed by
    /// the old ids survives.
    pub fn reset(&mut self) {
        let inner = self.inner.get_mut();
        inner.ids.clear();
        inner.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;

    #[test]
    fn ids_are_dense_and_stable() {
        let map = TypeIdMap::new();

        assert_eq!(map.get::<A>(), None);
        assert_eq!(map.id_of::<B>(), 0);
        assert_eq!(map.id_of::<A>(), 1);
        assert_eq!(map.id_of::<B>(), 0);
        assert_eq!(map.get::<A>(), Some(1));
        assert_eq!(map.len(), 2);
        assert!(map.name(1).unwrap().ends_with("A"));
    }

    #[test]
    fn separate_maps_are_independent() {
        let components = TypeIdMap::new();
        let resources = TypeIdMap::new();

        components.id_of::<A>();
        assert_eq!(resources.id_of::<B>(), 0);
        assert_eq!(components.id_of::<B>(), 1);
    }

    #[test]
    fn reset_starts_over() {
        let mut map = TypeIdMap::new();
        map.id_of::<A>();
        map.reset();

        assert!(map.is_empty());
        assert_eq!(map.id_of::<B>(), 0);
    }
}
