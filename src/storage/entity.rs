use crate::{
    entity::{Entity, EntityId},
    id::ComponentId,
    storage::{entity_set::EntitySet, sparse_set::SparseSet},
};

/// Per-entity set of the component ids it carries.
pub type ComponentIdSet = SparseSet<ComponentId, 64>;

/// Generational entity allocator.
///
/// The dense side of `entities` is split in two: `[0, length)` holds the
/// live entities, everything after it holds freed slots whose version was
/// already bumped on despawn and which `emplace` hands out again first.
#[derive(Debug, Default)]
pub struct EntityStorage {
    entities: EntitySet,
    length: usize,
    components: Vec<ComponentIdSet>,
}

impl EntityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entities: EntitySet::with_capacity(capacity),
            length: 0,
            components: Vec::with_capacity(capacity),
        }
    }

    /// Allocates an entity, reusing a freed slot when there is one, and
    /// flags `ids` as carried.
    pub fn emplace(&mut self, ids: &[ComponentId]) -> Entity {
        let entity = if self.length < self.entities.len() {
            self.entities.get(self.length)
        } else {
            let id = self.entities.len();
            assert!(
                id < EntityId::MAX as usize,
                "Entity id space is exhausted"
            );

            let entity = Entity::new(id as EntityId, 0);
            self.entities.add(entity);
            self.components.push(ComponentIdSet::new());
            entity
        };

        self.length += 1;
        self.add(entity, ids);
        entity
    }

    /// Frees a live entity. Its id is reused by a later `emplace`, under a
    /// new version.
    ///
    /// # Panics
    /// If `entity` is not alive.
    pub fn pop(&mut self, entity: Entity) {
        assert!(self.contain(entity), "Entity {} is not alive", entity);

        self.components[entity.id() as usize].clear();

        let last = self.entities.get(self.length - 1);
        self.entities.swap(entity.id(), last.id());
        self.entities.version_next(entity);
        self.length -= 1;
    }

    /// True if `entity` is alive.
    #[inline]
    pub fn contain(&self, entity: Entity) -> bool {
        self.entities
            .try_index(entity)
            .map_or(false, |index| index < self.length)
    }

    /// Flags `ids` as carried. Already flagged ids are skipped.
    pub fn add(&mut self, entity: Entity, ids: &[ComponentId]) {
        let set = &mut self.components[entity.id() as usize];
        for &id in ids {
            if !set.contain(id) {
                set.add(id);
            }
        }
    }

    /// Unflags `ids`. Ids that were not flagged are skipped.
    pub fn remove(&mut self, entity: Entity, ids: &[ComponentId]) {
        let set = &mut self.components[entity.id() as usize];
        for &id in ids {
            if set.contain(id) {
                set.remove(id);
            }
        }
    }

    /// True if the live `entity` carries every id.
    pub fn has(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        self.contain(entity) && {
            let set = &self.components[entity.id() as usize];
            ids.iter().all(|&id| set.contain(id))
        }
    }

    /// True if the live `entity` carries none of the ids.
    pub fn not_has(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        self.contain(entity) && {
            let set = &self.components[entity.id() as usize];
            !ids.iter().any(|&id| set.contain(id))
        }
    }

    /// Ids of every component the entity carries, empty if it is dead.
    pub fn components(&self, entity: Entity) -> &[ComponentId] {
        if self.contain(entity) {
            self.components[entity.id() as usize].data()
        } else {
            &[]
        }
    }

    /// Live entities, in allocation slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.length).map(move |index| self.entities.get(index))
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.entities.len()
    }

    /// Frees every live entity. Versions are bumped as on `pop`, so no old
    /// handle comes back to life.
    pub fn clear(&mut self) {
        for index in 0..self.length {
            let entity = self.entities.get(index);
            self.components[entity.id() as usize].clear();
            self.entities.version_next(entity);
        }

        self.length = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_bumps_the_version() {
        let mut storage = EntityStorage::new();
        let old = storage.emplace(&[]);
        storage.pop(old);

        let new = storage.emplace(&[]);

        assert_eq!(new.id(), old.id());
        assert_ne!(new.version(), old.version());
        assert!(!storage.contain(old));
        assert!(storage.contain(new));
    }

    #[test]
    fn pop_moves_slot_past_the_live_boundary() {
        let mut storage = EntityStorage::new();
        let a = storage.emplace(&[]);
        let b = storage.emplace(&[]);
        let c = storage.emplace(&[]);

        storage.pop(a);

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.capacity(), 3);
        let live: Vec<_> = storage.iter().collect();
        assert!(live.contains(&b) && live.contains(&c));
        assert!(!storage.contain(a));

        // the freed slot is handed out before a new one is appended
        let d = storage.emplace(&[]);
        assert_eq!(d.id(), a.id());
        assert_eq!(storage.capacity(), 3);
    }

    #[test]
    fn membership_queries() {
        let mut storage = EntityStorage::new();
        let e = storage.emplace(&[0, 2]);

        assert!(storage.has(e, &[0, 2]));
        assert!(!storage.has(e, &[0, 1]));
        assert!(storage.not_has(e, &[1, 3]));
        assert!(!storage.not_has(e, &[1, 2]));

        storage.remove(e, &[2, 5]);
        storage.add(e, &[0, 7]);
        assert_eq!(storage.components(e), &[0, 7]);
    }

    #[test]
    fn dead_entities_have_nothing() {
        let mut storage = EntityStorage::new();
        let e = storage.emplace(&[1]);
        storage.pop(e);

        assert!(!storage.has(e, &[]));
        assert!(storage.components(e).is_empty());

        let reused = storage.emplace(&[]);
        assert!(storage.components(reused).is_empty());
    }

    #[test]
    fn clear_invalidates_all_handles() {
        let mut storage = EntityStorage::new();
        let handles: Vec<_> = (0..4).map(|_| storage.emplace(&[0])).collect();

        storage.clear();

        assert!(storage.is_empty());
        assert!(handles.iter().all(|&e| !storage.contain(e)));
        let again = storage.emplace(&[]);
        assert!(!handles.contains(&again));
    }

    #[test]
    #[should_panic(expected = "is not alive")]
    fn double_pop_panics() {
        let mut storage = EntityStorage::new();
        let e = storage.emplace(&[]);
        storage.pop(e);
        storage.pop(e);
    }
}
