use crate::{
    entity::{Entity, EntityId, EntityVersion},
    storage::sparse_set::SparseSet,
};

/// A sparse set keyed by entity id that also remembers the version stored
/// in each slot. A handle whose version differs from the stored one is not
/// contained, even if its id is.
#[derive(Debug, Default)]
pub struct EntitySet {
    ids: SparseSet<EntityId>,
    versions: Vec<EntityVersion>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: SparseSet::with_capacity(capacity),
            versions: Vec::with_capacity(capacity),
        }
    }

    /// # Panics
    /// If the id of `entity` is already present, whatever its version.
    pub fn add(&mut self, entity: Entity) -> usize {
        let index = self.ids.add(entity.id());
        self.versions.push(entity.version());
        index
    }

    /// Removes `entity` and returns the dense index it occupied.
    ///
    /// # Panics
    /// If `entity` is not contained.
    pub fn remove(&mut self, entity: Entity) -> usize {
        assert!(self.contain(entity), "entity {} is not in the set", entity);

        let index = self.ids.remove(entity.id());
        self.versions.swap_remove(index);
        index
    }

    #[inline]
    pub fn contain(&self, entity: Entity) -> bool {
        match self.ids.try_index(entity.id()) {
            Some(index) => self.versions[index] == entity.version(),
            None => false,
        }
    }

    #[inline]
    pub fn contain_id(&self, id: EntityId) -> bool {
        self.ids.contain(id)
    }

    /// # Panics
    /// If the id of `entity` is not present.
    #[inline]
    pub fn index(&self, entity: Entity) -> usize {
        self.ids.index(entity.id())
    }

    #[inline]
    pub fn try_index(&self, entity: Entity) -> Option<usize> {
        self.ids
            .try_index(entity.id())
            .filter(|&index| self.versions[index] == entity.version())
    }

    /// The entity stored at dense position `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Entity {
        Entity::new(self.ids.data()[index], self.versions[index])
    }

    /// Swaps the dense positions of two present ids, versions included.
    pub fn swap(&mut self, a: EntityId, b: EntityId) {
        let ia = self.ids.index(a);
        let ib = self.ids.index(b);

        self.ids.swap(a, b);
        self.versions.swap(ia, ib);
    }

    /// Bumps the version stored for `entity`'s id, so the old handle stops
    /// being contained. Wraps on overflow.
    pub(crate) fn version_next(&mut self, entity: Entity) -> Entity {
        let index = self.ids.index(entity.id());
        let version = &mut self.versions[index];
        *version = version.wrapping_add(1);
        Entity::new(entity.id(), *version)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.versions.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.ids
            .data()
            .iter()
            .zip(self.versions.iter())
            .map(|(&id, &version)| Entity::new(id, version))
    }
}
