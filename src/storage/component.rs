use std::{
    any::{self, Any},
    fmt,
};

use crate::{
    cell::{AtomicRef, AtomicRefCell, AtomicRefMut},
    component::Component,
    entity::Entity,
    error::RetrievalError,
    id::{ComponentId, TypeIdMap},
    storage::{
        entity_set::EntitySet,
        tick_set::{Tick, TickSet, Ticks},
    },
    utils,
};

/// Dense storage of every `T` in the registry.
///
/// `entities`, `data` and `ticks` are index-aligned: slot `i` holds the value
/// owned by `entities.get(i)` and its tick pair. Removal swaps the last slot
/// into the hole, so order is not preserved.
pub struct ComponentSet<T: Component> {
    entities: EntitySet,
    data: Vec<T>,
    ticks: TickSet,
}

impl<T: Component> ComponentSet<T> {
    pub fn new() -> Self {
        Self {
            entities: EntitySet::new(),
            data: Vec::new(),
            ticks: TickSet::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entities: EntitySet::with_capacity(capacity),
            data: Vec::with_capacity(capacity),
            ticks: TickSet::with_capacity(capacity),
        }
    }

    /// Stores `value` for `entity`, stamping it added and changed at `tick`.
    ///
    /// # Panics
    /// If the entity already holds a `T`.
    pub fn add(&mut self, entity: Entity, tick: Tick, value: T) {
        if self.entities.contain_id(entity.id()) {
            panic!(
                "Entity {} already contained component of type {}",
                entity,
                any::type_name::<T>(),
            );
        }

        self.entities.add(entity);
        self.data.push(value);
        self.ticks.push(tick);
    }

    /// # Panics
    /// If the entity does not hold a `T`.
    pub fn remove(&mut self, entity: Entity) -> T {
        self.try_remove(entity).unwrap_or_else(|| self.missing(entity))
    }

    pub fn try_remove(&mut self, entity: Entity) -> Option<T> {
        if !self.entities.contain(entity) {
            return None;
        }

        let index = self.entities.remove(entity);
        self.ticks.swap_remove(index);
        Some(self.data.swap_remove(index))
    }

    /// Swaps in a new value and stamps it changed at `tick`; the added tick
    /// is left alone. Returns the old value.
    ///
    /// # Panics
    /// If the entity does not hold a `T`.
    pub fn replace(&mut self, entity: Entity, tick: Tick, value: T) -> T {
        let index = self.index(entity);
        self.ticks.set_changed(index, tick);
        std::mem::replace(&mut self.data[index], value)
    }

    /// # Panics
    /// If the entity does not hold a `T`.
    pub fn get(&self, entity: Entity) -> &T {
        &self.data[self.index(entity)]
    }

    pub fn try_get(&self, entity: Entity) -> Option<&T> {
        self.entities
            .try_index(entity)
            .map(|index| &self.data[index])
    }

    /// Direct mutable access. Does not touch the changed tick.
    ///
    /// # Panics
    /// If the entity does not hold a `T`.
    pub fn get_mut(&mut self, entity: Entity) -> &mut T {
        let index = self.index(entity);
        &mut self.data[index]
    }

    pub fn try_get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        match self.entities.try_index(entity) {
            Some(index) => Some(&mut self.data[index]),
            None => None,
        }
    }

    /// Mutable access to the value, its added tick and its changed tick.
    pub fn get_with_ticks_mut(&mut self, entity: Entity) -> Option<(&mut T, Tick, &mut Tick)> {
        let index = self.entities.try_index(entity)?;
        let (added, changed) = self.ticks.columns_mut();
        Some((&mut self.data[index], added[index], &mut changed[index]))
    }

    pub fn ticks(&self, entity: Entity) -> Ticks {
        self.ticks.get(self.index(entity))
    }

    pub fn is_added(&self, entity: Entity, since: Tick) -> bool {
        self.ticks.is_added(self.index(entity), since)
    }

    pub fn is_changed(&self, entity: Entity, since: Tick) -> bool {
        self.ticks.is_changed(self.index(entity), since)
    }

    pub fn changed_tick_mut(&mut self, entity: Entity) -> &mut Tick {
        let index = self.index(entity);
        self.ticks.changed_mut(index)
    }

    #[inline]
    pub fn contain(&self, entity: Entity) -> bool {
        self.entities.contain(entity)
    }

    #[inline]
    pub fn index(&self, entity: Entity) -> usize {
        self.entities
            .try_index(entity)
            .unwrap_or_else(|| self.missing(entity))
    }

    pub fn entities(&self) -> &EntitySet {
        &self.entities
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &'_ T)> {
        self.entities.iter().zip(self.data.iter())
    }

    #[inline]
    pub fn len(&self) -> usize {
        let len = self.data.len();
        debug_assert_eq!(
            self.entities.len(),
            len,
            "Entity & Component Vec lengths do not match."
        );

        len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every value and releases the backing memory, including any
    /// spare capacity.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.data = Vec::new();
        self.ticks.reset();
    }

    /// Raw base pointers of the value, added-tick and changed-tick columns,
    /// for views that hand out disjoint `&mut` into distinct slots.
    pub(crate) fn raw_columns(&mut self) -> (*mut T, *const Tick, *mut Tick) {
        let (added, changed) = self.ticks.columns_mut();
        (self.data.as_mut_ptr(), added.as_ptr(), changed.as_mut_ptr())
    }

    fn missing(&self, entity: Entity) -> ! {
        panic!(
            "Entity {} does not contain component of type {}",
            entity,
            any::type_name::<T>(),
        )
    }
}

impl<T: Component> Default for ComponentSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> fmt::Debug for ComponentSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSet")
            .field("type", &any::type_name::<T>())
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

/// The type-independent face of a [`ComponentSet`].
pub trait ErasedComponentSet: Any + Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn entities(&self) -> &EntitySet;
    fn contain(&self, entity: Entity) -> bool;
    /// Drops the entity's value if present.
    fn remove_entity(&mut self, entity: Entity) -> bool;
    fn ticks(&self, entity: Entity) -> Option<Ticks>;
    fn clear(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedComponentSet for ComponentSet<T> {
    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn len(&self) -> usize {
        ComponentSet::len(self)
    }

    fn entities(&self) -> &EntitySet {
        &self.entities
    }

    fn contain(&self, entity: Entity) -> bool {
        ComponentSet::contain(self, entity)
    }

    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.try_remove(entity).is_some()
    }

    fn ticks(&self, entity: Entity) -> Option<Ticks> {
        self.entities
            .try_index(entity)
            .map(|index| self.ticks.get(index))
    }

    fn clear(&mut self) {
        ComponentSet::clear(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type ErasedSetCell = AtomicRefCell<Box<dyn ErasedComponentSet>>;

/// One [`ComponentSet`] per component type, indexed by component id, plus a
/// per-type log of entities that lost that component since the log was last
/// cleared.
#[derive(Debug, Default)]
pub struct ComponentStorage {
    ids: TypeIdMap,
    sets: Vec<Option<ErasedSetCell>>,
    removed: Vec<Vec<Entity>>,
}

impl ComponentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: TypeIdMap::with_capacity(capacity),
            sets: Vec::with_capacity(capacity),
            removed: Vec::with_capacity(capacity),
        }
    }

    /// The id of `T`, assigned on first use.
    pub fn id_of<T: Component>(&self) -> ComponentId {
        self.ids.id_of::<T>()
    }

    pub fn get_id<T: Component>(&self) -> Option<ComponentId> {
        self.ids.get::<T>()
    }

    pub fn type_name(&self, id: ComponentId) -> Option<&'static str> {
        self.ids.name(id)
    }

    /// Creates the set for `T` if this is the first time it is stored.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let id = self.ids.id_of::<T>();
        if id >= self.sets.len() {
            self.sets.resize_with(id + 1, || None);
            self.removed.resize_with(id + 1, Vec::new);
        }

        if self.sets[id].is_none() {
            let set: Box<dyn ErasedComponentSet> = Box::new(ComponentSet::<T>::new());
            self.sets[id] = Some(AtomicRefCell::new(set));
        }

        id
    }

    pub fn contains_set(&self, id: ComponentId) -> bool {
        matches!(self.sets.get(id), Some(Some(_)))
    }

    fn cell(&self, id: ComponentId) -> Option<&ErasedSetCell> {
        self.sets.get(id).and_then(Option::as_ref)
    }

    /// Borrows the set of `T`. Returns `None` if no `T` was ever stored.
    ///
    /// # Panics
    /// If the set is currently borrowed mutably.
    pub fn set<T: Component>(&self) -> Option<AtomicRef<'_, ComponentSet<T>>> {
        let cell = self.cell(self.get_id::<T>()?)?;
        Some(AtomicRef::map(cell.borrow(), downcast_ref::<T>))
    }

    /// Mutably borrows the set of `T`. Returns `None` if no `T` was ever
    /// stored.
    ///
    /// # Panics
    /// If the set is currently borrowed.
    pub fn set_mut<T: Component>(&self) -> Option<AtomicRefMut<'_, ComponentSet<T>>> {
        let cell = self.cell(self.get_id::<T>()?)?;
        Some(AtomicRefMut::map(cell.borrow_mut(), downcast_mut::<T>))
    }

    /// Like [`set`](Self::set), but reports a conflicting borrow instead of
    /// panicking.
    pub fn try_set<T: Component>(
        &self,
    ) -> Result<Option<AtomicRef<'_, ComponentSet<T>>>, RetrievalError> {
        let cell = match self.get_id::<T>().and_then(|id| self.cell(id)) {
            Some(cell) => cell,
            None => return Ok(None),
        };

        cell.try_borrow()
            .map(|set| Some(AtomicRef::map(set, downcast_ref::<T>)))
            .ok_or(RetrievalError::ComponentInUse(any::type_name::<T>()))
    }

    /// Like [`set_mut`](Self::set_mut), but reports a conflicting borrow
    /// instead of panicking.
    pub fn try_set_mut<T: Component>(
        &self,
    ) -> Result<Option<AtomicRefMut<'_, ComponentSet<T>>>, RetrievalError> {
        let cell = match self.get_id::<T>().and_then(|id| self.cell(id)) {
            Some(cell) => cell,
            None => return Ok(None),
        };

        cell.try_borrow_mut()
            .map(|set| Some(AtomicRefMut::map(set, downcast_mut::<T>)))
            .ok_or(RetrievalError::ComponentInUse(any::type_name::<T>()))
    }

    /// Exclusive access to the set of `T`, creating it if needed.
    pub fn set_exclusive<T: Component>(&mut self) -> &mut ComponentSet<T> {
        let id = self.register::<T>();
        match self.sets[id].as_mut() {
            Some(cell) => downcast_mut::<T>(cell.get_mut()),
            None => unsafe {
                utils::debug_unreachable("Component set could not be retrieved after it was registered.")
            },
        }
    }

    /// Borrows the type-erased set with the given id.
    pub fn erased(&self, id: ComponentId) -> Option<AtomicRef<'_, dyn ErasedComponentSet>> {
        self.cell(id)
            .map(|cell| AtomicRef::map(cell.borrow(), erase))
    }

    /// Like [`erased`](Self::erased), but reports a conflicting borrow
    /// instead of panicking.
    pub fn try_erased(
        &self,
        id: ComponentId,
    ) -> Result<Option<AtomicRef<'_, dyn ErasedComponentSet>>, RetrievalError> {
        match self.cell(id) {
            Some(cell) => cell
                .try_borrow()
                .map(|set| Some(AtomicRef::map(set, erase)))
                .ok_or_else(|| RetrievalError::ComponentInUse(self.ids.name(id).unwrap_or("?"))),
            None => Ok(None),
        }
    }

    /// Number of entities holding the component, zero if it was never stored.
    pub fn len_of(&self, id: ComponentId) -> usize {
        self.erased(id).map_or(0, |set| set.len())
    }

    pub fn add<T: Component>(&mut self, entity: Entity, tick: Tick, value: T) {
        self.set_exclusive::<T>().add(entity, tick, value);
    }

    /// Removes `T` from the entity and logs the removal. Returns `None`,
    /// without logging, if the entity did not hold one.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let id = self.get_id::<T>()?;
        let value = self.set_exclusive::<T>().try_remove(entity)?;
        self.removed[id].push(entity);
        Some(value)
    }

    /// Removes every listed component the entity holds and logs each removal.
    /// Returns how many were removed.
    pub fn remove_ids(&mut self, entity: Entity, ids: &[ComponentId]) -> usize {
        let mut count = 0;
        for &id in ids {
            let removed = match self.sets.get_mut(id) {
                Some(Some(cell)) => cell.get_mut().remove_entity(entity),
                _ => false,
            };

            if removed {
                self.removed[id].push(entity);
                count += 1;
            }
        }

        count
    }

    /// Removes every component the entity holds, probing each set.
    pub fn remove_all(&mut self, entity: Entity) -> usize {
        let mut count = 0;
        for (id, slot) in self.sets.iter_mut().enumerate() {
            if let Some(cell) = slot {
                if cell.get_mut().remove_entity(entity) {
                    self.removed[id].push(entity);
                    count += 1;
                }
            }
        }

        count
    }

    /// # Panics
    /// If the entity does not hold a `T`.
    pub fn replace<T: Component>(&mut self, entity: Entity, tick: Tick, value: T) -> T {
        self.set_exclusive::<T>().replace(entity, tick, value)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<AtomicRef<'_, T>> {
        let set = self.set::<T>()?;
        if !set.contain(entity) {
            return None;
        }

        Some(AtomicRef::map(set, |set| set.get(entity)))
    }

    pub fn contain(&self, entity: Entity, id: ComponentId) -> bool {
        self.erased(id).map_or(false, |set| set.contain(entity))
    }

    /// True if the entity holds every listed component.
    pub fn contain_all(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        ids.iter().all(|&id| self.contain(entity, id))
    }

    /// True if the entity holds none of the listed components.
    pub fn contain_none(&self, entity: Entity, ids: &[ComponentId]) -> bool {
        !ids.iter().any(|&id| self.contain(entity, id))
    }

    pub fn is_added(&self, entity: Entity, id: ComponentId, since: Tick) -> bool {
        self.erased(id)
            .and_then(|set| set.ticks(entity))
            .map_or(false, |ticks| ticks.is_added(since))
    }

    pub fn is_changed(&self, entity: Entity, id: ComponentId, since: Tick) -> bool {
        self.erased(id)
            .and_then(|set| set.ticks(entity))
            .map_or(false, |ticks| ticks.is_changed(since))
    }

    /// Entities that lost a `T` since the logs were last cleared.
    pub fn removed<T: Component>(&self) -> &[Entity] {
        self.get_id::<T>()
            .map_or(&[][..], |id| self.removed_by_id(id))
    }

    pub fn removed_by_id(&self, id: ComponentId) -> &[Entity] {
        self.removed.get(id).map_or(&[][..], Vec::as_slice)
    }

    pub fn removed_mut<T: Component>(&mut self) -> &mut Vec<Entity> {
        let id = self.register::<T>();
        &mut self.removed[id]
    }

    /// Empties every removal log, keeping their allocations.
    pub fn clear_removed(&mut self) {
        self.removed.iter_mut().for_each(Vec::clear);
    }

    /// Drops every stored component and empties the removal logs. Component
    /// ids stay assigned.
    pub fn clear(&mut self) {
        for cell in self.sets.iter_mut().flatten() {
            cell.get_mut().clear();
        }
        self.clear_removed();
    }

    /// Number of component types that have a set.
    pub fn type_count(&self) -> usize {
        self.sets.iter().filter(|slot| slot.is_some()).count()
    }
}

#[allow(clippy::borrowed_box)]
fn erase(set: &Box<dyn ErasedComponentSet>) -> &dyn ErasedComponentSet {
    &**set
}

#[allow(clippy::borrowed_box)]
fn downcast_ref<T: Component>(set: &Box<dyn ErasedComponentSet>) -> &ComponentSet<T> {
    (**set)
        .as_any()
        .downcast_ref::<ComponentSet<T>>()
        .unwrap_or_else(|| unsafe {
            utils::debug_unreachable("Component id was assigned to a different type.")
        })
}

#[allow(clippy::borrowed_box)]
fn downcast_mut<T: Component>(set: &mut Box<dyn ErasedComponentSet>) -> &mut ComponentSet<T> {
    (**set)
        .as_any_mut()
        .downcast_mut::<ComponentSet<T>>()
        .unwrap_or_else(|| unsafe {
            utils::debug_unreachable("Component id was assigned to a different type.")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Name(String);
    impl Component for Name {}

    #[derive(Debug, PartialEq)]
    struct Health(u32);
    impl Component for Health {}

    fn e(id: u32) -> Entity {
        Entity::new(id, 0)
    }

    #[test]
    fn add_stamps_both_ticks() {
        let mut set = ComponentSet::new();
        set.add(e(0), 4, Health(10));

        assert!(set.is_added(e(0), 4));
        assert!(set.is_added(e(0), 3));
        assert!(!set.is_added(e(0), 5));
        assert!(set.is_changed(e(0), 4));
    }

    #[test]
    fn replace_only_bumps_changed() {
        let mut set = ComponentSet::new();
        set.add(e(0), 4, Health(10));

        let old = set.replace(e(0), 9, Health(3));

        assert_eq!(old, Health(10));
        assert_eq!(set.get(e(0)), &Health(3));
        assert!(set.is_added(e(0), 4));
        assert!(!set.is_added(e(0), 5));
        assert!(set.is_changed(e(0), 9));
        assert!(!set.is_changed(e(0), 10));
    }

    #[test]
    fn remove_swaps_last_slot_in() {
        let mut set = ComponentSet::new();
        set.add(e(0), 1, Name("a".into()));
        set.add(e(1), 2, Name("b".into()));
        set.add(e(2), 3, Name("c".into()));

        assert_eq!(set.remove(e(0)), Name("a".into()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(e(2)), &Name("c".into()));
        assert_eq!(set.ticks(e(2)), Ticks::new(3));
        assert_eq!(set.get(e(1)), &Name("b".into()));
        assert!(set.try_get(e(0)).is_none());
    }

    #[test]
    fn stale_handle_is_not_contained() {
        let mut set = ComponentSet::new();
        set.add(Entity::new(0, 1), 1, Health(1));

        assert!(!set.contain(Entity::new(0, 0)));
        assert!(set.try_remove(Entity::new(0, 0)).is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn clear_releases_memory() {
        let mut set = ComponentSet::with_capacity(16);
        set.add(e(0), 1, Name("x".into()));
        set.clear();

        assert!(set.is_empty());
        assert_eq!(set.data.capacity(), 0);
    }

    #[test]
    #[should_panic(expected = "already contained component")]
    fn double_add_panics() {
        let mut set = ComponentSet::new();
        set.add(e(0), 1, Health(1));
        set.add(e(0), 1, Health(2));
    }

    #[test]
    #[should_panic(expected = "does not contain component")]
    fn replacing_missing_panics() {
        let mut set = ComponentSet::<Health>::new();
        set.replace(e(0), 1, Health(2));
    }

    #[test]
    fn storage_creates_sets_lazily() {
        let mut storage = ComponentStorage::new();
        assert!(storage.set::<Health>().is_none());

        storage.add(e(0), 1, Health(5));
        let id = storage.get_id::<Health>().unwrap();

        assert_eq!(storage.len_of(id), 1);
        assert_eq!(*storage.get::<Health>(e(0)).unwrap(), Health(5));
        assert!(storage.contain(e(0), id));
        assert_eq!(storage.type_count(), 1);
    }

    #[test]
    fn erased_tick_tests() {
        let mut storage = ComponentStorage::new();
        storage.add(e(0), 2, Health(5));
        storage.replace(e(0), 6, Health(4));
        let id = storage.id_of::<Health>();

        assert!(storage.is_added(e(0), id, 2));
        assert!(!storage.is_added(e(0), id, 3));
        assert!(storage.is_changed(e(0), id, 6));
        assert!(!storage.is_changed(e(1), id, 0));
    }

    #[test]
    fn conjunction_and_disjunction() {
        let mut storage = ComponentStorage::new();
        storage.add(e(0), 1, Health(5));
        storage.add(e(0), 1, Name("n".into()));
        storage.add(e(1), 1, Health(1));
        let health = storage.id_of::<Health>();
        let name = storage.id_of::<Name>();

        assert!(storage.contain_all(e(0), &[health, name]));
        assert!(!storage.contain_all(e(1), &[health, name]));
        assert!(storage.contain_none(e(1), &[name]));
        assert!(!storage.contain_none(e(0), &[name]));
    }

    #[test]
    fn removal_log_lifecycle() {
        let mut storage = ComponentStorage::new();
        storage.add(e(0), 1, Health(5));
        storage.add(e(1), 1, Health(6));

        assert_eq!(storage.remove::<Health>(e(0)), Some(Health(5)));
        assert_eq!(storage.remove::<Health>(e(0)), None);
        assert_eq!(storage.removed::<Health>(), &[e(0)]);

        let id = storage.id_of::<Health>();
        storage.remove_ids(e(1), &[id]);
        assert_eq!(storage.removed::<Health>(), &[e(0), e(1)]);

        storage.clear_removed();
        assert!(storage.removed::<Health>().is_empty());
        assert!(storage.removed::<Name>().is_empty());
    }

    #[test]
    fn remove_all_checks_every_set() {
        let mut storage = ComponentStorage::new();
        storage.add(e(3), 1, Health(5));
        storage.add(e(3), 1, Name("n".into()));

        assert_eq!(storage.remove_all(e(3)), 2);
        assert_eq!(storage.removed::<Name>(), &[e(3)]);
        assert_eq!(storage.remove_all(e(3)), 0);
    }

    #[test]
    fn write_view_excludes_readers() {
        let mut storage = ComponentStorage::new();
        storage.add(e(0), 1, Health(5));

        let mut set = storage.set_mut::<Health>().unwrap();
        set.get_mut(e(0)).0 = 7;
        let id = storage.id_of::<Health>();
        assert!(std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            storage.len_of(id)
        }))
        .is_err());
        drop(set);

        assert_eq!(storage.get::<Health>(e(0)).unwrap().0, 7);
    }
}
