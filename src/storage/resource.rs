use std::{
    any::{self, Any},
    fmt,
    ops::{Deref, DerefMut},
};

use crate::{
    cell::{AtomicRef, AtomicRefCell, AtomicRefMut},
    error::RetrievalError,
    id::{ResourceId, TypeIdMap},
    resource::Resource,
    storage::tick_set::{Tick, Ticks},
    utils,
};

/// A live resource and its tick pair.
pub struct ResourceSlot<T: Resource> {
    value: T,
    ticks: Ticks,
}

impl<T: Resource> ResourceSlot<T> {
    fn new(value: T, tick: Tick) -> Self {
        Self {
            value,
            ticks: Ticks::new(tick),
        }
    }

    pub fn ticks(&self) -> Ticks {
        self.ticks
    }
}

impl<T: Resource> fmt::Debug for ResourceSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSlot")
            .field("type", &any::type_name::<T>())
            .field("ticks", &self.ticks)
            .finish()
    }
}

type ErasedSlot = AtomicRefCell<Box<dyn Any + Send + Sync>>;

/// At most one value per resource type, indexed by resource id.
#[derive(Default)]
pub struct ResourceStorage {
    ids: TypeIdMap,
    slots: Vec<Option<ErasedSlot>>,
}

impl ResourceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: TypeIdMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn id_of<T: Resource>(&self) -> ResourceId {
        self.ids.id_of::<T>()
    }

    fn cell<T: Resource>(&self) -> Option<&ErasedSlot> {
        let id = self.ids.get::<T>()?;
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Stores `value` stamped `added = changed = tick`. Does nothing, and
    /// drops `value`, if a `T` is already present. Returns whether the value
    /// was stored.
    pub fn init<T: Resource>(&mut self, tick: Tick, value: T) -> bool {
        self.init_with(tick, || value)
    }

    /// Like [`init`](Self::init), but only builds the value when no `T` is
    /// present.
    pub fn init_with<T: Resource, F>(&mut self, tick: Tick, f: F) -> bool
    where
        F: FnOnce() -> T,
    {
        let id = self.ids.id_of::<T>();
        if id >= self.slots.len() {
            self.slots.resize_with(id + 1, || None);
        }

        let slot = &mut self.slots[id];
        if slot.is_some() {
            return false;
        }

        let erased: Box<dyn Any + Send + Sync> = Box::new(ResourceSlot::new(f(), tick));
        *slot = Some(AtomicRefCell::new(erased));
        true
    }

    /// Takes the resource out. The id stays reserved.
    pub fn deinit<T: Resource>(&mut self) -> Option<T> {
        let id = self.ids.get::<T>()?;
        let cell = self.slots.get_mut(id)?.take()?;

        match cell.into_inner().downcast::<ResourceSlot<T>>() {
            Ok(slot) => Some(slot.value),
            Err(_) => unsafe {
                utils::debug_unreachable("Resource id was assigned to a different type.")
            },
        }
    }

    pub fn contains<T: Resource>(&self) -> bool {
        self.cell::<T>().is_some()
    }

    pub fn try_slot<T: Resource>(&self) -> Result<AtomicRef<'_, ResourceSlot<T>>, RetrievalError> {
        let cell = self
            .cell::<T>()
            .ok_or(RetrievalError::NoSuchResource(any::type_name::<T>()))?;
        let borrow = cell
            .try_borrow()
            .ok_or(RetrievalError::ResourceInUse(any::type_name::<T>()))?;

        Ok(AtomicRef::map(borrow, downcast_ref::<T>))
    }

    pub fn try_slot_mut<T: Resource>(
        &self,
    ) -> Result<AtomicRefMut<'_, ResourceSlot<T>>, RetrievalError> {
        let cell = self
            .cell::<T>()
            .ok_or(RetrievalError::NoSuchResource(any::type_name::<T>()))?;
        let borrow = cell
            .try_borrow_mut()
            .ok_or(RetrievalError::ResourceInUse(any::type_name::<T>()))?;

        Ok(AtomicRefMut::map(borrow, downcast_mut::<T>))
    }

    /// # Panics
    /// If no `T` is present or it is borrowed mutably.
    pub fn get<T: Resource>(&self) -> AtomicRef<'_, T> {
        let slot = self.try_slot::<T>().unwrap_or_else(|err| panic!("{}", err));
        AtomicRef::map(slot, |slot| &slot.value)
    }

    /// Mutable access without a tick stamp.
    ///
    /// # Panics
    /// If no `T` is present or it is borrowed.
    pub fn get_mut<T: Resource>(&self) -> AtomicRefMut<'_, T> {
        let slot = self.try_slot_mut::<T>().unwrap_or_else(|err| panic!("{}", err));
        AtomicRefMut::map(slot, |slot| &mut slot.value)
    }

    /// Exclusive access, if a `T` is present.
    pub fn get_exclusive<T: Resource>(&mut self) -> Option<&mut T> {
        let id = self.ids.get::<T>()?;
        let cell = self.slots.get_mut(id)?.as_mut()?;
        Some(&mut downcast_mut::<T>(cell.get_mut()).value)
    }

    /// # Panics
    /// If no `T` is present.
    pub fn ticks<T: Resource>(&self) -> Ticks {
        self.try_slot::<T>()
            .unwrap_or_else(|err| panic!("{}", err))
            .ticks
    }

    pub fn is_added<T: Resource>(&self, since: Tick) -> bool {
        self.ticks::<T>().is_added(since)
    }

    pub fn is_changed<T: Resource>(&self, since: Tick) -> bool {
        self.ticks::<T>().is_changed(since)
    }

    /// Stamps `changed = tick` on a present `T`.
    pub fn set_changed<T: Resource>(&mut self, tick: Tick) {
        if let Some(cell) = self
            .ids
            .get::<T>()
            .and_then(|id| self.slots.get_mut(id))
            .and_then(Option::as_mut)
        {
            downcast_mut::<T>(cell.get_mut()).ticks.changed = tick;
        }
    }

    /// Drops every resource.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResourceStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live: Vec<_> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .filter_map(|(id, _)| self.ids.name(id))
            .collect();

        f.debug_struct("ResourceStorage")
            .field("resources", &live)
            .finish()
    }
}

#[allow(clippy::borrowed_box)]
fn downcast_ref<T: Resource>(slot: &Box<dyn Any + Send + Sync>) -> &ResourceSlot<T> {
    (**slot)
        .downcast_ref::<ResourceSlot<T>>()
        .unwrap_or_else(|| unsafe {
            utils::debug_unreachable("Resource id was assigned to a different type.")
        })
}

#[allow(clippy::borrowed_box)]
fn downcast_mut<T: Resource>(slot: &mut Box<dyn Any + Send + Sync>) -> &mut ResourceSlot<T> {
    (**slot)
        .downcast_mut::<ResourceSlot<T>>()
        .unwrap_or_else(|| unsafe {
            utils::debug_unreachable("Resource id was assigned to a different type.")
        })
}

/// Shared view of a resource, as seen by a system that last ran at
/// `last_run`.
pub struct Res<'w, T: Resource> {
    slot: AtomicRef<'w, ResourceSlot<T>>,
    last_run: Tick,
}

impl<'w, T: Resource> Res<'w, T> {
    pub fn new(slot: AtomicRef<'w, ResourceSlot<T>>, last_run: Tick) -> Self {
        Self { slot, last_run }
    }

    pub fn is_added(&self) -> bool {
        self.slot.ticks.is_added(self.last_run)
    }

    pub fn is_changed(&self) -> bool {
        self.slot.ticks.is_changed(self.last_run)
    }

    pub fn ticks(&self) -> Ticks {
        self.slot.ticks
    }
}

impl<T: Resource> Deref for Res<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<T: Resource> fmt::Debug for Res<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Res")
            .field("slot", &*self.slot)
            .field("last_run", &self.last_run)
            .finish()
    }
}

/// Exclusive view of a resource. Mutable access stamps the changed tick
/// with `this_run`.
pub struct ResMut<'w, T: Resource> {
    slot: AtomicRefMut<'w, ResourceSlot<T>>,
    last_run: Tick,
    this_run: Tick,
}

impl<'w, T: Resource> ResMut<'w, T> {
    pub fn new(slot: AtomicRefMut<'w, ResourceSlot<T>>, last_run: Tick, this_run: Tick) -> Self {
        Self {
            slot,
            last_run,
            this_run,
        }
    }

    pub fn is_added(&self) -> bool {
        self.slot.ticks.is_added(self.last_run)
    }

    pub fn is_changed(&self) -> bool {
        self.slot.ticks.is_changed(self.last_run)
    }

    pub fn ticks(&self) -> Ticks {
        self.slot.ticks
    }

    pub fn set_changed(&mut self) {
        self.slot.ticks.changed = self.this_run;
    }

    /// Mutable access that leaves the changed tick alone.
    pub fn bypass_change_detection(&mut self) -> &mut T {
        &mut self.slot.value
    }
}

impl<T: Resource> Deref for ResMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<T: Resource> DerefMut for ResMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.set_changed();
        &mut self.slot.value
    }
}

impl<T: Resource> fmt::Debug for ResMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResMut")
            .field("slot", &*self.slot)
            .field("last_run", &self.last_run)
            .field("this_run", &self.this_run)
            .finish()
    }
}
