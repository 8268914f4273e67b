use std::{
    any::{self, Any},
    fmt, mem,
};

use crate::{
    cell::{AtomicRef, AtomicRefCell, AtomicRefMut},
    error::RetrievalError,
    event::Event,
    id::{EventId, TypeIdMap},
    utils,
};

/// The two buffers of one event type. Writers append to `write`, readers
/// see `read`; [`swap`](Self::swap) promotes one to the other.
pub struct EventBuffer<T: Event> {
    read: AtomicRefCell<Vec<T>>,
    write: AtomicRefCell<Vec<T>>,
}

impl<T: Event> EventBuffer<T> {
    pub fn new() -> Self {
        Self {
            read: AtomicRefCell::new(Vec::new()),
            write: AtomicRefCell::new(Vec::new()),
        }
    }

    /// Drops the unread events, makes the written ones readable and leaves
    /// the write side empty. Both allocations are kept.
    pub fn swap(&mut self) {
        mem::swap(self.read.get_mut(), self.write.get_mut());
        self.write.get_mut().clear();
    }

    pub fn read(&self) -> Option<AtomicRef<'_, Vec<T>>> {
        self.read.try_borrow()
    }

    pub fn read_mut(&self) -> Option<AtomicRefMut<'_, Vec<T>>> {
        self.read.try_borrow_mut()
    }

    pub fn write(&self) -> Option<AtomicRefMut<'_, Vec<T>>> {
        self.write.try_borrow_mut()
    }
}

impl<T: Event> Default for EventBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Event> fmt::Debug for EventBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuffer")
            .field("type", &any::type_name::<T>())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

pub trait ErasedEventBuffer: Any + Send + Sync + fmt::Debug {
    fn swap(&mut self);
    fn clear(&mut self);
    fn pending(&mut self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Event> ErasedEventBuffer for EventBuffer<T> {
    fn swap(&mut self) {
        EventBuffer::swap(self)
    }

    fn clear(&mut self) {
        self.read.get_mut().clear();
        self.write.get_mut().clear();
    }

    fn pending(&mut self) -> usize {
        self.write.get_mut().len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Double-buffered events, one [`EventBuffer`] per initialised type.
#[derive(Debug, Default)]
pub struct EventStorage {
    ids: TypeIdMap,
    buffers: Vec<Option<Box<dyn ErasedEventBuffer>>>,
}

impl EventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_of<T: Event>(&self) -> EventId {
        self.ids.id_of::<T>()
    }

    /// Creates empty buffers for `T`. Returns `false` if they already exist.
    pub fn init<T: Event>(&mut self) -> bool {
        let id = self.ids.id_of::<T>();
        if id >= self.buffers.len() {
            self.buffers.resize_with(id + 1, || None);
        }

        let slot = &mut self.buffers[id];
        if slot.is_some() {
            return false;
        }

        *slot = Some(Box::new(EventBuffer::<T>::new()));
        true
    }

    /// Drops both buffers of `T` and their events. Returns `false` if `T`
    /// was not initialised.
    pub fn deinit<T: Event>(&mut self) -> bool {
        match self.ids.get::<T>().and_then(|id| self.buffers.get_mut(id)) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    pub fn contains<T: Event>(&self) -> bool {
        self.buffer::<T>().is_some()
    }

    pub fn buffer<T: Event>(&self) -> Option<&EventBuffer<T>> {
        let id = self.ids.get::<T>()?;
        let buffer = self.buffers.get(id)?.as_deref()?;

        Some(buffer.as_any().downcast_ref().unwrap_or_else(|| unsafe {
            utils::debug_unreachable("Event id was assigned to a different type.")
        }))
    }

    pub fn buffer_mut<T: Event>(&mut self) -> Option<&mut EventBuffer<T>> {
        let id = self.ids.get::<T>()?;
        let buffer = self.buffers.get_mut(id)?.as_deref_mut()?;

        Some(buffer.as_any_mut().downcast_mut().unwrap_or_else(|| unsafe {
            utils::debug_unreachable("Event id was assigned to a different type.")
        }))
    }

    fn try_buffer<T: Event>(&self) -> Result<&EventBuffer<T>, RetrievalError> {
        self.buffer::<T>()
            .ok_or(RetrievalError::NoSuchEvent(any::type_name::<T>()))
    }

    /// Appends an event to the write buffer. It becomes readable after the
    /// next swap.
    ///
    /// # Panics
    /// If `T` was not initialised.
    pub fn write<T: Event>(&mut self, event: T) {
        match self.buffer_mut::<T>() {
            Some(buffer) => buffer.write.get_mut().push(event),
            None => panic!("{}", RetrievalError::NoSuchEvent(any::type_name::<T>())),
        }
    }

    pub fn try_reader<T: Event>(&self) -> Result<AtomicRef<'_, Vec<T>>, RetrievalError> {
        self.try_buffer::<T>()?
            .read()
            .ok_or(RetrievalError::EventInUse(any::type_name::<T>()))
    }

    pub fn try_mutator<T: Event>(&self) -> Result<AtomicRefMut<'_, Vec<T>>, RetrievalError> {
        self.try_buffer::<T>()?
            .read_mut()
            .ok_or(RetrievalError::EventInUse(any::type_name::<T>()))
    }

    pub fn try_writer<T: Event>(&self) -> Result<AtomicRefMut<'_, Vec<T>>, RetrievalError> {
        self.try_buffer::<T>()?
            .write()
            .ok_or(RetrievalError::EventInUse(any::type_name::<T>()))
    }

    /// Swaps the buffers of `T`, if initialised.
    pub fn swap<T: Event>(&mut self) {
        if let Some(buffer) = self.buffer_mut::<T>() {
            buffer.swap();
        }
    }

    /// Swaps the buffers of every initialised type.
    pub fn swap_all(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.swap();
        }
    }

    /// Drops every buffered event. Initialised types stay initialised.
    pub fn clear(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }

    /// Number of events waiting in write buffers.
    pub fn pending(&mut self) -> usize {
        self.buffers
            .iter_mut()
            .flatten()
            .map(|buffer| buffer.pending())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Hit(u32);

    #[derive(Debug, PartialEq)]
    struct Jump;

    fn read<T: Event + Clone>(storage: &EventStorage) -> Vec<T> {
        storage.try_reader::<T>().unwrap().clone()
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u8);

    #[test]
    fn writes_become_readable_after_swap() {
        let mut storage = EventStorage::new();
        storage.init::<Ping>();
        storage.write(Ping(1));
        storage.write(Ping(2));

        assert!(read::<Ping>(&storage).is_empty());

        storage.swap::<Ping>();
        assert_eq!(read::<Ping>(&storage), vec![Ping(1), Ping(2)]);

        storage.swap::<Ping>();
        assert!(read::<Ping>(&storage).is_empty());
    }

    #[test]
    fn swap_all_touches_every_type() {
        let mut storage = EventStorage::new();
        storage.init::<Hit>();
        storage.init::<Jump>();
        storage.write(Hit(3));
        storage.write(Jump);

        assert_eq!(storage.pending(), 2);
        storage.swap_all();
        assert_eq!(storage.pending(), 0);

        assert_eq!(storage.try_reader::<Hit>().unwrap().as_slice(), &[Hit(3)]);
        assert_eq!(storage.try_reader::<Jump>().unwrap().len(), 1);
    }

    #[test]
    fn mutator_edits_the_read_side() {
        let mut storage = EventStorage::new();
        storage.init::<Hit>();
        storage.write(Hit(1));
        storage.swap_all();

        storage.try_mutator::<Hit>().unwrap()[0].0 = 10;

        assert_eq!(storage.try_reader::<Hit>().unwrap()[0], Hit(10));
    }

    #[test]
    fn init_is_idempotent_and_deinit_drops() {
        let mut storage = EventStorage::new();

        assert!(storage.init::<Hit>());
        assert!(!storage.init::<Hit>());
        storage.write(Hit(1));

        assert!(storage.deinit::<Hit>());
        assert!(!storage.deinit::<Hit>());
        assert!(matches!(
            storage.try_writer::<Hit>(),
            Err(RetrievalError::NoSuchEvent(_))
        ));

        storage.init::<Hit>();
        assert_eq!(storage.pending(), 0);
    }

    #[test]
    #[should_panic(expected = "No event of type")]
    fn writing_uninitialised_type_panics() {
        let mut storage = EventStorage::new();
        storage.write(Jump);
    }
}
