//! Events are written during one tick and read during the next.
//!
//! Every initialised event type owns a read and a write buffer. Systems
//! append through [`EventWriter`] and consume through [`EventReader`] or
//! [`EventMutator`]; once per `update()` the registry swaps the buffers, so
//! what was written in tick `N` is readable only during tick `N + 1`.

use std::{any, fmt, slice};

use crate::cell::{AtomicRef, AtomicRefMut};

/// Any `Send + Sync + 'static` type can be sent as an event.
pub trait Event: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Event for T {}

/// Shared view of the readable events of one type.
pub struct EventReader<'w, T: Event> {
    events: AtomicRef<'w, Vec<T>>,
}

impl<'w, T: Event> EventReader<'w, T> {
    pub fn new(events: AtomicRef<'w, Vec<T>>) -> Self {
        Self { events }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<'a, T: Event> IntoIterator for &'a EventReader<'_, T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Event> fmt::Debug for EventReader<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReader")
            .field("type", &any::type_name::<T>())
            .field("len", &self.len())
            .finish()
    }
}

/// Exclusive view of the readable events of one type, allowing in-place
/// edits before later readers in the same tick see them.
pub struct EventMutator<'w, T: Event> {
    events: AtomicRefMut<'w, Vec<T>>,
}

impl<'w, T: Event> EventMutator<'w, T> {
    pub fn new(events: AtomicRefMut<'w, Vec<T>>) -> Self {
        Self { events }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.events.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, T> {
        self.events.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<T: Event> fmt::Debug for EventMutator<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMutator")
            .field("type", &any::type_name::<T>())
            .field("len", &self.len())
            .finish()
    }
}

/// Appends events to the write buffer of one type.
pub struct EventWriter<'w, T: Event> {
    events: AtomicRefMut<'w, Vec<T>>,
}

impl<'w, T: Event> EventWriter<'w, T> {
    pub fn new(events: AtomicRefMut<'w, Vec<T>>) -> Self {
        Self { events }
    }

    pub fn send(&mut self, event: T) {
        self.events.push(event);
    }

    pub fn send_batch(&mut self, events: impl IntoIterator<Item = T>) {
        self.events.extend(events);
    }

    /// Events sent this tick, not yet readable.
    pub fn pending(&self) -> usize {
        self.events.len()
    }
}

impl<T: Event> fmt::Debug for EventWriter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWriter")
            .field("type", &any::type_name::<T>())
            .field("pending", &self.pending())
            .finish()
    }
}
