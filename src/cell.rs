//! A `RefCell` whose borrow state is an atomic reader count.
//!
//! Storages hand out views of individual component sets, resources and event
//! buffers through a shared `&Registry`. Every such slot sits in an
//! [`AtomicRefCell`] so that two conflicting views inside the same system
//! (say, two write views of one component type) are caught at runtime instead
//! of aliasing.

use std::{
    any,
    cell::UnsafeCell,
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

const UNUSED: usize = 0;
const WRITER: usize = usize::MAX;

pub struct AtomicRefCell<T: ?Sized> {
    readers: AtomicUsize,
    value: UnsafeCell<T>,
}

impl<T> AtomicRefCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            readers: AtomicUsize::new(UNUSED),
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> AtomicRefCell<T> {
    /// Exclusive access through `&mut self` skips the count.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn borrow(&self) -> AtomicRef<'_, T> {
        self.try_borrow()
            .unwrap_or_else(|| panic!("Cannot read {}: it is being written", any::type_name::<T>()))
    }

    pub fn try_borrow(&self) -> Option<AtomicRef<'_, T>> {
        let mut current = self.readers.load(Ordering::Acquire);

        loop {
            if current == WRITER || current == WRITER - 1 {
                return None;
            }

            match self.readers.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // SAFETY: the count now includes this reader, so no mutable
        // borrow can be created until it is dropped.
        let value = unsafe { &*self.value.get() };

        Some(AtomicRef {
            readers: &self.readers,
            value,
        })
    }

    pub fn borrow_mut(&self) -> AtomicRefMut<'_, T> {
        self.try_borrow_mut()
            .unwrap_or_else(|| panic!("Cannot write {}: it is being read or written", any::type_name::<T>()))
    }

    pub fn try_borrow_mut(&self) -> Option<AtomicRefMut<'_, T>> {
        self.readers
            .compare_exchange(UNUSED, WRITER, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // SAFETY: the count went from UNUSED to WRITER, so
        // this is the only live reference.
        let value = unsafe { &mut *self.value.get() };

        Some(AtomicRefMut {
            readers: &self.readers,
            value,
        })
    }

    pub fn is_borrowed(&self) -> bool {
        self.readers.load(Ordering::Acquire) != UNUSED
    }

    pub fn as_ptr(&self) -> *mut T {
        self.value.get()
    }
}

// SAFETY: access to `value` always goes through the reader count.
unsafe impl<T: ?Sized + Send> Send for AtomicRefCell<T> {}

// SAFETY: as above; shared borrows require `T: Sync` to be handed across.
unsafe impl<T: ?Sized + Send + Sync> Sync for AtomicRefCell<T> {}

impl<T: Default> Default for AtomicRefCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for AtomicRefCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicRefCell")
            .field("type", &any::type_name::<T>())
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

pub struct AtomicRef<'a, T: ?Sized> {
    readers: &'a AtomicUsize,
    value: &'a T,
}

impl<'a, T: ?Sized> AtomicRef<'a, T> {
    pub fn map<U, F>(this: Self, f: F) -> AtomicRef<'a, U>
    where
        F: FnOnce(&T) -> &U,
        U: ?Sized,
    {
        let this = ManuallyDrop::new(this);
        let readers = this.readers;
        let value = f(this.value);

        AtomicRef { readers, value }
    }
}

impl<T: ?Sized> Deref for AtomicRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: ?Sized> Drop for AtomicRef<'_, T> {
    fn drop(&mut self) {
        let old = self.readers.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(old, WRITER);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for AtomicRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

pub struct AtomicRefMut<'a, T: ?Sized> {
    readers: &'a AtomicUsize,
    value: &'a mut T,
}

impl<'a, T: ?Sized> AtomicRefMut<'a, T> {
    pub fn map<U, F>(this: Self, f: F) -> AtomicRefMut<'a, U>
    where
        F: FnOnce(&mut T) -> &mut U,
        U: ?Sized,
    {
        let this = ManuallyDrop::new(this);
        let readers = this.readers;
        // SAFETY: `this` is never dropped, so moving the reference out does
        // not release the count; the new guard takes over that duty.
        let value = f(unsafe { ptr::read(&this.value) });

        AtomicRefMut { readers, value }
    }
}

impl<T: ?Sized> Deref for AtomicRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: ?Sized> DerefMut for AtomicRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T: ?Sized> Drop for AtomicRefMut<'_, T> {
    fn drop(&mut self) {
        let old = self.readers.swap(UNUSED, Ordering::Release);
        debug_assert_eq!(old, WRITER);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for AtomicRefMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}
