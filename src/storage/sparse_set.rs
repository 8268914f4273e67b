//! Paged sparse set over an unsigned key space.
//!
//! `dense` holds the keys compactly; `sparse` is split into fixed-size pages
//! that are allocated the first time a key falls into them. For every present
//! key `k`, `sparse[page(k)][offset(k)] == i` iff `dense[i] == k`.

use std::fmt;

use crate::entity::EntityId;

/// Marks an empty sparse slot.
pub const NULL: usize = usize::MAX;

pub const DEFAULT_PAGE_SIZE: usize = 1024;

pub trait SparseKey: Copy + Eq + fmt::Debug {
    fn to_usize(self) -> usize;
}

impl SparseKey for usize {
    #[inline]
    fn to_usize(self) -> usize {
        self
    }
}

impl SparseKey for EntityId {
    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

pub struct SparseSet<K: SparseKey = usize, const PAGE: usize = DEFAULT_PAGE_SIZE> {
    dense: Vec<K>,
    sparse: Vec<Option<Box<[usize]>>>,
}

impl<K: SparseKey, const PAGE: usize> SparseSet<K, PAGE> {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dense: Vec::with_capacity(capacity),
            sparse: Vec::new(),
        }
    }

    #[inline]
    fn page(key: K) -> usize {
        key.to_usize() / PAGE
    }

    #[inline]
    fn offset(key: K) -> usize {
        key.to_usize() % PAGE
    }

    #[inline]
    fn slot(&self, key: K) -> usize {
        match self.sparse.get(Self::page(key)) {
            Some(Some(page)) => page[Self::offset(key)],
            _ => NULL,
        }
    }

    fn slot_mut(&mut self, key: K) -> &mut usize {
        let page = Self::page(key);
        if page >= self.sparse.len() {
            self.sparse.resize_with(page + 1, || None);
        }

        let page = self.sparse[page].get_or_insert_with(|| vec![NULL; PAGE].into_boxed_slice());
        &mut page[Self::offset(key)]
    }

    /// Inserts `key` and returns its dense index.
    ///
    /// # Panics
    /// If `key` is already present or maps onto the null sentinel.
    pub fn add(&mut self, key: K) -> usize {
        assert_ne!(key.to_usize(), NULL, "sparse set key collides with the null sentinel");
        assert!(!self.contain(key), "sparse set already contains {:?}", key);

        let index = self.dense.len();
        *self.slot_mut(key) = index;
        self.dense.push(key);
        index
    }

    /// Removes `key` by swapping it with the last dense element. Returns the
    /// dense index it occupied; parallel arrays must `swap_remove` that index.
    ///
    /// # Panics
    /// If `key` is not present.
    pub fn remove(&mut self, key: K) -> usize {
        let index = self.index(key);
        let last = self.dense.len() - 1;

        self.dense.swap_remove(index);
        if index != last {
            let moved = self.dense[index];
            *self.slot_mut(moved) = index;
        }
        *self.slot_mut(key) = NULL;

        index
    }

    #[inline]
    pub fn contain(&self, key: K) -> bool {
        self.slot(key) != NULL
    }

    /// # Panics
    /// If `key` is not present.
    #[inline]
    pub fn index(&self, key: K) -> usize {
        match self.slot(key) {
            NULL => panic!("sparse set does not contain {:?}", key),
            index => index,
        }
    }

    #[inline]
    pub fn try_index(&self, key: K) -> Option<usize> {
        match self.slot(key) {
            NULL => None,
            index => Some(index),
        }
    }

    /// Swaps the dense positions of two present keys.
    pub fn swap(&mut self, a: K, b: K) {
        let ia = self.index(a);
        let ib = self.index(b);
        if ia == ib {
            return;
        }

        self.dense.swap(ia, ib);
        *self.slot_mut(a) = ib;
        *self.slot_mut(b) = ia;
    }

    /// Drops every key. Allocated pages are kept and reset.
    pub fn clear(&mut self) {
        for key in self.dense.drain(..) {
            if let Some(Some(page)) = self.sparse.get_mut(key.to_usize() / PAGE) {
                page[key.to_usize() % PAGE] = NULL;
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[K] {
        &self.dense
    }

    pub fn iter(&self) -> impl Iterator<Item = K> + '_ {
        self.dense.iter().copied()
    }

    pub fn page_count(&self) -> usize {
        self.sparse.iter().filter(|page| page.is_some()).count()
    }
}

impl<K: SparseKey, const PAGE: usize> Default for SparseSet<K, PAGE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SparseKey, const PAGE: usize> fmt::Debug for SparseSet<K, PAGE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseSet")
            .field("dense", &self.dense)
            .field("pages", &self.page_count())
            .finish()
    }
}
