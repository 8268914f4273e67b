//! Added/changed tick bookkeeping.
//!
//! A tick counts up from [`TICK_START`]; [`TICK_NEVER`] is reserved for
//! "never stamped". A stamp is considered new relative to a reference tick
//! when `stamp >= reference`, so a write stamped exactly at a system's last
//! run is still reported to that system.

pub type Tick = u64;

pub const TICK_NEVER: Tick = 0;
pub const TICK_START: Tick = 1;

/// The tick pair of a single slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Ticks {
    pub added: Tick,
    pub changed: Tick,
}

impl Ticks {
    pub fn new(tick: Tick) -> Self {
        Self {
            added: tick,
            changed: tick,
        }
    }

    #[inline]
    pub fn is_added(&self, since: Tick) -> bool {
        self.added >= since
    }

    #[inline]
    pub fn is_changed(&self, since: Tick) -> bool {
        self.changed >= since
    }
}

/// Parallel `added`/`changed` columns, index-aligned with the dense array of
/// the set that owns them.
#[derive(Debug, Default, Clone)]
pub struct TickSet {
    added: Vec<Tick>,
    changed: Vec<Tick>,
}

impl TickSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            added: Vec::with_capacity(capacity),
            changed: Vec::with_capacity(capacity),
        }
    }

    /// Appends a slot stamped `added = changed = tick`.
    pub fn push(&mut self, tick: Tick) {
        self.added.push(tick);
        self.changed.push(tick);
    }

    pub fn swap_remove(&mut self, index: usize) -> Ticks {
        Ticks {
            added: self.added.swap_remove(index),
            changed: self.changed.swap_remove(index),
        }
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.added.swap(a, b);
        self.changed.swap(a, b);
    }

    #[inline]
    pub fn get(&self, index: usize) -> Ticks {
        Ticks {
            added: self.added[index],
            changed: self.changed[index],
        }
    }

    #[inline]
    pub fn set_changed(&mut self, index: usize, tick: Tick) {
        self.changed[index] = tick;
    }

    #[inline]
    pub fn changed_mut(&mut self, index: usize) -> &mut Tick {
        &mut self.changed[index]
    }

    /// Both columns at once: `added` shared, `changed` writable.
    pub fn columns_mut(&mut self) -> (&[Tick], &mut [Tick]) {
        (&self.added, &mut self.changed)
    }

    #[inline]
    pub fn is_added(&self, index: usize, since: Tick) -> bool {
        self.added[index] >= since
    }

    #[inline]
    pub fn is_changed(&self, index: usize, since: Tick) -> bool {
        self.changed[index] >= since
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.changed.clear();
    }

    /// Like [`clear`](Self::clear), but also gives the memory back.
    pub fn reset(&mut self) {
        self.added = Vec::new();
        self.changed = Vec::new();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.added.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
    }
}
