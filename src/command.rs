//! Deferred structural changes.
//!
//! Systems run against a shared `&Registry`, so they cannot spawn, despawn or
//! restructure entities directly. They record [`Command`]s instead, which the
//! registry applies in FIFO order once the whole schedule pass is over.

use std::{
    fmt,
    marker::PhantomData,
    mem::{self, MaybeUninit},
};

use crate::{
    cell::AtomicRefMut, component::ComponentTuple, entity::Entity, registry::Registry,
    resource::Resource,
};

/// A structural change to apply to the registry later.
pub trait Command: Send + 'static {
    fn apply(self, registry: &mut Registry);
}

impl<F> Command for F
where
    F: FnOnce(&mut Registry) + Send + 'static,
{
    fn apply(self, registry: &mut Registry) {
        self(registry)
    }
}

/// Consumes the command stored at `value`. Applies it if a registry is
/// given, drops it otherwise. Returns the size of the command in bytes.
type ConsumeFn = unsafe fn(value: *mut MaybeUninit<u8>, registry: Option<&mut Registry>) -> usize;

struct CommandMeta {
    consume: ConsumeFn,
}

/// Type-erased FIFO of commands stored back to back in one byte arena.
///
/// Each entry is a [`CommandMeta`] immediately followed by the bytes of the
/// command it describes, packed with no padding. The arena itself makes no
/// alignment promise, so entries are written with `write_unaligned` and moved
/// back out with `read_unaligned` into a properly aligned local before the
/// command runs or drops. No reference into the arena is ever formed, which
/// is what keeps commands of any alignment sound.
#[derive(Default)]
pub struct CommandQueue {
    bytes: Vec<MaybeUninit<u8>>,
    len: usize,
}

// SAFETY: every stored command is `Send`.
unsafe impl Send for CommandQueue {}

// SAFETY: `&CommandQueue` never gives access to the stored commands.
unsafe impl Sync for CommandQueue {}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for roughly `capacity` bytes of commands.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            len: 0,
        }
    }

    pub fn push<C: Command>(&mut self, command: C) {
        /// SAFETY: `value` must hold a `C` written by `push`.
        unsafe fn consume<C: Command>(
            value: *mut MaybeUninit<u8>,
            registry: Option<&mut Registry>,
        ) -> usize {
            let command = value.cast::<C>().read_unaligned();
            match registry {
                Some(registry) => command.apply(registry),
                None => drop(command),
            }
            mem::size_of::<C>()
        }

        let meta = CommandMeta {
            consume: consume::<C>,
        };

        let old_len = self.bytes.len();
        let size = mem::size_of::<CommandMeta>() + mem::size_of::<C>();
        self.bytes.reserve(size);

        // SAFETY: `reserve` made room for `size` bytes past `old_len`, and any
        // byte pattern is a valid `MaybeUninit<u8>`.
        unsafe {
            let ptr = self.bytes.as_mut_ptr().add(old_len);
            ptr.cast::<CommandMeta>().write_unaligned(meta);

            if mem::size_of::<C>() > 0 {
                ptr.add(mem::size_of::<CommandMeta>())
                    .cast::<C>()
                    .write_unaligned(command);
            } else {
                mem::forget(command);
            }

            self.bytes.set_len(old_len + size);
        }

        self.len += 1;
    }

    /// Applies every command in insertion order, leaving the queue empty
    /// with its allocation kept.
    pub fn apply(&mut self, registry: &mut Registry) {
        self.consume(Some(registry));
    }

    /// Drops every command without applying it.
    pub fn clear(&mut self) {
        self.consume(None);
    }

    fn consume(&mut self, mut registry: Option<&mut Registry>) {
        let mut cursor = self.bytes.as_mut_ptr();
        let end = cursor as usize + self.bytes.len();

        // Every command is moved out below exactly once; the length goes to
        // zero first so a panicking command cannot lead to a double drop.
        // Commands after the panicking one are leaked.
        unsafe { self.bytes.set_len(0) };
        self.len = 0;

        while (cursor as usize) < end {
            // SAFETY: the arena alternates `CommandMeta` and the command it
            // describes, as written by `push`.
            unsafe {
                let meta = cursor.cast::<CommandMeta>().read_unaligned();
                cursor = cursor.add(mem::size_of::<CommandMeta>());
                let size = (meta.consume)(cursor, registry.as_deref_mut());
                cursor = cursor.add(size);
            }
        }
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Spawns an entity with the given components.
#[derive(Debug)]
pub struct Spawn<B: ComponentTuple>(pub B);

impl<B: ComponentTuple> Command for Spawn<B> {
    fn apply(self, registry: &mut Registry) {
        registry.spawn(self.0);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Despawn(pub Entity);

impl Command for Despawn {
    fn apply(self, registry: &mut Registry) {
        registry.despawn(self.0);
    }
}

#[derive(Debug)]
pub struct Insert<B: ComponentTuple> {
    pub entity: Entity,
    pub components: B,
}

impl<B: ComponentTuple> Command for Insert<B> {
    fn apply(self, registry: &mut Registry) {
        registry.insert(self.entity, self.components);
    }
}

#[derive(Debug)]
pub struct Replace<B: ComponentTuple> {
    pub entity: Entity,
    pub components: B,
}

impl<B: ComponentTuple> Command for Replace<B> {
    fn apply(self, registry: &mut Registry) {
        registry.replace(self.entity, self.components);
    }
}

pub struct Remove<B: ComponentTuple> {
    pub entity: Entity,
    marker: PhantomData<fn() -> B>,
}

impl<B: ComponentTuple> Remove<B> {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            marker: PhantomData,
        }
    }
}

impl<B: ComponentTuple> Command for Remove<B> {
    fn apply(self, registry: &mut Registry) {
        registry.remove::<B>(self.entity);
    }
}

impl<B: ComponentTuple> fmt::Debug for Remove<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remove")
            .field("entity", &self.entity)
            .field("components", &std::any::type_name::<B>())
            .finish()
    }
}

#[derive(Debug)]
pub struct InitResource<T: Resource>(pub T);

impl<T: Resource> Command for InitResource<T> {
    fn apply(self, registry: &mut Registry) {
        registry.init_resource(self.0);
    }
}

pub struct RemoveResource<T: Resource>(PhantomData<fn() -> T>);

impl<T: Resource> RemoveResource<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Resource> Default for RemoveResource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> Command for RemoveResource<T> {
    fn apply(self, registry: &mut Registry) {
        registry.remove_resource::<T>();
    }
}

impl<T: Resource> fmt::Debug for RemoveResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoveResource")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

/// Records commands into the registry's queue from inside a system.
pub struct Commands<'w> {
    queue: AtomicRefMut<'w, CommandQueue>,
}

impl<'w> Commands<'w> {
    pub fn new(queue: AtomicRefMut<'w, CommandQueue>) -> Self {
        Self { queue }
    }

    pub fn add<C: Command>(&mut self, command: C) -> &mut Self {
        self.queue.push(command);
        self
    }

    pub fn spawn<B: ComponentTuple>(&mut self, components: B) -> &mut Self {
        self.add(Spawn(components))
    }

    pub fn despawn(&mut self, entity: Entity) -> &mut Self {
        self.add(Despawn(entity))
    }

    pub fn insert<B: ComponentTuple>(&mut self, entity: Entity, components: B) -> &mut Self {
        self.add(Insert { entity, components })
    }

    pub fn replace<B: ComponentTuple>(&mut self, entity: Entity, components: B) -> &mut Self {
        self.add(Replace { entity, components })
    }

    pub fn remove<B: ComponentTuple>(&mut self, entity: Entity) -> &mut Self {
        self.add(Remove::<B>::new(entity))
    }

    pub fn init_resource<T: Resource>(&mut self, resource: T) -> &mut Self {
        self.add(InitResource(resource))
    }

    pub fn remove_resource<T: Resource>(&mut self) -> &mut Self {
        self.add(RemoveResource::<T>::new())
    }

    /// Number of commands queued so far in this pass.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl fmt::Debug for Commands<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commands")
            .field("queue", &*self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    struct DropCheck(Arc<AtomicU32>);

    impl DropCheck {
        fn new() -> (Self, Arc<AtomicU32>) {
            let drops = Arc::new(AtomicU32::new(0));
            (Self(drops.clone()), drops)
        }
    }

    impl Drop for DropCheck {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Command for DropCheck {
        fn apply(self, _: &mut Registry) {}
    }

    #[test]
    fn applied_commands_are_dropped_once() {
        let mut queue = CommandQueue::new();
        let (a, drops_a) = DropCheck::new();
        let (b, drops_b) = DropCheck::new();
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.len(), 2);
        assert_eq!(drops_a.load(Ordering::Relaxed), 0);

        let mut registry = Registry::new();
        queue.apply(&mut registry);

        assert!(queue.is_empty());
        assert_eq!(drops_a.load(Ordering::Relaxed), 1);
        assert_eq!(drops_b.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unapplied_commands_are_dropped_with_the_queue() {
        let (a, drops) = DropCheck::new();
        {
            let mut queue = CommandQueue::new();
            queue.push(a);
        }

        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn commands_run_in_fifo_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut queue = CommandQueue::new();

        for i in 0..3u8 {
            let log = log.clone();
            queue.push(move |_: &mut Registry| log.lock().push(i));
        }
        // zero-sized commands share the arena with sized ones
        queue.push(|_: &mut Registry| {});

        queue.apply(&mut Registry::new());

        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[derive(Debug, PartialEq)]
    #[repr(align(64))]
    struct Wide([u64; 3]);

    impl Command for Wide {
        fn apply(self, registry: &mut Registry) {
            let at = &self as *const Wide as usize;
            assert_eq!(at % mem::align_of::<Wide>(), 0);
            registry.init_resource(self);
        }
    }

    #[test]
    fn over_aligned_commands_survive_the_packed_arena() {
        let mut queue = CommandQueue::new();
        queue.push(|registry: &mut Registry| {
            registry.init_resource(1u8);
        });
        queue.push(InitResource(2u16));
        queue.push(Wide([3, 4, 5]));

        let mut registry = Registry::new();
        queue.apply(&mut registry);

        assert_eq!(*registry.resource::<u8>(), 1);
        assert_eq!(*registry.resource::<u16>(), 2);
        assert_eq!(*registry.resource::<Wide>(), Wide([3, 4, 5]));
    }

    #[test]
    fn apply_keeps_the_allocation() {
        let mut queue = CommandQueue::with_capacity(256);
        queue.push(Despawn(Entity::PLACEHOLDER));
        let capacity = queue.capacity();

        queue.apply(&mut Registry::new());

        assert_eq!(queue.capacity(), capacity);
        assert!(capacity >= 256);
    }

    #[derive(Debug, PartialEq)]
    struct Label(String);
    impl crate::Component for Label {}

    #[test]
    fn built_in_commands_reach_the_registry() {
        let mut registry = Registry::new();
        let entity = registry.spawn(Label("old".into()));

        let mut queue = CommandQueue::new();
        queue.push(Spawn(Label("spawned".into())));
        queue.push(Replace {
            entity,
            components: Label("new".into()),
        });
        queue.push(InitResource(7u32));
        queue.apply(&mut registry);

        assert_eq!(registry.entity_count(), 2);
        assert_eq!(*registry.get::<Label>(entity), Label("new".into()));
        assert_eq!(*registry.resource::<u32>(), 7);

        queue.push(Remove::<Label>::new(entity));
        queue.push(RemoveResource::<u32>::new());
        queue.push(Despawn(entity));
        queue.apply(&mut registry);

        assert!(!registry.alive(entity));
        assert!(!registry.resources_exist::<(u32,)>());
        assert_eq!(registry.removed::<Label>(), &[entity]);
    }
}
