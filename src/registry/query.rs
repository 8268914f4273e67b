//! Filtered component queries.
//!
//! A [`Querier`] is built in two steps. The scan picks the smallest component
//! set the query requires and tests each of its entities against every term;
//! the matching entities are stored. Only then are the component sets
//! borrowed, and they stay borrowed for as long as the querier lives.

use std::{
    any,
    cell::Cell,
    fmt,
    iter::FusedIterator,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    slice,
};

use crate::{
    cell::{AtomicRef, AtomicRefMut},
    component::Component,
    entity::Entity,
    error::RetrievalError,
    id::ComponentId,
    registry::Registry,
    storage::{ComponentSet, ComponentStorage, Tick, Ticks},
    system::SystemTicks,
    utils,
};

/// The data half of a query: `&T`, `&mut T`, [`Entity`] and tuples of them.
///
/// # Safety
/// `component_ids` must list every component `fetch` reads or writes, and
/// `fetch` may only hand out mutable access to slots of the entity it was
/// given.
pub unsafe trait QueryData {
    /// What iterating a mutable querier yields.
    type Item<'a>;
    /// What iterating a shared querier yields.
    type ReadItem<'a>;
    /// Borrowed component sets.
    type State<'w>;

    fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>);

    fn borrow(
        components: &ComponentStorage,
        ticks: SystemTicks,
    ) -> Result<Self::State<'_>, RetrievalError>;

    /// # Safety
    /// `entity` must have passed the scan, and no other item for the same
    /// entity may be alive.
    unsafe fn fetch<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::Item<'a>;

    /// # Safety
    /// `entity` must have passed the scan, and no mutable item may be alive.
    unsafe fn fetch_read<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::ReadItem<'a>;
}

/// Component ids collected from the filter half of a query.
#[derive(Clone, Debug, Default)]
pub struct FilterIds {
    pub with: Vec<ComponentId>,
    pub without: Vec<ComponentId>,
    pub added: Vec<ComponentId>,
    pub changed: Vec<ComponentId>,
}

/// The filter half of a query: [`With`], [`Without`], [`Added`],
/// [`Changed`] and tuples of them.
pub trait QueryFilter {
    fn filter_ids(components: &ComponentStorage, filter: &mut FilterIds);
}

macro_rules! filter_terms {
    ($($(#[$meta:meta])* $name:ident => $field:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub struct $name<T: Component>(PhantomData<fn() -> T>);

            impl<T: Component> QueryFilter for $name<T> {
                fn filter_ids(components: &ComponentStorage, filter: &mut FilterIds) {
                    filter.$field.push(components.id_of::<T>());
                }
            }

            impl<T: Component> fmt::Debug for $name<T> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}<{}>", stringify!($name), any::type_name::<T>())
                }
            }
        )*
    };
}

filter_terms! {
    /// Entities that hold a `T`, without fetching it.
    With => with,
    /// Entities that do not hold a `T`.
    Without => without,
    /// Entities whose `T` was added since the querying system last ran.
    /// Implies [`With<T>`].
    Added => added,
    /// Entities whose `T` was added or changed since the querying system
    /// last ran. Implies [`With<T>`].
    Changed => changed,
}

impl QueryFilter for () {
    fn filter_ids(_: &ComponentStorage, _: &mut FilterIds) {}
}

macro_rules! impl_filter {
    ($($f:ident),+) => {
        impl<$($f: QueryFilter),+> QueryFilter for ($($f,)+) {
            fn filter_ids(components: &ComponentStorage, filter: &mut FilterIds) {
                $($f::filter_ids(components, filter);)+
            }
        }
    };
}

impl_filter!(F0);
impl_filter!(F0, F1);
impl_filter!(F0, F1, F2);
impl_filter!(F0, F1, F2, F3);
impl_filter!(F0, F1, F2, F3, F4);
impl_filter!(F0, F1, F2, F3, F4, F5);
impl_filter!(F0, F1, F2, F3, F4, F5, F6);
impl_filter!(F0, F1, F2, F3, F4, F5, F6, F7);
impl_filter!(F0, F1, F2, F3, F4, F5, F6, F7, F8);
impl_filter!(F0, F1, F2, F3, F4, F5, F6, F7, F8, F9);
impl_filter!(F0, F1, F2, F3, F4, F5, F6, F7, F8, F9, F10);
impl_filter!(F0, F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11);

/// A write view of one component handed out by a query. Any access through
/// the view, shared or mutable, stamps the component changed at the querying
/// system's tick. [`Mut::bypass_change_detection`] is the only way around it.
pub struct Mut<'a, T> {
    value: &'a mut T,
    added: Tick,
    changed: &'a Cell<Tick>,
    last_run: Tick,
    this_run: Tick,
}

impl<'a, T> Mut<'a, T> {
    pub(crate) fn new(
        value: &'a mut T,
        added: Tick,
        changed: &'a mut Tick,
        ticks: SystemTicks,
    ) -> Self {
        Self {
            value,
            added,
            changed: Cell::from_mut(changed),
            last_run: ticks.last_run,
            this_run: ticks.this_run,
        }
    }

    pub fn is_added(&self) -> bool {
        self.added >= self.last_run
    }

    pub fn is_changed(&self) -> bool {
        self.changed.get() >= self.last_run
    }

    pub fn ticks(&self) -> Ticks {
        Ticks {
            added: self.added,
            changed: self.changed.get(),
        }
    }

    pub fn set_changed(&self) {
        self.changed.set(self.this_run);
    }

    /// Mutable access that leaves the changed tick alone.
    pub fn bypass_change_detection(&mut self) -> &mut T {
        self.value
    }

    /// Consumes the view, stamping the component changed.
    pub fn into_inner(self) -> &'a mut T {
        self.set_changed();
        self.value
    }
}

impl<T> Deref for Mut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.set_changed();
        self.value
    }
}

impl<T> DerefMut for Mut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.set_changed();
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Mut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mut")
            .field("value", &self.value)
            .field("added", &self.added)
            .field("changed", &self.changed.get())
            .finish()
    }
}

/// Borrowed state of a `&mut T` term.
pub struct MutState<'w, T: Component> {
    set: AtomicRefMut<'w, ComponentSet<T>>,
    data: *mut T,
    added: *const Tick,
    changed: *mut Tick,
    ticks: SystemTicks,
}

impl<T: Component> fmt::Debug for MutState<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutState")
            .field("set", &*self.set)
            .field("ticks", &self.ticks)
            .finish()
    }
}

fn missing_set() -> ! {
    // The scan only matches entities that hold every fetched component, so a
    // missing set means nothing can be fetched from it.
    unsafe { utils::debug_unreachable("Query fetched from a component set that was never created.") }
}

unsafe impl<T: Component> QueryData for &'_ T {
    type Item<'a> = &'a T;
    type ReadItem<'a> = &'a T;
    type State<'w> = Option<AtomicRef<'w, ComponentSet<T>>>;

    fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>) {
        ids.push(components.id_of::<T>());
    }

    fn borrow(
        components: &ComponentStorage,
        _: SystemTicks,
    ) -> Result<Self::State<'_>, RetrievalError> {
        components.try_set::<T>()
    }

    unsafe fn fetch<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::Item<'a> {
        Self::fetch_read(state, entity)
    }

    unsafe fn fetch_read<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::ReadItem<'a> {
        match state {
            Some(set) => set.get(entity),
            None => missing_set(),
        }
    }
}

unsafe impl<T: Component> QueryData for &'_ mut T {
    type Item<'a> = Mut<'a, T>;
    type ReadItem<'a> = &'a T;
    type State<'w> = Option<MutState<'w, T>>;

    fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>) {
        ids.push(components.id_of::<T>());
    }

    fn borrow(
        components: &ComponentStorage,
        ticks: SystemTicks,
    ) -> Result<Self::State<'_>, RetrievalError> {
        Ok(components.try_set_mut::<T>()?.map(|mut set| {
            let (data, added, changed) = set.raw_columns();
            MutState {
                set,
                data,
                added,
                changed,
                ticks,
            }
        }))
    }

    unsafe fn fetch<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::Item<'a> {
        let state = match state {
            Some(state) => state,
            None => missing_set(),
        };

        let index = state.set.index(entity);
        Mut::new(
            &mut *state.data.add(index),
            *state.added.add(index),
            &mut *state.changed.add(index),
            state.ticks,
        )
    }

    unsafe fn fetch_read<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::ReadItem<'a> {
        let state = match state {
            Some(state) => state,
            None => missing_set(),
        };

        // Reading a write term still counts as an access.
        let index = state.set.index(entity);
        *state.changed.add(index) = state.ticks.this_run;
        &*state.data.add(index)
    }
}

unsafe impl QueryData for Entity {
    type Item<'a> = Entity;
    type ReadItem<'a> = Entity;
    type State<'w> = ();

    fn component_ids(_: &ComponentStorage, _: &mut Vec<ComponentId>) {}

    fn borrow(_: &ComponentStorage, _: SystemTicks) -> Result<Self::State<'_>, RetrievalError> {
        Ok(())
    }

    unsafe fn fetch<'a, 'w>(_: &'a Self::State<'w>, entity: Entity) -> Self::Item<'a> {
        entity
    }

    unsafe fn fetch_read<'a, 'w>(_: &'a Self::State<'w>, entity: Entity) -> Self::ReadItem<'a> {
        entity
    }
}

macro_rules! impl_data {
    ($($d:ident),+) => {
        #[allow(non_snake_case)]
        unsafe impl<$($d: QueryData),+> QueryData for ($($d,)+) {
            type Item<'a> = ($($d::Item<'a>,)+);
            type ReadItem<'a> = ($($d::ReadItem<'a>,)+);
            type State<'w> = ($($d::State<'w>,)+);

            fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>) {
                $($d::component_ids(components, ids);)+
            }

            fn borrow(
                components: &ComponentStorage,
                ticks: SystemTicks,
            ) -> Result<Self::State<'_>, RetrievalError> {
                Ok(($($d::borrow(components, ticks)?,)+))
            }

            unsafe fn fetch<'a, 'w>(state: &'a Self::State<'w>, entity: Entity) -> Self::Item<'a> {
                let ($($d,)+) = state;
                ($(<$d as QueryData>::fetch($d, entity),)+)
            }

            unsafe fn fetch_read<'a, 'w>(
                state: &'a Self::State<'w>,
                entity: Entity,
            ) -> Self::ReadItem<'a> {
                let ($($d,)+) = state;
                ($(<$d as QueryData>::fetch_read($d, entity),)+)
            }
        }
    };
}

impl_data!(D0);
impl_data!(D0, D1);
impl_data!(D0, D1, D2);
impl_data!(D0, D1, D2, D3);
impl_data!(D0, D1, D2, D3, D4);
impl_data!(D0, D1, D2, D3, D4, D5);
impl_data!(D0, D1, D2, D3, D4, D5, D6);
impl_data!(D0, D1, D2, D3, D4, D5, D6, D7);
impl_data!(D0, D1, D2, D3, D4, D5, D6, D7, D8);
impl_data!(D0, D1, D2, D3, D4, D5, D6, D7, D8, D9);
impl_data!(D0, D1, D2, D3, D4, D5, D6, D7, D8, D9, D10);
impl_data!(D0, D1, D2, D3, D4, D5, D6, D7, D8, D9, D10, D11);

/// Entities matching `D` and `F`, in the dense order of the smallest
/// required component set. Added/changed terms compare against `since`.
///
/// # Errors
/// [`RetrievalError::ComponentInUse`] if a required set is borrowed mutably.
pub(crate) fn scan<D: QueryData, F: QueryFilter>(
    registry: &Registry,
    since: Tick,
) -> Result<Vec<Entity>, RetrievalError> {
    let components = registry.component_storage();
    let entities = registry.entity_storage();

    let mut filter = FilterIds::default();
    F::filter_ids(components, &mut filter);

    let mut required = Vec::new();
    D::component_ids(components, &mut required);
    required.extend_from_slice(&filter.with);
    let added_start = required.len();
    required.extend_from_slice(&filter.added);
    let changed_start = required.len();
    required.extend_from_slice(&filter.changed);

    let mut sets = Vec::with_capacity(required.len());
    for &id in &required {
        match components.try_erased(id)? {
            Some(set) => sets.push(set),
            // Nobody ever held this component.
            None => return Ok(Vec::new()),
        }
    }

    let matches = |entity: Entity| {
        entities.has(entity, &required)
            && entities.not_has(entity, &filter.without)
            && sets[added_start..changed_start]
                .iter()
                .all(|set| set.ticks(entity).map_or(false, |ticks| ticks.is_added(since)))
            && sets[changed_start..]
                .iter()
                .all(|set| set.ticks(entity).map_or(false, |ticks| ticks.is_changed(since)))
    };

    let found = match sets.iter().min_by_key(|set| set.len()) {
        Some(smallest) => smallest
            .entities()
            .iter()
            .filter(|&entity| matches(entity))
            .collect(),
        None => entities.iter().filter(|&entity| matches(entity)).collect(),
    };

    Ok(found)
}

/// A snapshot of the entities matching `D` and `F`, with the component sets
/// `D` needs borrowed.
///
/// Structural changes made through [`Commands`](crate::command::Commands)
/// while a querier is alive do not affect it; they land when the queue is
/// flushed.
pub struct Querier<'w, D: QueryData, F: QueryFilter = ()> {
    entities: Vec<Entity>,
    state: D::State<'w>,
    marker: PhantomData<fn() -> F>,
}

impl<'w, D: QueryData, F: QueryFilter> Querier<'w, D, F> {
    /// Scans for matching entities, comparing added/changed terms against
    /// `ticks.last_run`, then borrows the component sets.
    ///
    /// # Errors
    /// [`RetrievalError::ComponentInUse`] if a set the query touches is
    /// already borrowed in a conflicting way.
    pub fn new(registry: &'w Registry, ticks: SystemTicks) -> Result<Self, RetrievalError> {
        let entities = scan::<D, F>(registry, ticks.last_run)?;
        let state = D::borrow(registry.component_storage(), ticks)?;

        Ok(Self {
            entities,
            state,
            marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Matching entities in iteration order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(&entity)
    }

    pub fn iter(&self) -> QuerierIter<'_, 'w, D> {
        QuerierIter {
            entities: self.entities.iter(),
            state: &self.state,
        }
    }

    pub fn iter_mut(&mut self) -> QuerierIterMut<'_, 'w, D> {
        QuerierIterMut {
            entities: self.entities.iter(),
            state: &self.state,
        }
    }

    pub fn for_each<'s>(&'s self, f: impl FnMut(D::ReadItem<'s>)) {
        self.iter().for_each(f)
    }

    pub fn for_each_mut<'s>(&'s mut self, f: impl FnMut(D::Item<'s>)) {
        self.iter_mut().for_each(f)
    }

    pub fn get(&self, entity: Entity) -> Option<D::ReadItem<'_>> {
        if self.contains(entity) {
            Some(unsafe { D::fetch_read(&self.state, entity) })
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<D::Item<'_>> {
        if self.contains(entity) {
            Some(unsafe { D::fetch(&self.state, entity) })
        } else {
            None
        }
    }

    /// The item of the only matching entity. `None` if there are zero or
    /// several.
    pub fn single(&self) -> Option<D::ReadItem<'_>> {
        match self.entities[..] {
            [entity] => self.get(entity),
            _ => None,
        }
    }

    pub fn single_mut(&mut self) -> Option<D::Item<'_>> {
        match self.entities[..] {
            [entity] => self.get_mut(entity),
            _ => None,
        }
    }
}

impl<D: QueryData, F: QueryFilter> fmt::Debug for Querier<'_, D, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Querier")
            .field("data", &any::type_name::<D>())
            .field("filter", &any::type_name::<F>())
            .field("entities", &self.entities)
            .finish()
    }
}

/// Shared items of a [`Querier`], from [`Querier::iter`].
pub struct QuerierIter<'s, 'w, D: QueryData> {
    entities: slice::Iter<'s, Entity>,
    state: &'s D::State<'w>,
}

impl<'s, 'w, D: QueryData> Iterator for QuerierIter<'s, 'w, D> {
    type Item = D::ReadItem<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let &entity = self.entities.next()?;
        // SAFETY: scanned entities, and the shared borrow of the querier rules
        // out live mutable items.
        Some(unsafe { D::fetch_read(self.state, entity) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entities.size_hint()
    }
}

impl<D: QueryData> ExactSizeIterator for QuerierIter<'_, '_, D> {}

impl<D: QueryData> FusedIterator for QuerierIter<'_, '_, D> {}

impl<D: QueryData> fmt::Debug for QuerierIter<'_, '_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerierIter")
            .field("remaining", &self.entities.as_slice())
            .finish()
    }
}

/// Mutable items of a [`Querier`], from [`Querier::iter_mut`].
pub struct QuerierIterMut<'s, 'w, D: QueryData> {
    entities: slice::Iter<'s, Entity>,
    state: &'s D::State<'w>,
}

impl<'s, 'w, D: QueryData> Iterator for QuerierIterMut<'s, 'w, D> {
    type Item = D::Item<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let &entity = self.entities.next()?;
        // SAFETY: scanned entities are unique, so every item touches
        // different slots, and the querier stays mutably borrowed for `'s`.
        Some(unsafe { D::fetch(self.state, entity) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entities.size_hint()
    }
}

impl<D: QueryData> ExactSizeIterator for QuerierIterMut<'_, '_, D> {}

impl<D: QueryData> FusedIterator for QuerierIterMut<'_, '_, D> {}

impl<D: QueryData> fmt::Debug for QuerierIterMut<'_, '_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerierIterMut")
            .field("remaining", &self.entities.as_slice())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TICK_NEVER;

    #[derive(Debug, PartialEq)]
    struct Position(i32);
    impl Component for Position {}

    #[derive(Debug, PartialEq)]
    struct Velocity(i32);
    impl Component for Velocity {}

    #[derive(Debug, PartialEq)]
    struct Frozen;
    impl Component for Frozen {}

    fn query<D: QueryData, F: QueryFilter>(registry: &Registry, last_run: Tick) -> Querier<'_, D, F> {
        let ticks = SystemTicks {
            last_run,
            this_run: registry.tick(),
        };
        Querier::new(registry, ticks).unwrap()
    }

    #[test]
    fn filters_with_and_without() {
        let mut registry = Registry::new();
        let a = registry.spawn(Position(0));
        let b = registry.spawn((Position(1), Velocity(1)));
        let c = registry.spawn((Position(2), Velocity(2), Frozen));

        let found = query::<&Position, (With<Velocity>, Without<Frozen>)>(&registry, TICK_NEVER);
        assert_eq!(found.entities(), &[b]);
        assert_eq!(found.single(), Some(&Position(1)));

        let found = query::<Entity, Without<Velocity>>(&registry, TICK_NEVER);
        assert_eq!(found.entities(), &[a]);

        let found = query::<(Entity, &Velocity), With<Frozen>>(&registry, TICK_NEVER);
        assert_eq!(found.get(c), Some((c, &Velocity(2))));
        assert_eq!(found.get(a), None);
    }

    #[test]
    fn unknown_component_matches_nothing() {
        let mut registry = Registry::new();
        registry.spawn(Position(0));

        let found = query::<(&Position, &Velocity), ()>(&registry, TICK_NEVER);
        assert!(found.is_empty());
        assert_eq!(found.iter().count(), 0);
    }

    #[test]
    fn write_views_stamp_on_any_access() {
        let mut registry = Registry::new();
        let e = registry.spawn((Position(0), Velocity(3)));
        let f = registry.spawn((Position(5), Velocity(0)));
        registry.advance_tick();
        registry.advance_tick();
        let now = registry.tick();

        let mut found = query::<(&mut Position, &Velocity), ()>(&registry, now);
        found.for_each_mut(|(position, _)| assert!(!position.is_changed()));
        for (mut position, velocity) in found.iter_mut() {
            if velocity.0 != 0 {
                position.0 += velocity.0;
            }
        }
        drop(found);

        assert_eq!(query::<Entity, Changed<Position>>(&registry, now).entities(), &[e]);
        assert!(query::<Entity, Changed<Velocity>>(&registry, now).is_empty());
        assert!(query::<Entity, Added<Position>>(&registry, now).is_empty());
        assert_eq!(query::<Entity, Added<Position>>(&registry, now - 2).len(), 2);

        registry.advance_tick();
        let now = registry.tick();
        let mut found = query::<&mut Position, ()>(&registry, now);
        let sum: i32 = found.iter_mut().map(|position| position.0).sum();
        assert_eq!(sum, 8);
        drop(found);
        assert_eq!(query::<Entity, Changed<Position>>(&registry, now).entities(), &[e, f]);

        registry.advance_tick();
        let now = registry.tick();
        let found = query::<&mut Position, ()>(&registry, now);
        assert_eq!(found.get(f), Some(&Position(5)));
        drop(found);
        assert_eq!(query::<Entity, Changed<Position>>(&registry, now).entities(), &[f]);

        registry.advance_tick();
        let now = registry.tick();
        let mut found = query::<&mut Position, ()>(&registry, now);
        for mut position in found.iter_mut() {
            position.bypass_change_detection().0 += 1;
        }
        drop(found);
        assert!(query::<Entity, Changed<Position>>(&registry, now).is_empty());
        assert_eq!(*registry.get::<Position>(e), Position(4));
    }

    #[test]
    fn conflicting_borrows_are_reported() {
        let mut registry = Registry::new();
        registry.spawn(Position(0));

        let _writer = query::<&mut Position, ()>(&registry, TICK_NEVER);
        let ticks = SystemTicks::default();
        let err = Querier::<&Position>::new(&registry, ticks).unwrap_err();

        assert!(matches!(err, RetrievalError::ComponentInUse(_)));
    }

    #[test]
    fn single_needs_exactly_one() {
        let mut registry = Registry::new();
        registry.spawn(Position(0));
        registry.spawn(Position(1));

        let mut found = query::<&mut Position, ()>(&registry, TICK_NEVER);
        assert!(found.single_mut().is_none());
        assert_eq!(found.len(), 2);
        assert_eq!(found.iter_mut().len(), 2);

        let mut items = found.iter();
        assert_eq!(items.next(), Some(&Position(0)));
        assert_eq!(items.len(), 1);
    }
}
