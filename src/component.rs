use crate::{
    cell::AtomicRef,
    entity::Entity,
    id::ComponentId,
    storage::{ComponentStorage, Tick},
};

/// Plain data that can be attached to an entity, at most one value per type.
///
/// ```
/// # use sparse_ecs::Component;
/// struct Position(f32, f32);
/// impl Component for Position {}
/// ```
pub trait Component: Send + Sync + 'static {}

/// A bundle of components handled as one unit: a single component, or a
/// tuple (up to 12 elements, nesting allowed) of bundles.
pub trait ComponentTuple: Send + Sync + 'static {
    /// Read guards for every component of the bundle.
    type Refs<'a>;

    /// Appends the id of every component in the bundle, assigning ids to
    /// types seen for the first time.
    fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>);

    /// Moves every component into storage, stamped `added = changed = tick`.
    fn store(self, entity: Entity, tick: Tick, components: &mut ComponentStorage);

    /// Overwrites every component of the bundle, stamping `changed = tick`.
    fn replace(self, entity: Entity, tick: Tick, components: &mut ComponentStorage);

    fn fetch(components: &ComponentStorage, entity: Entity) -> Option<Self::Refs<'_>>;

    /// The bundle's component ids, in declaration order.
    ///
    /// # Panics
    /// If the bundle names the same component type twice.
    fn ids(components: &ComponentStorage) -> Vec<ComponentId> {
        let mut ids = Vec::new();
        Self::component_ids(components, &mut ids);

        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                panic!(
                    "Component set already contained component of type {}",
                    components.type_name(*id).unwrap_or("<unknown>"),
                );
            }
        }

        ids
    }
}

impl<T: Component> ComponentTuple for T {
    type Refs<'a> = AtomicRef<'a, T>;

    fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>) {
        ids.push(components.id_of::<T>());
    }

    fn store(self, entity: Entity, tick: Tick, components: &mut ComponentStorage) {
        components.add(entity, tick, self);
    }

    fn replace(self, entity: Entity, tick: Tick, components: &mut ComponentStorage) {
        components.replace(entity, tick, self);
    }

    fn fetch(components: &ComponentStorage, entity: Entity) -> Option<Self::Refs<'_>> {
        components.get::<T>(entity)
    }
}

// Unit signifies no components are associated with the entity.
impl ComponentTuple for () {
    type Refs<'a> = ();

    fn component_ids(_: &ComponentStorage, _: &mut Vec<ComponentId>) {}

    fn store(self, _: Entity, _: Tick, _: &mut ComponentStorage) {}

    fn replace(self, _: Entity, _: Tick, _: &mut ComponentStorage) {}

    fn fetch(_: &ComponentStorage, _: Entity) -> Option<Self::Refs<'_>> {
        Some(())
    }
}

macro_rules! impl_ct {
    ($($t:tt),+) => {
        impl<$($t),+> ComponentTuple for ($($t,)+)
        where
            $(
                $t: ComponentTuple,
            )+
        {
            type Refs<'a> = ($($t::Refs<'a>,)+);

            fn component_ids(components: &ComponentStorage, ids: &mut Vec<ComponentId>) {
                $(
                    $t::component_ids(components, ids);
                )+
            }

            fn store(self, entity: Entity, tick: Tick, components: &mut ComponentStorage) {
                #[allow(non_snake_case)]
                let ($($t,)+) = self;

                $(
                    $t.store(entity, tick, components);
                )+
            }

            fn replace(self, entity: Entity, tick: Tick, components: &mut ComponentStorage) {
                #[allow(non_snake_case)]
                let ($($t,)+) = self;

                $(
                    $t.replace(entity, tick, components);
                )+
            }

            fn fetch(components: &ComponentStorage, entity: Entity) -> Option<Self::Refs<'_>> {
                Some(($($t::fetch(components, entity)?,)+))
            }
        }
    };
}

impl_ct!(T0);
impl_ct!(T0, T1);
impl_ct!(T0, T1, T2);
impl_ct!(T0, T1, T2, T3);
impl_ct!(T0, T1, T2, T3, T4);
impl_ct!(T0, T1, T2, T3, T4, T5);
impl_ct!(T0, T1, T2, T3, T4, T5, T6);
impl_ct!(T0, T1, T2, T3, T4, T5, T6, T7);
impl_ct!(T0, T1, T2, T3, T4, T5, T6, T7, T8);
impl_ct!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_ct!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_ct!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct A(u8);
    impl Component for A {}

    #[derive(Debug, PartialEq)]
    struct B(u8);
    impl Component for B {}

    #[derive(Debug, PartialEq)]
    struct C(u8);
    impl Component for C {}

    #[test]
    fn nested_bundles_flatten() {
        let mut storage = ComponentStorage::new();
        let e = Entity::new(0, 0);

        (A(1), (B(2), C(3))).store(e, 1, &mut storage);

        let ids = <(A, (B, C))>::ids(&storage);
        assert_eq!(ids, vec![0, 1, 2]);

        let (a, (b, c)) = <(A, (B, C))>::fetch(&storage, e).unwrap();
        assert_eq!((a.0, b.0, c.0), (1, 2, 3));
    }

    #[test]
    fn fetch_fails_if_any_is_missing() {
        let mut storage = ComponentStorage::new();
        let e = Entity::new(0, 0);
        A(1).store(e, 1, &mut storage);

        assert!(<(A, B)>::fetch(&storage, e).is_none());
        assert!(<A>::fetch(&storage, e).is_some());
    }

    #[test]
    fn replace_touches_every_member() {
        let mut storage = ComponentStorage::new();
        let e = Entity::new(0, 0);
        (A(1), B(1)).store(e, 1, &mut storage);
        (A(5), B(6)).replace(e, 3, &mut storage);

        let (a, b) = <(A, B)>::fetch(&storage, e).unwrap();
        assert_eq!((a.0, b.0), (5, 6));
        drop((a, b));

        let id = storage.id_of::<B>();
        assert!(storage.is_changed(e, id, 3));
        assert!(!storage.is_added(e, id, 2));
    }

    #[test]
    #[should_panic(expected = "Component set already contained component")]
    fn duplicate_types_panic() {
        let storage = ComponentStorage::new();
        <(A, B, A)>::ids(&storage);
    }
}
