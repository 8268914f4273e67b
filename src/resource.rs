use crate::{
    error::RetrievalError,
    storage::{Res, ResMut, ResourceStorage, Tick},
};

/// A singleton value owned by the registry. Any `Send + Sync + 'static`
/// type qualifies.
pub trait Resource: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Resource for T {}

/// A tuple of resources (up to 12) initialised or viewed together.
///
/// Every type qualifies as a [`Resource`], so single resources go through
/// the non-tuple entry points and a 1-tuple `(T,)` is needed here.
pub trait ResourceTuple: Send + Sync + 'static {
    type Views<'w>;
    type ViewsMut<'w>;

    /// Initialises every member that is not yet present.
    fn store(self, tick: Tick, storage: &mut ResourceStorage);

    /// True if every member is present.
    fn contains(storage: &ResourceStorage) -> bool;

    fn fetch(storage: &ResourceStorage, last_run: Tick) -> Result<Self::Views<'_>, RetrievalError>;

    fn fetch_mut(
        storage: &ResourceStorage,
        last_run: Tick,
        this_run: Tick,
    ) -> Result<Self::ViewsMut<'_>, RetrievalError>;
}

impl ResourceTuple for () {
    type Views<'w> = ();
    type ViewsMut<'w> = ();

    fn store(self, _: Tick, _: &mut ResourceStorage) {}

    fn contains(_: &ResourceStorage) -> bool {
        true
    }

    fn fetch(_: &ResourceStorage, _: Tick) -> Result<Self::Views<'_>, RetrievalError> {
        Ok(())
    }

    fn fetch_mut(_: &ResourceStorage, _: Tick, _: Tick) -> Result<Self::ViewsMut<'_>, RetrievalError> {
        Ok(())
    }
}

macro_rules! impl_rt {
    ($($t:tt),+) => {
        impl<$($t),+> ResourceTuple for ($($t,)+)
        where
            $(
                $t: Resource,
            )+
        {
            type Views<'w> = ($(Res<'w, $t>,)+);
            type ViewsMut<'w> = ($(ResMut<'w, $t>,)+);

            fn store(self, tick: Tick, storage: &mut ResourceStorage) {
                #[allow(non_snake_case)]
                let ($($t,)+) = self;

                $(
                    storage.init(tick, $t);
                )+
            }

            fn contains(storage: &ResourceStorage) -> bool {
                $(storage.contains::<$t>())&&+
            }

            fn fetch(
                storage: &ResourceStorage,
                last_run: Tick,
            ) -> Result<Self::Views<'_>, RetrievalError> {
                Ok(($(Res::new(storage.try_slot::<$t>()?, last_run),)+))
            }

            fn fetch_mut(
                storage: &ResourceStorage,
                last_run: Tick,
                this_run: Tick,
            ) -> Result<Self::ViewsMut<'_>, RetrievalError> {
                Ok(($(ResMut::new(storage.try_slot_mut::<$t>()?, last_run, this_run),)+))
            }
        }
    };
}

impl_rt!(T0);
impl_rt!(T0, T1);
impl_rt!(T0, T1, T2);
impl_rt!(T0, T1, T2, T3);
impl_rt!(T0, T1, T2, T3, T4);
impl_rt!(T0, T1, T2, T3, T4, T5);
impl_rt!(T0, T1, T2, T3, T4, T5, T6);
impl_rt!(T0, T1, T2, T3, T4, T5, T6, T7);
impl_rt!(T0, T1, T2, T3, T4, T5, T6, T7, T8);
impl_rt!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_rt!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_rt!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
