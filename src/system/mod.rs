//! Systems: functions run by the registry once per schedule pass.
//!
//! Any function or closure whose arguments all implement [`SystemParam`] is a
//! system:
//!
//! ```
//! # use sparse_ecs::{Component, Querier, Res};
//! # struct Position(f32); impl Component for Position {}
//! # struct Velocity(f32); impl Component for Velocity {}
//! # struct Delta(f32);
//! fn movement(mut query: Querier<(&mut Position, &Velocity)>, delta: Res<Delta>) {
//!     query.for_each_mut(|(mut position, velocity)| position.0 += velocity.0 * delta.0);
//! }
//! ```
//!
//! A function taking a single `&mut Registry` is an exclusive system; it
//! gets direct access to the whole registry.

use std::{
    any::{self, TypeId},
    fmt,
    marker::PhantomData,
};

use tracing::error;

use crate::{
    command::Commands,
    component::Component,
    entity::Entity,
    error::RetrievalError,
    event::{Event, EventMutator, EventReader, EventWriter},
    registry::{
        query::{QueryData, QueryFilter},
        Querier, Registry,
    },
    resource::Resource,
    storage::{Res, ResMut, Tick},
    utils,
};

pub mod executor;
pub mod schedule;
pub mod stage;

pub use executor::SystemExecutor;
pub use schedule::SystemSchedule;
pub use stage::{
    First, Last, PostUpdate, PreUpdate, Schedule, Schedules, Stage, StageLabel, Startup, Update,
};

/// The ticks a system runs between: the tick it last ran at and the tick of
/// the current run.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
pub struct SystemTicks {
    pub last_run: Tick,
    pub this_run: Tick,
}

/// Identity of a system: the type of the function (or closure) it was built
/// from.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct SystemId {
    type_id: TypeId,
    name: &'static str,
}

impl SystemId {
    /// The id of the system built from `system`. The value itself is only
    /// used for its type.
    pub fn of<T: 'static>(_system: &T) -> Self {
        Self::of_type::<T>()
    }

    pub fn of_type<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(utils::short_type_name(self.name))
    }
}

pub trait System: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn id(&self) -> SystemId;

    fn run(&mut self, registry: &mut Registry, ticks: SystemTicks);
}

/// Something that can be fetched from the registry as a system argument.
pub trait SystemParam: Sized {
    /// The same parameter with its borrow bound to `'w`.
    type Item<'w>: SystemParam;

    fn fetch(registry: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError>;
}

pub type SystemParamItem<'w, P> = <P as SystemParam>::Item<'w>;

/// A function whose arguments are all [`SystemParam`]s. `Marker` is the
/// function pointer type matching its signature; it only exists to keep the
/// impls for different arities apart.
pub trait SystemParamFunction<Marker>: Send + Sync + 'static {
    type Param: SystemParam;

    fn run(&mut self, params: SystemParamItem<'_, Self::Param>);
}

macro_rules! impl_system_function {
    ($($param:ident),*) => {
        #[allow(non_snake_case)]
        impl<Func, $($param: SystemParam),*> SystemParamFunction<fn($($param,)*)> for Func
        where
            Func: Send + Sync + 'static,
            for<'a> &'a mut Func:
                FnMut($($param),*) +
                FnMut($(SystemParamItem<$param>),*),
        {
            type Param = ($($param,)*);

            #[inline]
            fn run(&mut self, params: SystemParamItem<'_, ($($param,)*)>) {
                // Calling `self` directly does not compile: rustc cannot pick
                // between the two `FnMut` impls.
                fn call_inner<$($param,)*>(mut f: impl FnMut($($param,)*), $($param: $param,)*) {
                    f($($param,)*)
                }

                let ($($param,)*) = params;
                call_inner(self, $($param),*)
            }
        }
    };
}

impl_system_function!();
impl_system_function!(P0);
impl_system_function!(P0, P1);
impl_system_function!(P0, P1, P2);
impl_system_function!(P0, P1, P2, P3);
impl_system_function!(P0, P1, P2, P3, P4);
impl_system_function!(P0, P1, P2, P3, P4, P5);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6, P7);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6, P7, P8);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6, P7, P8, P9);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6, P7, P8, P9, P10);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6, P7, P8, P9, P10, P11);

/// A system built from a [`SystemParamFunction`].
pub struct FunctionSystem<F, Marker> {
    func: F,
    marker: PhantomData<fn() -> Marker>,
}

impl<F, Marker> System for FunctionSystem<F, Marker>
where
    F: SystemParamFunction<Marker>,
    Marker: 'static,
{
    fn name(&self) -> &'static str {
        any::type_name::<F>()
    }

    fn id(&self) -> SystemId {
        SystemId::of_type::<F>()
    }

    fn run(&mut self, registry: &mut Registry, ticks: SystemTicks) {
        let params = match F::Param::fetch(registry, ticks) {
            Ok(params) => params,
            Err(err) => {
                error!(system = self.name(), error = %err, "failed to fetch system parameters");
                panic!("System {} could not run: {}", self.name(), err);
            }
        };

        self.func.run(params);
    }
}

impl<F, Marker> fmt::Debug for FunctionSystem<F, Marker> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSystem")
            .field("func", &any::type_name::<F>())
            .finish()
    }
}

/// A system with exclusive access to the registry.
pub struct ExclusiveSystem<F> {
    func: F,
}

impl<F> System for ExclusiveSystem<F>
where
    F: FnMut(&mut Registry) + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        any::type_name::<F>()
    }

    fn id(&self) -> SystemId {
        SystemId::of_type::<F>()
    }

    fn run(&mut self, registry: &mut Registry, _: SystemTicks) {
        (self.func)(registry)
    }
}

impl<F> fmt::Debug for ExclusiveSystem<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveSystem")
            .field("func", &any::type_name::<F>())
            .finish()
    }
}

#[doc(hidden)]
#[derive(Debug)]
pub struct FunctionMarker;

#[doc(hidden)]
#[derive(Debug)]
pub struct ExclusiveMarker;

#[doc(hidden)]
#[derive(Debug)]
pub struct ConfigMarker;

pub trait IntoSystem<Marker> {
    type System: System;

    fn into_system(self) -> Self::System;
}

impl<F, Marker> IntoSystem<(FunctionMarker, Marker)> for F
where
    F: SystemParamFunction<Marker>,
    Marker: 'static,
{
    type System = FunctionSystem<F, Marker>;

    fn into_system(self) -> Self::System {
        FunctionSystem {
            func: self,
            marker: PhantomData,
        }
    }
}

impl<F> IntoSystem<ExclusiveMarker> for F
where
    F: FnMut(&mut Registry) + Send + Sync + 'static,
{
    type System = ExclusiveSystem<F>;

    fn into_system(self) -> Self::System {
        ExclusiveSystem { func: self }
    }
}

/// A system together with its placement within a stage.
pub struct SystemConfig {
    pub(crate) system: Box<dyn System>,
    pub(crate) before: Vec<SystemId>,
    pub(crate) after: Vec<SystemId>,
    pub(crate) enabled: bool,
}

impl SystemConfig {
    pub fn new<M, S: IntoSystem<M>>(system: S) -> Self {
        Self {
            system: Box::new(system.into_system()),
            before: Vec::new(),
            after: Vec::new(),
            enabled: true,
        }
    }

    pub fn id(&self) -> SystemId {
        self.system.id()
    }
}

impl fmt::Debug for SystemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemConfig")
            .field("system", &self.system.name())
            .field("before", &self.before)
            .field("after", &self.after)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Conversion into a [`SystemConfig`], with builder methods available
/// directly on functions:
///
/// ```
/// # use sparse_ecs::{IntoSystemConfig, Registry};
/// # fn load(_: &mut Registry) {}
/// # fn spawn(_: &mut Registry) {}
/// # let mut registry = Registry::new();
/// registry.add_startup_system(load);
/// registry.add_startup_system(spawn.after(load));
/// ```
pub trait IntoSystemConfig<Marker>: Sized {
    fn into_config(self) -> SystemConfig;

    /// Runs this system before the system built from `system`.
    fn before<T: 'static>(self, system: T) -> SystemConfig {
        let mut config = self.into_config();
        config.before.push(SystemId::of(&system));
        config
    }

    /// Runs this system after the system built from `system`.
    fn after<T: 'static>(self, system: T) -> SystemConfig {
        let mut config = self.into_config();
        config.after.push(SystemId::of(&system));
        config
    }

    /// Registers the system disabled; it keeps its place in the order and
    /// runs once enabled.
    fn disabled(self) -> SystemConfig {
        let mut config = self.into_config();
        config.enabled = false;
        config
    }
}

impl<M, S: IntoSystem<M>> IntoSystemConfig<M> for S {
    fn into_config(self) -> SystemConfig {
        SystemConfig::new(self)
    }
}

impl IntoSystemConfig<ConfigMarker> for SystemConfig {
    fn into_config(self) -> SystemConfig {
        self
    }
}

/// Entities that lost a `T` since the end of the previous update.
pub struct RemovedComponents<'w, T: Component> {
    entities: &'w [Entity],
    marker: PhantomData<fn() -> T>,
}

impl<'w, T: Component> RemovedComponents<'w, T> {
    pub fn new(entities: &'w [Entity]) -> Self {
        Self {
            entities,
            marker: PhantomData,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Entity> + 'w {
        self.entities.iter().copied()
    }

    pub fn as_slice(&self) -> &'w [Entity] {
        self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<T: Component> fmt::Debug for RemovedComponents<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovedComponents")
            .field("type", &any::type_name::<T>())
            .field("entities", &self.entities)
            .finish()
    }
}

mod impls {
    use super::*;

    impl<D, F> SystemParam for Querier<'_, D, F>
    where
        D: QueryData + 'static,
        F: QueryFilter + 'static,
    {
        type Item<'w> = Querier<'w, D, F>;

        fn fetch(registry: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            Querier::new(registry, ticks)
        }
    }

    impl<T: Resource> SystemParam for Res<'_, T> {
        type Item<'w> = Res<'w, T>;

        fn fetch(registry: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            let slot = registry.resource_storage().try_slot::<T>()?;
            Ok(Res::new(slot, ticks.last_run))
        }
    }

    impl<T: Resource> SystemParam for ResMut<'_, T> {
        type Item<'w> = ResMut<'w, T>;

        fn fetch(registry: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            let slot = registry.resource_storage().try_slot_mut::<T>()?;
            Ok(ResMut::new(slot, ticks.last_run, ticks.this_run))
        }
    }

    impl<T: Resource> SystemParam for Option<Res<'_, T>> {
        type Item<'w> = Option<Res<'w, T>>;

        fn fetch(registry: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            match Res::<T>::fetch(registry, ticks) {
                Ok(res) => Ok(Some(res)),
                Err(RetrievalError::NoSuchResource(_)) => Ok(None),
                Err(err) => Err(err),
            }
        }
    }

    impl<T: Resource> SystemParam for Option<ResMut<'_, T>> {
        type Item<'w> = Option<ResMut<'w, T>>;

        fn fetch(registry: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            match ResMut::<T>::fetch(registry, ticks) {
                Ok(res) => Ok(Some(res)),
                Err(RetrievalError::NoSuchResource(_)) => Ok(None),
                Err(err) => Err(err),
            }
        }
    }

    impl SystemParam for Commands<'_> {
        type Item<'w> = Commands<'w>;

        fn fetch(registry: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            registry
                .command_queue()
                .try_borrow_mut()
                .map(Commands::new)
                .ok_or(RetrievalError::CommandQueueInUse)
        }
    }

    impl<T: Event> SystemParam for EventReader<'_, T> {
        type Item<'w> = EventReader<'w, T>;

        fn fetch(registry: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            registry.event_storage().try_reader::<T>().map(EventReader::new)
        }
    }

    impl<T: Event> SystemParam for EventMutator<'_, T> {
        type Item<'w> = EventMutator<'w, T>;

        fn fetch(registry: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            registry.event_storage().try_mutator::<T>().map(EventMutator::new)
        }
    }

    impl<T: Event> SystemParam for EventWriter<'_, T> {
        type Item<'w> = EventWriter<'w, T>;

        fn fetch(registry: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            registry.event_storage().try_writer::<T>().map(EventWriter::new)
        }
    }

    impl<T: Component> SystemParam for RemovedComponents<'_, T> {
        type Item<'w> = RemovedComponents<'w, T>;

        fn fetch(registry: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            Ok(RemovedComponents::new(registry.removed::<T>()))
        }
    }

    impl SystemParam for &'_ Registry {
        type Item<'w> = &'w Registry;

        fn fetch(registry: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            Ok(registry)
        }
    }

    impl SystemParam for SystemTicks {
        type Item<'w> = SystemTicks;

        fn fetch(_: &Registry, ticks: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            Ok(ticks)
        }
    }

    impl SystemParam for () {
        type Item<'w> = ();

        fn fetch(_: &Registry, _: SystemTicks) -> Result<Self::Item<'_>, RetrievalError> {
            Ok(())
        }
    }

    macro_rules! impl_sp {
        ($($t:tt),+) => {
            impl<$($t),+> SystemParam for ($($t,)+)
            where
                $(
                    $t: SystemParam,
                )+
            {
                type Item<'w> = ($($t::Item<'w>,)+);

                fn fetch(
                    registry: &Registry,
                    ticks: SystemTicks,
                ) -> Result<Self::Item<'_>, RetrievalError> {
                    Ok(($(<$t as SystemParam>::fetch(registry, ticks)?,)+))
                }
            }
        };
    }

    impl_sp!(T0);
    impl_sp!(T0, T1);
    impl_sp!(T0, T1, T2);
    impl_sp!(T0, T1, T2, T3);
    impl_sp!(T0, T1, T2, T3, T4);
    impl_sp!(T0, T1, T2, T3, T4, T5);
    impl_sp!(T0, T1, T2, T3, T4, T5, T6);
    impl_sp!(T0, T1, T2, T3, T4, T5, T6, T7);
    impl_sp!(T0, T1, T2, T3, T4, T5, T6, T7, T8);
    impl_sp!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9);
    impl_sp!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
    impl_sp!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first() {}
    fn second() {}

    #[test]
    fn ids_follow_the_function() {
        assert_eq!(SystemId::of(&first), SystemId::of(&first));
        assert_ne!(SystemId::of(&first), SystemId::of(&second));
        assert_eq!(first.into_system().id(), SystemId::of(&first));
        assert_eq!(SystemId::of(&first).to_string(), "first");
    }

    #[test]
    fn config_builders_stack() {
        let config = first.after(second).before(second).disabled();

        assert_eq!(config.id(), SystemId::of(&first));
        assert_eq!(config.after, vec![SystemId::of(&second)]);
        assert_eq!(config.before, vec![SystemId::of(&second)]);
        assert!(!config.enabled);
    }

    #[test]
    fn exclusive_systems_see_the_registry() {
        let mut registry = Registry::new();
        let mut system = (|registry: &mut Registry| {
            registry.init_resource(5u8);
        })
        .into_system();

        system.run(&mut registry, SystemTicks::default());

        assert_eq!(*registry.resource::<u8>(), 5);
    }
}
