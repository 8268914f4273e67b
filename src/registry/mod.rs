//! The [`Registry`]: owner of every storage and driver of the tick loop.

use std::{any, mem};

use tracing::{debug, trace};

use crate::{
    cell::AtomicRefCell,
    command::{CommandQueue, Commands},
    component::{Component, ComponentTuple},
    config::{RegistryBuilder, RegistryConfig},
    entity::Entity,
    error::{RetrievalError, ScheduleError},
    event::{Event, EventMutator, EventReader},
    resource::{Resource, ResourceTuple},
    storage::{
        ComponentStorage, EntityStorage, EventStorage, Res, ResMut, ResourceStorage, Tick,
        TICK_NEVER, TICK_START,
    },
    system::{IntoSystemConfig, Schedule, Schedules, StageLabel, SystemId, SystemTicks},
};

pub mod query;

pub use query::{
    Added, Changed, Mut, Querier, QuerierIter, QuerierIterMut, QueryData, QueryFilter, With,
    Without,
};

/// Entities, components, resources, events, pending commands and the
/// schedules that run systems over them.
///
/// ```
/// # use sparse_ecs::{Component, Querier, Registry};
/// struct Position(f32);
/// impl Component for Position {}
///
/// fn drift(mut query: Querier<&mut Position>) {
///     query.for_each_mut(|mut position| position.0 += 1.0);
/// }
///
/// let mut registry = Registry::new();
/// let entity = registry.spawn(Position(0.0));
/// registry.add_update_system(drift);
/// registry.ready().unwrap();
///
/// registry.startup();
/// registry.update();
///
/// assert_eq!(registry.get::<Position>(entity).0, 1.0);
/// ```
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    entities: EntityStorage,
    components: ComponentStorage,
    resources: ResourceStorage,
    events: EventStorage,
    commands: AtomicRefCell<CommandQueue>,
    schedules: Schedules,
    tick: Tick,
}

impl Registry {
    pub fn new() -> Self {
        RegistryBuilder::new().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            entities: EntityStorage::with_capacity(config.entity_capacity),
            components: ComponentStorage::with_capacity(config.component_capacity),
            resources: ResourceStorage::with_capacity(config.resource_capacity),
            events: EventStorage::new(),
            commands: AtomicRefCell::new(CommandQueue::with_capacity(config.command_capacity)),
            schedules: Schedules::new(),
            tick: TICK_START,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The tick the next system run will be stamped with.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub(crate) fn advance_tick(&mut self) {
        self.tick += 1;
        trace!(tick = self.tick, "tick advanced");
    }

    // Entities

    /// Creates an entity carrying `components`.
    ///
    /// # Panics
    /// If the bundle names a component type twice.
    pub fn spawn<B: ComponentTuple>(&mut self, components: B) -> Entity {
        let ids = B::ids(&self.components);
        let entity = self.entities.emplace(&ids);
        components.store(entity, self.tick, &mut self.components);
        entity
    }

    /// Spawns one entity per bundle.
    pub fn spawn_batch<B, I>(&mut self, bundles: I) -> Vec<Entity>
    where
        B: ComponentTuple,
        I: IntoIterator<Item = B>,
    {
        let ids = B::ids(&self.components);

        bundles
            .into_iter()
            .map(|components| {
                let entity = self.entities.emplace(&ids);
                components.store(entity, self.tick, &mut self.components);
                entity
            })
            .collect()
    }

    /// Destroys an entity and every component it carries. Returns `false`,
    /// doing nothing, if the entity is not alive.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.entities.contain(entity) {
            debug!(%entity, "ignored despawn of dead entity");
            return false;
        }

        let ids = self.entities.components(entity).to_vec();
        self.components.remove_ids(entity, &ids);
        self.entities.pop(entity);
        true
    }

    /// Attaches new components to a live entity. Returns `false`, doing
    /// nothing, if the entity is not alive.
    ///
    /// # Panics
    /// If the entity already carries one of the components.
    pub fn insert<B: ComponentTuple>(&mut self, entity: Entity, components: B) -> bool {
        if !self.entities.contain(entity) {
            debug!(%entity, bundle = any::type_name::<B>(), "ignored insert on dead entity");
            return false;
        }

        let ids = B::ids(&self.components);
        components.store(entity, self.tick, &mut self.components);
        self.entities.add(entity, &ids);
        true
    }

    /// Overwrites components of a live entity, stamping them changed.
    /// Returns `false`, doing nothing, if the entity is not alive.
    ///
    /// # Panics
    /// If the entity lacks one of the components.
    pub fn replace<B: ComponentTuple>(&mut self, entity: Entity, components: B) -> bool {
        if !self.entities.contain(entity) {
            debug!(%entity, bundle = any::type_name::<B>(), "ignored replace on dead entity");
            return false;
        }

        components.replace(entity, self.tick, &mut self.components);
        true
    }

    /// Detaches the bundle's components from a live entity, skipping the
    /// ones it does not carry. Returns `false`, doing nothing, if the entity
    /// is not alive.
    pub fn remove<B: ComponentTuple>(&mut self, entity: Entity) -> bool {
        if !self.entities.contain(entity) {
            debug!(%entity, bundle = any::type_name::<B>(), "ignored remove on dead entity");
            return false;
        }

        let ids = B::ids(&self.components);
        self.components.remove_ids(entity, &ids);
        self.entities.remove(entity, &ids);
        true
    }

    /// Detaches a single component and hands it back.
    pub fn take<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.entities.contain(entity) {
            return None;
        }

        let value = self.components.remove::<T>(entity)?;
        let id = self.components.id_of::<T>();
        self.entities.remove(entity, &[id]);
        Some(value)
    }

    /// Read guards for the bundle's components.
    ///
    /// # Panics
    /// If the entity is dead or lacks one of the components, or a component
    /// set is borrowed mutably.
    pub fn get<B: ComponentTuple>(&self, entity: Entity) -> B::Refs<'_> {
        match self.try_get::<B>(entity) {
            Some(refs) => refs,
            None => panic!(
                "Entity {} does not contain every component of {}",
                entity,
                any::type_name::<B>()
            ),
        }
    }

    pub fn try_get<B: ComponentTuple>(&self, entity: Entity) -> Option<B::Refs<'_>> {
        if !self.entities.contain(entity) {
            return None;
        }

        B::fetch(&self.components, entity)
    }

    /// A write view of one component, stamping it changed at the current
    /// tick on any access.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<Mut<'_, T>> {
        if !self.entities.contain(entity) {
            return None;
        }
        self.components.get_id::<T>()?;

        let ticks = SystemTicks {
            last_run: TICK_NEVER,
            this_run: self.tick,
        };
        let (value, added, changed) = self
            .components
            .set_exclusive::<T>()
            .get_with_ticks_mut(entity)?;

        Some(Mut::new(value, added, changed, ticks))
    }

    /// True if the entity is alive and carries every component of the
    /// bundle.
    pub fn has<B: ComponentTuple>(&self, entity: Entity) -> bool {
        let mut ids = Vec::new();
        B::component_ids(&self.components, &mut ids);
        self.entities.has(entity, &ids)
    }

    pub fn alive(&self, entity: Entity) -> bool {
        self.entities.contain(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter()
    }

    /// Entities that lost a `T` since the end of the last update.
    pub fn removed<T: Component>(&self) -> &[Entity] {
        self.components.removed::<T>()
    }

    /// Drops every entity, component, resource, buffered event and pending
    /// command. Systems, stages and initialised event types stay.
    pub fn clear(&mut self) {
        self.commands.get_mut().clear();
        self.entities.clear();
        self.components.clear();
        self.resources.clear();
        self.events.clear();
        debug!("registry cleared");
    }

    // Resources

    /// Stores `value` as the `T` resource. Returns `false`, dropping
    /// `value`, if a `T` is already present.
    pub fn init_resource<T: Resource>(&mut self, value: T) -> bool {
        let stored = self.resources.init(self.tick, value);
        if !stored {
            debug!(resource = any::type_name::<T>(), "ignored duplicate resource");
        }
        stored
    }

    /// Like [`init_resource`](Self::init_resource), but only builds the value
    /// if `T` is absent.
    pub fn init_resource_with<T: Resource>(&mut self, f: impl FnOnce() -> T) -> bool {
        self.resources.init_with(self.tick, f)
    }

    /// Initialises every member of the tuple that is not present yet.
    pub fn init_resources<R: ResourceTuple>(&mut self, resources: R) {
        resources.store(self.tick, &mut self.resources);
    }

    /// Takes the `T` resource out. `None` if there was none.
    pub fn remove_resource<T: Resource>(&mut self) -> Option<T> {
        self.resources.deinit::<T>()
    }

    pub fn contains_resource<T: Resource>(&self) -> bool {
        self.resources.contains::<T>()
    }

    pub fn resources_exist<R: ResourceTuple>(&self) -> bool {
        R::contains(&self.resources)
    }

    /// # Panics
    /// If `T` is absent or borrowed mutably.
    pub fn resource<T: Resource>(&self) -> Res<'_, T> {
        self.try_resource::<T>().unwrap_or_else(|err| panic!("{}", err))
    }

    /// # Panics
    /// If `T` is absent or already borrowed.
    pub fn resource_mut<T: Resource>(&self) -> ResMut<'_, T> {
        self.try_resource_mut::<T>().unwrap_or_else(|err| panic!("{}", err))
    }

    pub fn try_resource<T: Resource>(&self) -> Result<Res<'_, T>, RetrievalError> {
        let slot = self.resources.try_slot::<T>()?;
        Ok(Res::new(slot, TICK_NEVER))
    }

    pub fn try_resource_mut<T: Resource>(&self) -> Result<ResMut<'_, T>, RetrievalError> {
        let slot = self.resources.try_slot_mut::<T>()?;
        Ok(ResMut::new(slot, TICK_NEVER, self.tick))
    }

    /// Read views of several resources at once.
    ///
    /// # Panics
    /// If one of them is absent or borrowed mutably.
    pub fn resources<R: ResourceTuple>(&self) -> R::Views<'_> {
        R::fetch(&self.resources, TICK_NEVER).unwrap_or_else(|err| panic!("{}", err))
    }

    /// Write views of several resources at once.
    ///
    /// # Panics
    /// If one of them is absent or already borrowed.
    pub fn resources_mut<R: ResourceTuple>(&self) -> R::ViewsMut<'_> {
        R::fetch_mut(&self.resources, TICK_NEVER, self.tick)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    // Events

    /// Creates the buffers of `T` and schedules their swap at the end of
    /// every update. Returns `false` if `T` was already initialised.
    pub fn init_event<T: Event>(&mut self) -> bool {
        if !self.events.init::<T>() {
            return false;
        }

        let internal = &mut self.schedules.internal;
        internal.add_system(swap_events::<T>);
        if let Err(err) = internal.ready() {
            panic!("{}", err);
        }

        debug!(event = any::type_name::<T>(), "event initialised");
        true
    }

    /// Drops the buffers of `T` and unschedules their swap.
    pub fn deinit_event<T: Event>(&mut self) -> bool {
        if !self.events.deinit::<T>() {
            return false;
        }

        self.schedules
            .internal
            .remove_system(SystemId::of(&swap_events::<T>));
        true
    }

    pub fn event_initialised<T: Event>(&self) -> bool {
        self.events.contains::<T>()
    }

    /// Queues an event, readable after the next update's swap.
    ///
    /// # Panics
    /// If `T` was not initialised.
    pub fn event_write<T: Event>(&mut self, event: T) {
        self.events.write(event);
    }

    /// Events of `T` written before the last swap.
    ///
    /// # Panics
    /// If `T` was not initialised or its read buffer is borrowed mutably.
    pub fn event_read<T: Event>(&self) -> EventReader<'_, T> {
        self.events
            .try_reader::<T>()
            .map(EventReader::new)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    /// Like [`event_read`](Self::event_read), with mutable access to each
    /// event.
    pub fn event_mutate<T: Event>(&self) -> EventMutator<'_, T> {
        self.events
            .try_mutator::<T>()
            .map(EventMutator::new)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    // Queries

    /// Every entity matching `D`.
    ///
    /// # Panics
    /// If a component set `D` touches is borrowed in a conflicting way.
    pub fn query<D: QueryData>(&self) -> Querier<'_, D> {
        self.query_since::<D, ()>(TICK_NEVER)
    }

    pub fn query_filtered<D: QueryData, F: QueryFilter>(&self) -> Querier<'_, D, F> {
        self.query_since::<D, F>(TICK_NEVER)
    }

    /// Like [`query_filtered`](Self::query_filtered), with added/changed
    /// terms compared against `since`.
    pub fn query_since<D: QueryData, F: QueryFilter>(&self, since: Tick) -> Querier<'_, D, F> {
        let ticks = SystemTicks {
            last_run: since,
            this_run: self.tick,
        };
        Querier::new(self, ticks).unwrap_or_else(|err| panic!("{}", err))
    }

    /// Number of entities matching `D`, without borrowing any set past the
    /// scan.
    pub fn count<D: QueryData>(&self) -> usize {
        self.count_since::<D, ()>(TICK_NEVER)
    }

    pub fn count_filtered<D: QueryData, F: QueryFilter>(&self) -> usize {
        self.count_since::<D, F>(TICK_NEVER)
    }

    pub fn count_since<D: QueryData, F: QueryFilter>(&self, since: Tick) -> usize {
        query::scan::<D, F>(self, since)
            .map(|entities| entities.len())
            .unwrap_or_else(|err| panic!("{}", err))
    }

    // Commands

    /// Records commands from outside a system. They are applied by the next
    /// flush.
    ///
    /// # Panics
    /// If the queue is already borrowed.
    pub fn commands(&self) -> Commands<'_> {
        Commands::new(self.commands.borrow_mut())
    }

    /// Applies every pending command, including the ones queued by commands
    /// being applied.
    pub fn flush_commands(&mut self) {
        if self.commands.get_mut().is_empty() {
            return;
        }

        let mut applied = 0;
        let mut queue = mem::take(self.commands.get_mut());
        while !queue.is_empty() {
            applied += queue.len();
            queue.apply(self);
            mem::swap(&mut queue, self.commands.get_mut());
        }

        trace!(applied, "commands flushed");
    }

    // Scheduling

    pub fn schedules(&self) -> &Schedules {
        &self.schedules
    }

    pub fn add_startup_system<M>(&mut self, system: impl IntoSystemConfig<M>) -> &mut Self {
        self.schedules.startup.add_system(system);
        self
    }

    pub fn add_startup_system_to<L: StageLabel, M>(
        &mut self,
        label: L,
        system: impl IntoSystemConfig<M>,
    ) -> &mut Self {
        self.schedules.startup.add_system_to(label, system);
        self
    }

    pub fn add_update_system<M>(&mut self, system: impl IntoSystemConfig<M>) -> &mut Self {
        self.schedules.update.add_system(system);
        self
    }

    pub fn add_update_system_to<L: StageLabel, M>(
        &mut self,
        label: L,
        system: impl IntoSystemConfig<M>,
    ) -> &mut Self {
        self.schedules.update.add_system_to(label, system);
        self
    }

    /// Removes every registration of `system` from the startup schedule.
    pub fn remove_startup_system<S: 'static>(&mut self, system: S) -> usize {
        self.schedules.startup.remove_system(SystemId::of(&system))
    }

    /// Removes every registration of `system` from the update schedule.
    pub fn remove_update_system<S: 'static>(&mut self, system: S) -> usize {
        self.schedules.update.remove_system(SystemId::of(&system))
    }

    pub fn enable_startup_system<S: 'static>(&mut self, system: S) -> bool {
        self.schedules.startup.enable_system(SystemId::of(&system))
    }

    pub fn disable_startup_system<S: 'static>(&mut self, system: S) -> bool {
        self.schedules.startup.disable_system(SystemId::of(&system))
    }

    pub fn enable_update_system<S: 'static>(&mut self, system: S) -> bool {
        self.schedules.update.enable_system(SystemId::of(&system))
    }

    pub fn disable_update_system<S: 'static>(&mut self, system: S) -> bool {
        self.schedules.update.disable_system(SystemId::of(&system))
    }

    pub fn add_startup_stage<L: StageLabel>(&mut self, label: L) -> &mut Self {
        self.schedules.startup.add_stage(label);
        self
    }

    pub fn add_startup_stage_before<T: StageLabel, L: StageLabel>(
        &mut self,
        target: T,
        label: L,
    ) -> &mut Self {
        self.schedules.startup.add_stage_before(target, label);
        self
    }

    pub fn add_startup_stage_after<T: StageLabel, L: StageLabel>(
        &mut self,
        target: T,
        label: L,
    ) -> &mut Self {
        self.schedules.startup.add_stage_after(target, label);
        self
    }

    pub fn insert_startup_stage<T: StageLabel, L: StageLabel>(
        &mut self,
        target: T,
        label: L,
    ) -> &mut Self {
        self.schedules.startup.insert_stage(target, label);
        self
    }

    pub fn set_startup_default_stage<L: StageLabel>(&mut self, label: L) -> &mut Self {
        self.schedules.startup.set_default_stage(label);
        self
    }

    pub fn add_update_stage<L: StageLabel>(&mut self, label: L) -> &mut Self {
        self.schedules.update.add_stage(label);
        self
    }

    pub fn add_update_stage_before<T: StageLabel, L: StageLabel>(
        &mut self,
        target: T,
        label: L,
    ) -> &mut Self {
        self.schedules.update.add_stage_before(target, label);
        self
    }

    pub fn add_update_stage_after<T: StageLabel, L: StageLabel>(
        &mut self,
        target: T,
        label: L,
    ) -> &mut Self {
        self.schedules.update.add_stage_after(target, label);
        self
    }

    pub fn insert_update_stage<T: StageLabel, L: StageLabel>(
        &mut self,
        target: T,
        label: L,
    ) -> &mut Self {
        self.schedules.update.insert_stage(target, label);
        self
    }

    pub fn set_update_default_stage<L: StageLabel>(&mut self, label: L) -> &mut Self {
        self.schedules.update.set_default_stage(label);
        self
    }

    /// Resolves the system order of every stage. Must be called after the
    /// last system is registered and before the first `startup`/`update`.
    ///
    /// # Errors
    /// [`ScheduleError::OrderingCycle`] if a stage's before/after
    /// constraints contradict each other.
    pub fn ready(&mut self) -> Result<(), ScheduleError> {
        self.schedules.ready()?;
        debug!(
            startup = self.schedules.startup.system_count(),
            update = self.schedules.update.system_count(),
            "registry ready"
        );
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.schedules.is_ready()
    }

    /// Runs the startup schedule once, then applies the commands it queued.
    ///
    /// # Panics
    /// If systems were added since the last [`ready`](Self::ready).
    pub fn startup(&mut self) {
        self.assert_ready();

        self.run_schedule(|schedules| &mut schedules.startup);
        self.advance_tick();
        self.flush_commands();
    }

    /// Runs one update: the update schedule, then the removal-log reset, the
    /// command flush and finally the event swaps.
    ///
    /// # Panics
    /// If systems were added since the last [`ready`](Self::ready).
    pub fn update(&mut self) {
        self.assert_ready();

        self.run_schedule(|schedules| &mut schedules.update);
        self.advance_tick();
        self.components.clear_removed();
        self.flush_commands();
        self.run_schedule(|schedules| &mut schedules.internal);
    }

    fn assert_ready(&self) {
        assert!(
            self.is_ready(),
            "Registry::ready() must be called after the last system is added"
        );
    }

    /// Runs one schedule group with the registry borrowed mutably. The group
    /// is moved out for the run so systems can reach the rest of the
    /// registry, and goes back even if a system panics.
    fn run_schedule(&mut self, group: fn(&mut Schedules) -> &mut Schedule) {
        let schedule = mem::take(group(&mut self.schedules));
        let mut running = RunningSchedule {
            registry: self,
            group,
            schedule,
        };
        running.schedule.run(running.registry);
    }

    // Storage access

    pub fn entity_storage(&self) -> &EntityStorage {
        &self.entities
    }

    pub fn component_storage(&self) -> &ComponentStorage {
        &self.components
    }

    pub fn resource_storage(&self) -> &ResourceStorage {
        &self.resources
    }

    pub fn event_storage(&self) -> &EventStorage {
        &self.events
    }

    pub(crate) fn command_queue(&self) -> &AtomicRefCell<CommandQueue> {
        &self.commands
    }
}

/// A schedule group taken out of its registry for a run.
struct RunningSchedule<'r> {
    registry: &'r mut Registry,
    group: fn(&mut Schedules) -> &mut Schedule,
    schedule: Schedule,
}

impl Drop for RunningSchedule<'_> {
    fn drop(&mut self) {
        *(self.group)(&mut self.registry.schedules) = mem::take(&mut self.schedule);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn swap_events<T: Event>(registry: &mut Registry) {
    registry.events.swap::<T>();
    trace!(event = any::type_name::<T>(), "event buffers swapped");
}
