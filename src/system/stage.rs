//! Stages and the schedules that sequence them.
//!
//! A [`Schedule`] is an ordered list of [`Stage`]s, each named by a label
//! type. Stages run strictly one after another; inside a stage the
//! [`SystemSchedule`] decides the order.

use std::any;

use tracing::debug;

use crate::{
    error::ScheduleError,
    id::{StageId, TypeIdMap},
    registry::Registry,
    system::{IntoSystemConfig, SystemId, SystemSchedule},
    utils,
};

/// A type naming a stage. Labels are usually unit structs:
///
/// ```
/// # use sparse_ecs::StageLabel;
/// struct Physics;
/// impl StageLabel for Physics {}
/// ```
pub trait StageLabel: Send + Sync + 'static {}

macro_rules! labels {
    ($($(#[$meta:meta])* $label:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
            pub struct $label;

            impl StageLabel for $label {}
        )*
    };
}

labels! {
    /// The only stage of the startup schedule.
    Startup,
    /// First stage of every update.
    First,
    PreUpdate,
    /// Default stage of the update schedule.
    Update,
    PostUpdate,
    /// Last stage of every update.
    Last,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
struct Internal;

impl StageLabel for Internal {}

#[derive(Debug)]
pub struct Stage {
    id: StageId,
    name: &'static str,
    systems: SystemSchedule,
}

impl Stage {
    fn new<L: StageLabel>(id: StageId) -> Self {
        let name = utils::short_type_name(any::type_name::<L>());

        Self {
            id,
            name,
            systems: SystemSchedule::new(name),
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn systems(&self) -> &SystemSchedule {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut SystemSchedule {
        &mut self.systems
    }
}

/// An ordered group of stages with an optional default stage that receives
/// systems added without a label.
#[derive(Debug, Default)]
pub struct Schedule {
    ids: TypeIdMap,
    stages: Vec<Stage>,
    default: Option<StageId>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage_id<L: StageLabel>(&self) -> Option<StageId> {
        self.ids.get::<L>()
    }

    fn position_of(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.id == id)
    }

    fn position<L: StageLabel>(&self) -> Option<usize> {
        self.stage_id::<L>().and_then(|id| self.position_of(id))
    }

    fn new_stage<L: StageLabel>(&mut self) -> Stage {
        assert!(
            self.position::<L>().is_none(),
            "Stage {} already exists",
            any::type_name::<L>()
        );

        Stage::new::<L>(self.ids.id_of::<L>())
    }

    fn expect_position<L: StageLabel>(&self) -> usize {
        match self.position::<L>() {
            Some(position) => position,
            None => panic!("No stage {} exists", any::type_name::<L>()),
        }
    }

    /// Appends a stage.
    ///
    /// # Panics
    /// If a stage with this label already exists.
    pub fn add_stage<L: StageLabel>(&mut self, _label: L) -> &mut Self {
        let stage = self.new_stage::<L>();
        debug!(stage = stage.name, "stage added");
        self.stages.push(stage);
        self
    }

    /// Inserts a stage directly before `target`.
    ///
    /// # Panics
    /// If `target` does not exist or `label` already does.
    pub fn add_stage_before<T, L>(&mut self, _target: T, _label: L) -> &mut Self
    where
        T: StageLabel,
        L: StageLabel,
    {
        let position = self.expect_position::<T>();
        let stage = self.new_stage::<L>();
        debug!(stage = stage.name, before = self.stages[position].name, "stage added");
        self.stages.insert(position, stage);
        self
    }

    /// Inserts a stage directly after `target`.
    ///
    /// # Panics
    /// If `target` does not exist or `label` already does.
    pub fn add_stage_after<T, L>(&mut self, _target: T, _label: L) -> &mut Self
    where
        T: StageLabel,
        L: StageLabel,
    {
        let position = self.expect_position::<T>();
        let stage = self.new_stage::<L>();
        debug!(stage = stage.name, after = self.stages[position].name, "stage added");
        self.stages.insert(position + 1, stage);
        self
    }

    /// Replaces `target` and its systems with an empty stage named `label`,
    /// keeping its position. Appends when `target` does not exist. If
    /// `target` was the default stage, the new stage becomes the default.
    ///
    /// # Panics
    /// If `label` names a stage other than `target` that already exists.
    pub fn insert_stage<T, L>(&mut self, _target: T, _label: L) -> &mut Self
    where
        T: StageLabel,
        L: StageLabel,
    {
        match self.position::<T>() {
            Some(position) => {
                let old = self.stages[position].id;
                let stage = if self.stage_id::<L>() == Some(old) {
                    Stage::new::<L>(old)
                } else {
                    self.new_stage::<L>()
                };

                debug!(stage = stage.name, replaced = self.stages[position].name, "stage inserted");
                if self.default == Some(old) {
                    self.default = Some(stage.id);
                }
                self.stages[position] = stage;
            }
            None => {
                let stage = self.new_stage::<L>();
                debug!(stage = stage.name, "stage inserted");
                self.stages.push(stage);
            }
        }
        self
    }

    /// # Panics
    /// If no stage with this label exists.
    pub fn set_default_stage<L: StageLabel>(&mut self, _label: L) -> &mut Self {
        let position = self.expect_position::<L>();
        self.default = Some(self.stages[position].id);
        self
    }

    pub fn default_stage(&self) -> Option<&'static str> {
        self.default
            .and_then(|id| self.position_of(id))
            .map(|position| self.stages[position].name)
    }

    pub fn contains_stage<L: StageLabel>(&self) -> bool {
        self.position::<L>().is_some()
    }

    /// Adds a system to the default stage.
    ///
    /// # Panics
    /// If the schedule has no default stage.
    pub fn add_system<M>(&mut self, system: impl IntoSystemConfig<M>) -> SystemId {
        let position = match self.default.and_then(|id| self.position_of(id)) {
            Some(position) => position,
            None => panic!("Schedule has no default stage to add systems to"),
        };

        self.stages[position].systems.add(system)
    }

    /// # Panics
    /// If no stage with this label exists.
    pub fn add_system_to<L, M>(&mut self, _label: L, system: impl IntoSystemConfig<M>) -> SystemId
    where
        L: StageLabel,
    {
        let position = self.expect_position::<L>();
        self.stages[position].systems.add(system)
    }

    /// Removes the system from every stage. Returns how many entries were
    /// removed.
    pub fn remove_system(&mut self, id: SystemId) -> usize {
        self.stages
            .iter_mut()
            .map(|stage| stage.systems.remove(id))
            .sum()
    }

    pub fn enable_system(&mut self, id: SystemId) -> bool {
        self.stages
            .iter_mut()
            .fold(false, |found, stage| stage.systems.enable(id) || found)
    }

    pub fn disable_system(&mut self, id: SystemId) -> bool {
        self.stages
            .iter_mut()
            .fold(false, |found, stage| stage.systems.disable(id) || found)
    }

    pub fn contains_system(&self, id: SystemId) -> bool {
        self.stages.iter().any(|stage| stage.systems.contains(id))
    }

    /// Resolves the system order of every stage.
    pub fn ready(&mut self) -> Result<(), ScheduleError> {
        self.stages
            .iter_mut()
            .try_for_each(|stage| stage.systems.ready())
    }

    pub fn is_ready(&self) -> bool {
        self.stages.iter().all(|stage| stage.systems.is_ready())
    }

    /// Runs every stage once, in order.
    pub fn run(&mut self, registry: &mut Registry) {
        for stage in &mut self.stages {
            stage.systems.run(registry);
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> + '_ {
        self.stages.iter()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn system_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.systems.len()).sum()
    }
}

/// The three schedule groups a registry drives.
#[derive(Debug)]
pub struct Schedules {
    pub(crate) startup: Schedule,
    pub(crate) update: Schedule,
    pub(crate) internal: Schedule,
}

impl Schedules {
    pub fn new() -> Self {
        let mut startup = Schedule::new();
        startup.add_stage(Startup).set_default_stage(Startup);

        let mut update = Schedule::new();
        update
            .add_stage(First)
            .add_stage(PreUpdate)
            .add_stage(Update)
            .add_stage(PostUpdate)
            .add_stage(Last)
            .set_default_stage(Update);

        let mut internal = Schedule::new();
        internal.add_stage(Internal).set_default_stage(Internal);

        Self {
            startup,
            update,
            internal,
        }
    }

    pub fn startup(&self) -> &Schedule {
        &self.startup
    }

    pub fn update(&self) -> &Schedule {
        &self.update
    }

    pub fn ready(&mut self) -> Result<(), ScheduleError> {
        self.startup.ready()?;
        self.update.ready()?;
        self.internal.ready()
    }

    pub fn is_ready(&self) -> bool {
        self.startup.is_ready() && self.update.is_ready() && self.internal.is_ready()
    }
}

impl Default for Schedules {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Physics;
    impl StageLabel for Physics {}

    struct Render;
    impl StageLabel for Render {}

    #[derive(Default)]
    struct Trace(Vec<&'static str>);

    fn physics(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("physics");
    }

    fn update(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("update");
    }

    fn last(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("last");
    }

    #[test]
    fn update_group_layout() {
        let schedules = Schedules::new();

        assert_eq!(
            schedules.update().stage_names(),
            vec!["First", "PreUpdate", "Update", "PostUpdate", "Last"]
        );
        assert_eq!(schedules.update().default_stage(), Some("Update"));
        assert_eq!(schedules.startup().stage_names(), vec!["Startup"]);
    }

    #[test]
    fn stages_before_and_after() {
        let mut schedule = Schedules::new().update;
        schedule.add_stage_before(Update, Physics);
        schedule.add_stage_after(Last, Render);

        assert_eq!(
            schedule.stage_names(),
            vec!["First", "PreUpdate", "Physics", "Update", "PostUpdate", "Last", "Render"]
        );
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn stage_label_collision() {
        let mut schedule = Schedule::new();
        schedule.add_stage(Update);
        schedule.add_stage(Update);
    }

    #[test]
    #[should_panic(expected = "No stage")]
    fn unknown_target_stage() {
        let mut schedule = Schedule::new();
        schedule.add_stage_after(Update, Physics);
    }

    #[test]
    fn insert_stage_replaces_or_appends() {
        let mut schedule = Schedules::new().update;
        schedule.add_system(update);

        schedule.insert_stage(Update, Physics);
        assert_eq!(
            schedule.stage_names(),
            vec!["First", "PreUpdate", "Physics", "PostUpdate", "Last"]
        );
        assert_eq!(schedule.default_stage(), Some("Physics"));
        assert!(!schedule.contains_system(SystemId::of(&update)));
        assert!(!schedule.contains_stage::<Update>());

        schedule.insert_stage(Update, Render);
        assert_eq!(schedule.stage_names().last(), Some(&"Render"));
    }

    #[test]
    fn stages_run_in_order() {
        let mut schedule = Schedules::new().update;
        schedule.add_stage_before(Update, Physics);
        schedule.add_system_to(Last, last);
        schedule.add_system(update);
        schedule.add_system_to(Physics, physics);
        schedule.ready().unwrap();

        let mut registry = Registry::new();
        registry.init_resource(Trace::default());
        schedule.run(&mut registry);

        assert_eq!(
            registry.resource::<Trace>().0,
            vec!["physics", "update", "last"]
        );
    }

    #[test]
    fn system_toggles_reach_every_stage() {
        let mut schedule = Schedules::new().update;
        schedule.add_system_to(First, update);
        schedule.add_system(update);

        assert!(schedule.disable_system(SystemId::of(&update)));
        assert!(schedule.enable_system(SystemId::of(&update)));
        assert!(!schedule.enable_system(SystemId::of(&last)));
        assert_eq!(schedule.remove_system(SystemId::of(&update)), 2);
        assert_eq!(schedule.system_count(), 0);
    }

    #[test]
    #[should_panic(expected = "no default stage")]
    fn add_without_default_stage() {
        let mut schedule = Schedule::new();
        schedule.add_stage(Physics);
        schedule.add_system(physics);
    }
}
