use std::fmt;

use crate::{
    registry::Registry,
    storage::{Tick, TICK_NEVER},
    system::{IntoSystemConfig, System, SystemConfig, SystemId, SystemTicks},
};

/// A boxed system plus the bookkeeping the schedule needs to run it: its
/// ordering constraints, whether it is enabled and the tick it last ran at.
pub struct SystemExecutor {
    system: Box<dyn System>,
    id: SystemId,
    before: Vec<SystemId>,
    after: Vec<SystemId>,
    enabled: bool,
    last_run: Tick,
}

impl SystemExecutor {
    pub fn new<M>(system: impl IntoSystemConfig<M>) -> Self {
        let SystemConfig {
            system,
            before,
            after,
            enabled,
        } = system.into_config();

        Self {
            id: system.id(),
            system,
            before,
            after,
            enabled,
            last_run: TICK_NEVER,
        }
    }

    /// Runs the system at the registry's current tick, then advances the
    /// tick by one.
    pub fn execute(&mut self, registry: &mut Registry) {
        let this_run = registry.tick();
        let ticks = SystemTicks {
            last_run: self.last_run,
            this_run,
        };

        self.system.run(registry, ticks);

        self.last_run = this_run;
        registry.advance_tick();
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.system.name()
    }

    pub fn before(&self) -> &[SystemId] {
        &self.before
    }

    pub fn after(&self) -> &[SystemId] {
        &self.after
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn last_run(&self) -> Tick {
        self.last_run
    }
}

impl fmt::Debug for SystemExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemExecutor")
            .field("system", &self.system.name())
            .field("before", &self.before)
            .field("after", &self.after)
            .field("enabled", &self.enabled)
            .field("last_run", &self.last_run)
            .finish()
    }
}
