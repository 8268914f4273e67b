use std::{cmp::Reverse, collections::BinaryHeap};

use tracing::debug;

use crate::{
    error::ScheduleError,
    registry::Registry,
    system::{IntoSystemConfig, SystemExecutor, SystemId},
};

/// The systems of one stage.
///
/// Systems are kept in insertion order; [`ready`](Self::ready) resolves the
/// run order from their before/after constraints, breaking ties by insertion
/// order. Constraints naming a system that is not in this stage are ignored.
#[derive(Debug)]
pub struct SystemSchedule {
    name: &'static str,
    systems: Vec<SystemExecutor>,
    order: Vec<usize>,
    ready: bool,
}

impl SystemSchedule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            systems: Vec::new(),
            order: Vec::new(),
            ready: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn add<M>(&mut self, system: impl IntoSystemConfig<M>) -> SystemId {
        let executor = SystemExecutor::new(system);
        let id = executor.id();

        debug!(stage = self.name, system = %id, "system added");
        self.systems.push(executor);
        self.ready = false;
        id
    }

    /// Removes every system with the given id. Returns how many were removed.
    pub fn remove(&mut self, id: SystemId) -> usize {
        let before = self.systems.len();
        self.systems.retain(|system| system.id() != id);
        let removed = before - self.systems.len();

        if removed > 0 {
            debug!(stage = self.name, system = %id, removed, "system removed");
            if self.ready {
                // Dropping nodes cannot introduce a cycle.
                self.resolve().ok();
            } else {
                self.order.clear();
            }
        }

        removed
    }

    /// Enables every system with the given id. Returns whether any matched.
    pub fn enable(&mut self, id: SystemId) -> bool {
        self.set_enabled(id, true)
    }

    /// Disables every system with the given id. Disabled systems keep their
    /// place in the order. Returns whether any matched.
    pub fn disable(&mut self, id: SystemId) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: SystemId, enabled: bool) -> bool {
        let mut found = false;
        for system in self.systems.iter_mut().filter(|system| system.id() == id) {
            system.set_enabled(enabled);
            found = true;
        }

        if found {
            debug!(stage = self.name, system = %id, enabled, "system toggled");
        }
        found
    }

    pub fn contains(&self, id: SystemId) -> bool {
        self.systems.iter().any(|system| system.id() == id)
    }

    pub fn is_enabled(&self, id: SystemId) -> Option<bool> {
        self.systems
            .iter()
            .find(|system| system.id() == id)
            .map(SystemExecutor::is_enabled)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Resolves the run order.
    ///
    /// # Errors
    /// [`ScheduleError::OrderingCycle`] if the constraints contradict each
    /// other. The schedule then stays unready.
    pub fn ready(&mut self) -> Result<(), ScheduleError> {
        self.resolve()?;

        debug!(
            stage = self.name,
            order = ?self.order().map(|system| system.id().to_string()).collect::<Vec<_>>(),
            "system order resolved"
        );
        Ok(())
    }

    fn resolve(&mut self) -> Result<(), ScheduleError> {
        let count = self.systems.len();
        let mut edges = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];

        let mut add_edge = |from: usize, to: usize| {
            if from != to {
                edges[from].push(to);
                in_degree[to] += 1;
            }
        };

        for (index, system) in self.systems.iter().enumerate() {
            for (other, candidate) in self.systems.iter().enumerate() {
                if system.after().contains(&candidate.id()) {
                    add_edge(other, index);
                }
                if system.before().contains(&candidate.id()) {
                    add_edge(index, other);
                }
            }
        }

        let mut queue: BinaryHeap<_> = (0..count)
            .filter(|&index| in_degree[index] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = queue.pop() {
            order.push(index);
            for &next in &edges[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(Reverse(next));
                }
            }
        }

        if order.len() != count {
            self.ready = false;
            return Err(ScheduleError::OrderingCycle {
                stage: self.name,
                systems: (0..count)
                    .filter(|&index| in_degree[index] > 0)
                    .map(|index| self.systems[index].name())
                    .collect(),
            });
        }

        self.order = order;
        self.ready = true;
        Ok(())
    }

    /// Systems in resolved run order.
    pub fn order(&self) -> impl Iterator<Item = &SystemExecutor> + '_ {
        self.order.iter().map(move |&index| &self.systems[index])
    }

    /// Runs every enabled system once, in resolved order.
    ///
    /// # Panics
    /// If the order was not resolved since the last system was added.
    pub fn run(&mut self, registry: &mut Registry) {
        assert!(
            self.ready,
            "Stage {} was modified after Registry::ready() was called",
            self.name
        );

        for &index in &self.order {
            let system = &mut self.systems[index];
            if system.is_enabled() {
                system.execute(registry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace(Vec<&'static str>);

    fn a(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("a");
    }
    fn b(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("b");
    }
    fn c(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("c");
    }
    fn d(registry: &mut Registry) {
        registry.resource_mut::<Trace>().0.push("d");
    }

    fn run(schedule: &mut SystemSchedule) -> Vec<&'static str> {
        let mut registry = Registry::new();
        registry.init_resource(Trace::default());
        schedule.run(&mut registry);
        registry.remove_resource::<Trace>().map(|t| t.0).unwrap_or_default()
    }

    #[test]
    fn unconstrained_systems_keep_insertion_order() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(c);
        schedule.add(a);
        schedule.add(b);
        schedule.ready().unwrap();

        assert_eq!(run(&mut schedule), vec!["c", "a", "b"]);
    }

    #[test]
    fn constraints_reorder() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(a);
        schedule.add(b.after(a));
        schedule.add(c.after(b));
        schedule.add(d.after(a).before(c));
        schedule.ready().unwrap();

        assert_eq!(run(&mut schedule), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn before_moves_a_later_system_up() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(a);
        schedule.add(b);
        schedule.add(c.before(a));
        schedule.ready().unwrap();

        assert_eq!(run(&mut schedule), vec!["b", "c", "a"]);
    }

    #[test]
    fn contradictions_are_errors() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(a);
        schedule.add(b.after(a).before(a));
        schedule.add(c);

        let err = schedule.ready().unwrap_err();
        let ScheduleError::OrderingCycle { stage, systems } = err;

        assert_eq!(stage, "test");
        assert_eq!(systems.len(), 2);
        assert!(!schedule.is_ready());
    }

    #[test]
    fn disabled_systems_are_skipped_but_kept() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(a);
        schedule.add(b.disabled());
        schedule.add(c);
        schedule.ready().unwrap();

        assert_eq!(run(&mut schedule), vec!["a", "c"]);

        assert!(schedule.enable(SystemId::of(&b)));
        assert_eq!(run(&mut schedule), vec!["a", "b", "c"]);

        assert!(schedule.disable(SystemId::of(&a)));
        assert_eq!(schedule.is_enabled(SystemId::of(&a)), Some(false));
        assert!(!schedule.disable(SystemId::of(&d)));
    }

    #[test]
    fn remove_drops_duplicates() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(a);
        schedule.add(b);
        schedule.add(a);
        schedule.ready().unwrap();

        assert_eq!(schedule.remove(SystemId::of(&a)), 2);
        assert!(schedule.is_ready());
        assert_eq!(run(&mut schedule), vec!["b"]);
        assert_eq!(schedule.remove(SystemId::of(&a)), 0);
    }

    #[test]
    #[should_panic(expected = "was modified after")]
    fn running_unresolved_stage_panics() {
        let mut schedule = SystemSchedule::new("test");
        schedule.add(a);
        run(&mut schedule);
    }
}
