use thiserror::Error;

/// A system argument could not be built from the registry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Error)]
pub enum RetrievalError {
    #[error("No resource of type {0} has been initialised.")]
    NoSuchResource(&'static str),
    #[error("The resource of type {0} is currently in use.")]
    ResourceInUse(&'static str),
    #[error("The component set of type {0} is currently in use.")]
    ComponentInUse(&'static str),
    #[error("No event of type {0} has been initialised.")]
    NoSuchEvent(&'static str),
    #[error("The event buffer of type {0} is currently in use.")]
    EventInUse(&'static str),
    #[error("The command queue is currently in use.")]
    CommandQueueInUse,
}

/// Ordering of a stage could not be resolved.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ScheduleError {
    #[error("Systems {systems:?} in stage {stage} have contradicting before/after constraints.")]
    OrderingCycle {
        stage: &'static str,
        systems: Vec<&'static str>,
    },
}
