#![deny(missing_debug_implementations)]

pub use command::{Command, CommandQueue, Commands};
pub use component::{Component, ComponentTuple};
pub use config::{RegistryBuilder, RegistryConfig};
pub use entity::Entity;
pub use error::{RetrievalError, ScheduleError};
pub use event::{Event, EventMutator, EventReader, EventWriter};
pub use registry::{Added, Changed, Mut, Querier, QueryData, QueryFilter, Registry, With, Without};
pub use resource::{Resource, ResourceTuple};
pub use storage::{Res, ResMut, Tick, Ticks};
pub use system::{
    First, IntoSystem, IntoSystemConfig, Last, PostUpdate, PreUpdate, RemovedComponents,
    StageLabel, Startup, System, SystemConfig, SystemId, SystemParam, SystemTicks, Update,
};

pub mod cell;
pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod registry;
pub mod resource;
pub mod storage;
pub mod system;
pub mod utils;
