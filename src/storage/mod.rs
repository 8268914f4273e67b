pub use component::{ComponentSet, ComponentStorage, ErasedComponentSet};
pub use entity::{ComponentIdSet, EntityStorage};
pub use entity_set::EntitySet;
pub use event::{EventBuffer, EventStorage};
pub use resource::{Res, ResMut, ResourceSlot, ResourceStorage};
pub use sparse_set::{SparseKey, SparseSet, DEFAULT_PAGE_SIZE};
pub use tick_set::{Tick, TickSet, Ticks, TICK_NEVER, TICK_START};

pub mod component;
pub mod entity;
pub mod entity_set;
pub mod event;
pub mod resource;
pub mod sparse_set;
pub mod tick_set;
