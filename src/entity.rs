use std::fmt;

pub type EntityId = u32;
pub type EntityVersion = u16;

/// A generational handle to a logical record in a [`Registry`](crate::Registry).
///
/// Two handles with the same id but a different version refer to different
/// entities: the id slot was freed and handed out again in between.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Entity {
    id: EntityId,
    version: EntityVersion,
}

impl Entity {
    /// A handle that is never alive. Useful as a default before an entity
    /// has been spawned.
    pub const PLACEHOLDER: Entity = Entity {
        id: EntityId::MAX,
        version: EntityVersion::MAX,
    };

    pub const fn new(id: EntityId, version: EntityVersion) -> Self {
        Self { id, version }
    }

    pub const fn id(&self) -> EntityId {
        self.id
    }

    pub const fn version(&self) -> EntityVersion {
        self.version
    }

    /// Packs the handle into a single integer, version in the high bits.
    pub const fn to_bits(self) -> u64 {
        ((self.version as u64) << 32) | self.id as u64
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self {
            id: bits as EntityId,
            version: (bits >> 32) as EntityVersion,
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::PLACEHOLDER
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_keep_id_and_version() {
        let entity = Entity::new(7, 3);
        let back = Entity::from_bits(entity.to_bits());

        assert_eq!(back, entity);
        assert_eq!(back.id(), 7);
        assert_eq!(back.version(), 3);
    }

    #[test]
    fn display_shows_version() {
        assert_eq!(Entity::new(12, 1).to_string(), "12v1");
    }
}
