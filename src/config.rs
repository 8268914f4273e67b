use crate::registry::Registry;

pub const DEFAULT_ENTITY_CAPACITY: usize = 0;
pub const DEFAULT_COMPONENT_CAPACITY: usize = 32;
pub const DEFAULT_RESOURCE_CAPACITY: usize = 16;
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Initial allocation sizes of a [`Registry`]. None of these are limits.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct RegistryConfig {
    /// Entity slots reserved up front.
    pub entity_capacity: usize,
    /// Component types reserved up front.
    pub component_capacity: usize,
    /// Resource types reserved up front.
    pub resource_capacity: usize,
    /// Bytes reserved for the command queue.
    pub command_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            entity_capacity: DEFAULT_ENTITY_CAPACITY,
            component_capacity: DEFAULT_COMPONENT_CAPACITY,
            resource_capacity: DEFAULT_RESOURCE_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entity_capacity: Option<usize>,
    component_capacity: Option<usize>,
    resource_capacity: Option<usize>,
    command_capacity: Option<usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = Some(capacity);
        self
    }

    pub fn with_component_capacity(mut self, capacity: usize) -> Self {
        self.component_capacity = Some(capacity);
        self
    }

    pub fn with_resource_capacity(mut self, capacity: usize) -> Self {
        self.resource_capacity = Some(capacity);
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = Some(capacity);
        self
    }

    pub fn config(&self) -> RegistryConfig {
        let defaults = RegistryConfig::default();

        RegistryConfig {
            entity_capacity: self.entity_capacity.unwrap_or(defaults.entity_capacity),
            component_capacity: self
                .component_capacity
                .unwrap_or(defaults.component_capacity),
            resource_capacity: self
                .resource_capacity
                .unwrap_or(defaults.resource_capacity),
            command_capacity: self.command_capacity.unwrap_or(defaults.command_capacity),
        }
    }

    pub fn build(self) -> Registry {
        Registry::with_config(self.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_fall_back_to_defaults() {
        let config = RegistryBuilder::new()
            .with_entity_capacity(500)
            .with_command_capacity(64)
            .config();

        assert_eq!(config.entity_capacity, 500);
        assert_eq!(config.command_capacity, 64);
        assert_eq!(config.component_capacity, DEFAULT_COMPONENT_CAPACITY);
        assert_eq!(config.resource_capacity, DEFAULT_RESOURCE_CAPACITY);
    }

    #[test]
    fn build_keeps_the_config() {
        let registry = RegistryBuilder::new().with_resource_capacity(3).build();

        assert_eq!(registry.config().resource_capacity, 3);
        assert_eq!(registry.entity_count(), 0);
    }
}
