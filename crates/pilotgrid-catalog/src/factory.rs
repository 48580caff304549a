//! Connector factory — static registry of CE backends.
//!
//! Backend adapters register a builder closure under their CE-type tag at
//! startup. Resolving an unknown tag is a configuration error for the
//! affected queue, not a process failure.

use std::collections::HashMap;
use std::sync::Arc;

use pilotgrid_core::{QueueConnector, QueueDescriptor};

use crate::error::{CatalogError, CatalogResult};

/// Builds a connector bound to one queue.
pub type ConnectorBuilder =
    Box<dyn Fn(&QueueDescriptor) -> anyhow::Result<Arc<dyn QueueConnector>> + Send + Sync>;

/// CE-type tag → connector builder.
#[derive(Default)]
pub struct ConnectorFactory {
    builders: HashMap<String, ConnectorBuilder>,
}

impl ConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its CE-type tag. Later registrations for
    /// the same tag replace earlier ones.
    pub fn register(mut self, ce_type: &str, builder: ConnectorBuilder) -> Self {
        self.builders.insert(ce_type.to_string(), builder);
        self
    }

    /// Construct a connector for the descriptor's CE type.
    pub fn build(&self, descriptor: &QueueDescriptor) -> CatalogResult<Arc<dyn QueueConnector>> {
        let builder = self
            .builders
            .get(&descriptor.ce_type)
            .ok_or_else(|| CatalogError::UnknownCeType(descriptor.ce_type.clone()))?;
        builder(descriptor).map_err(|source| CatalogError::Connector {
            queue: descriptor.id.key(),
            source,
        })
    }

    pub fn known_types(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }
}
