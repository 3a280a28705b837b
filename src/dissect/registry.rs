use std::sync::Arc;

use crate::packet::Layer;

use super::Dissector;

/// Registry of layer dissectors, fixed at session construction.
///
/// Dissectors are consulted in registration order; every dissector whose
/// `accepts` matches a layer runs on it, not just the first.
pub struct DissectorRegistry {
    dissectors: Vec<Arc<dyn Dissector>>,
}

impl DissectorRegistry {
    pub fn new() -> Self {
        Self {
            dissectors: Vec::new(),
        }
    }

    /// Build a registry from an existing dissector list.
    pub fn from_dissectors(dissectors: Vec<Arc<dyn Dissector>>) -> Self {
        Self { dissectors }
    }

    /// Register a dissector.
    pub fn register<D: Dissector + 'static>(&mut self, dissector: D) {
        self.dissectors.push(Arc::new(dissector));
    }

    /// All dissectors accepting the given layer, in registration order.
    pub fn matching<'a>(&'a self, layer: &'a Layer) -> impl Iterator<Item = &'a dyn Dissector> {
        self.dissectors
            .iter()
            .filter(move |d| d.accepts(layer))
            .map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.dissectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dissectors.is_empty()
    }
}

impl Default for DissectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
