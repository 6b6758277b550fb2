//! Copy-on-write publication of the active mapping layer.

use parking_lot::RwLock;
use std::sync::Arc;

use super::Layer;

/// Shared handle to the active layer, swapped wholesale on every edit.
///
/// Readers clone the inner `Arc` once per message and resolve against an
/// immutable snapshot; mutators build a complete replacement layer (reverse
/// indices included) and publish it with a single pointer swap. A reader
/// therefore observes either the fully-old or the fully-new table, never an
/// intermediate rebuild.
#[derive(Clone)]
pub struct ActiveLayerHandle {
    inner: Arc<RwLock<Arc<Layer>>>,
}

impl ActiveLayerHandle {
    pub fn new(layer: Layer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(layer))),
        }
    }

    /// The current snapshot. In-flight resolution against an older snapshot
    /// is unaffected by later publishes.
    pub fn snapshot(&self) -> Arc<Layer> {
        Arc::clone(&self.inner.read())
    }

    /// Publish a new active layer.
    pub fn publish(&self, layer: Layer) {
        *self.inner.write() = Arc::new(layer);
    }
}
