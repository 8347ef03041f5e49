use alloc::sync::Arc;

use crate::collaborator::BlockDescriptor;

/// The external consumer's advisory reporting callback. May block; the
/// core always releases the batch back to the allocator regardless of
/// what this returns or how long it takes (§7).
pub trait ReportSink: Send + Sync {
    fn report(&self, batch: &[BlockDescriptor]);
}

/// A configuration the caller wants to make active via `Engine::enable`.
pub struct Config {
    pub sink: Arc<dyn ReportSink>,
    pub max_pages: usize,
    pub min_order: u32,
}

impl Config {
    pub fn new(sink: Arc<dyn ReportSink>, max_pages: usize, min_order: u32) -> Self {
        Self {
            sink,
            max_pages,
            min_order,
        }
    }
}
