use alloc::sync::Arc;
use eonix_mm::paging::PFN;

/// Opaque migration-class tag carried alongside an isolated block so it can
/// be handed back to [`RegionLock::release`] unchanged. The allocator
/// backing this crate today (`buddy_allocator`) has no migration-type-aware
/// free lists, so this is a transparent newtype the core never interprets
/// (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationClass(pub u8);

/// A block the scanner has isolated and is holding in a staging batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub pfn: PFN,
    pub order: u32,
    pub migration_class: MigrationClass,
}

impl BlockDescriptor {
    pub fn len_bytes(&self) -> usize {
        eonix_mm::paging::PAGE_SIZE << self.order
    }
}

/// Allocator operations available while the region's own lock is held.
///
/// Every method here requires the caller to already be inside the closure
/// passed to [`RegionOps::with_region_lock`] for the same region.
pub trait RegionLock {
    /// `Some((order, class))` iff the block at `pfn` is on the free list at
    /// `order` or greater, at or above the minimum order configured for the
    /// active engine.
    fn pfn_to_free_block(&mut self, pfn: PFN) -> Option<(u32, MigrationClass)>;

    /// Removes the block at `pfn` (of the given order) from the free list.
    fn isolate(&mut self, pfn: PFN, order: u32) -> bool;

    /// Reinserts a previously isolated block without re-triggering the
    /// allocator's free hook.
    fn release(&mut self, pfn: PFN, order: u32, migration_class: MigrationClass);
}

/// A single lock-protected span of page frames owned by the allocator.
pub trait RegionOps {
    fn base_pfn(&self) -> PFN;
    fn end_pfn(&self) -> PFN;

    /// Runs `f` with exclusive access to this region, guaranteed to be
    /// released on every exit path.
    fn with_region_lock<R>(&self, f: impl FnOnce(&mut dyn RegionLock) -> R) -> R;
}

/// Lets a region handle be a cheap, `Clone`-able reference (an `Arc`, a
/// `&'static`, an index) rather than the region's actual state, since
/// `PageAllocator::for_each_region` only lends the core a borrow for the
/// duration of one callback but `Lifecycle` needs to keep a handle per
/// region for as long as the configuration stays active.
impl<T: RegionOps + ?Sized> RegionOps for Arc<T> {
    fn base_pfn(&self) -> PFN {
        (**self).base_pfn()
    }

    fn end_pfn(&self) -> PFN {
        (**self).end_pfn()
    }

    fn with_region_lock<R>(&self, f: impl FnOnce(&mut dyn RegionLock) -> R) -> R {
        (**self).with_region_lock(f)
    }
}

/// The allocator this engine instance is attached to.
pub trait PageAllocator {
    type Region: RegionOps + Clone;

    /// The allocator's own minimum block order; `enable` rejects a
    /// configuration whose `min_order` is smaller than this.
    fn min_order(&self) -> u32;

    /// Visits every currently-populated region. The core snapshots the
    /// result once at `enable` time (see SPEC_FULL.md §10.6); it is not
    /// safe to call this while a region is concurrently resized.
    fn for_each_region(&self, f: &mut dyn FnMut(&Self::Region));
}
