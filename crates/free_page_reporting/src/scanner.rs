use core::sync::atomic::{AtomicBool, Ordering};

use alloc::vec::Vec;
use eonix_mm::paging::PFN;

use crate::candidate_index::CandidateIndex;
use crate::collaborator::{BlockDescriptor, RegionOps};
use crate::config::ReportSink;

/// One allocator region paired with its candidate index. Owned by the
/// active configuration for as long as it is enabled; the region table is
/// snapshotted once at `enable` time (SPEC_FULL.md §10.6).
pub struct RegionSlot<R> {
    pub region: R,
    pub index: CandidateIndex,
}

impl<R: RegionOps> RegionSlot<R> {
    pub fn new(region: R, min_order: u32) -> Self {
        let span = usize::from(region.end_pfn()) - usize::from(region.base_pfn());
        let nbits = span >> min_order;
        Self {
            index: CandidateIndex::new(nbits),
            region,
        }
    }

    fn pfn_of(&self, bit: usize, min_order: u32) -> PFN {
        self.region.base_pfn() + (bit << min_order)
    }
}

/// Drains every set bit of `slot`'s candidate index, re-validating and
/// isolating each one under the region lock, and reports full (and one
/// final partial) batches through `sink`. Returns early, leaving
/// remaining bits untouched, if `cancel` becomes true between batches —
/// this is how `Lifecycle::disable` stops a Running scan without losing
/// track of any isolated-but-not-yet-released block (P1, P4).
pub(crate) fn scan_region<R: RegionOps>(
    slot: &RegionSlot<R>,
    min_order: u32,
    max_pages: usize,
    sink: &dyn ReportSink,
    cancel: &AtomicBool,
) {
    let mut batch: Vec<BlockDescriptor> = Vec::with_capacity(max_pages);
    let mut cursor = 0usize;

    loop {
        if cancel.load(Ordering::Acquire) {
            break;
        }

        let Some(bit) = slot.index.next_set_from(cursor) else {
            break;
        };
        cursor = bit + 1;

        let pfn = slot.pfn_of(bit, min_order);
        let isolated = slot.region.with_region_lock(|lock| {
            // I-order: clear before validate, so a concurrent free racing
            // in right now gets reprocessed on a future cycle rather than
            // silently dropped (see SPEC_FULL.md §4.1/§5).
            if !slot.index.unmark_if_set(bit) {
                return None;
            }
            match lock.pfn_to_free_block(pfn) {
                Some((order, class)) if order >= min_order => {
                    if lock.isolate(pfn, order) {
                        Some(BlockDescriptor {
                            pfn,
                            order,
                            migration_class: class,
                        })
                    } else {
                        None
                    }
                }
                _ => None,
            }
        });

        let Some(entry) = isolated else { continue };
        batch.push(entry);

        if batch.len() == max_pages {
            emit(slot, sink, &mut batch);
        }
    }

    if !batch.is_empty() {
        emit(slot, sink, &mut batch);
    }
}

fn emit<R: RegionOps>(slot: &RegionSlot<R>, sink: &dyn ReportSink, batch: &mut Vec<BlockDescriptor>) {
    eonix_log::println_trace!(
        "trace_free_page_reporting",
        "free_page_reporting: reporting batch of {} blocks",
        batch.len()
    );

    sink.report(batch);

    for entry in batch.drain(..) {
        slot.region.with_region_lock(|lock| {
            lock.release(entry.pfn, entry.order, entry.migration_class);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRegion, RecordingSink};

    #[test]
    fn single_free_is_reported_once_and_released() {
        let region = MockRegion::new(0, 4096);
        region.free(512, 9, Default::default());
        let slot = RegionSlot::new(region, 9);
        slot.index.mark(1); // pfn 512 is block index 1 at min_order 9 (block size 512)

        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(false);
        scan_region(&slot, 9, 16, &sink, &cancel);

        let reported = sink.batches.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].len(), 1);
        assert_eq!(usize::from(reported[0][0].pfn), 512);
        assert!(slot.region.is_free(512));
    }

    #[test]
    fn reallocated_block_is_never_reported() {
        let region = MockRegion::new(0, 4096);
        region.free(512, 9, Default::default());
        let slot = RegionSlot::new(region, 9);
        slot.index.mark(1);
        slot.region.allocate(512);

        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(false);
        scan_region(&slot, 9, 16, &sink, &cancel);

        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn sub_minimum_order_never_enters_the_index() {
        let region = MockRegion::new(0, 4096);
        region.free(512, 8, Default::default());
        let slot = RegionSlot::new(region, 9);
        // AH.enqueue would have refused to mark an order-8 block; nothing
        // to scan even though the allocator state happens to be free.
        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(false);
        scan_region(&slot, 9, 16, &sink, &cancel);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn batching_splits_into_full_and_partial() {
        let region = MockRegion::new(0, 1 << 16);
        let slot_bits = 17usize;
        for i in 0..slot_bits {
            let pfn = i << 9;
            region.free(pfn, 9, Default::default());
        }
        let slot = RegionSlot::new(region, 9);
        for i in 0..slot_bits {
            slot.index.mark(i);
        }

        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(false);
        scan_region(&slot, 9, 16, &sink, &cancel);

        let reported = sink.batches.lock().unwrap();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0].len(), 16);
        assert_eq!(reported[1].len(), 1);
    }

    #[test]
    fn cancel_stops_before_the_next_bit_but_keeps_no_leak() {
        let region = MockRegion::new(0, 1 << 16);
        for i in 0..4 {
            region.free(i << 9, 9, Default::default());
        }
        let slot = RegionSlot::new(region, 9);
        for i in 0..4 {
            slot.index.mark(i);
        }

        let sink = RecordingSink::default();
        let cancel = AtomicBool::new(true);
        scan_region(&slot, 9, 16, &sink, &cancel);

        // Nothing isolated, nothing reported, and every block is still
        // exactly where the allocator's free list says it is.
        assert!(sink.batches.lock().unwrap().is_empty());
        for i in 0..4 {
            assert!(slot.region.is_free(i << 9));
        }
    }

}
