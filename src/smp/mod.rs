// SPDX-License-Identifier: MPL-2.0

//! Cross-CPU TLB invalidation.
//!
//! The address-space unmap path posts a [`RangeInvalidationRequest`] after
//! its local invalidation and blocks until every other CPU has invalidated
//! the range and acknowledged. Delivery is the job of an external IPI
//! communicator (the interrupt plumbing lives outside this crate); until
//! one is registered, or on single-CPU systems, requests complete
//! immediately.

use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Once;

use crate::mm::Vaddr;

/// A request that every other CPU invalidate `range` from its TLB.
pub struct RangeInvalidationRequest {
    range: Range<Vaddr>,
    pending_acks: AtomicUsize,
}

impl RangeInvalidationRequest {
    pub fn new(range: Range<Vaddr>, nr_targets: usize) -> Self {
        Self {
            range,
            pending_acks: AtomicUsize::new(nr_targets),
        }
    }

    pub fn range(&self) -> &Range<Vaddr> {
        &self.range
    }

    /// Called by each target CPU once it has invalidated the range.
    pub fn acknowledge(&self) {
        let previous = self.pending_acks.fetch_sub(1, Ordering::AcqRel);
        bug_on!(previous == 0, "stray invalidation acknowledgement");
    }

    /// Busy-waits for every target to acknowledge. IPI waits are
    /// unconditional; there is no timeout to hide a wedged CPU behind.
    pub fn wait_for_completion(&self) {
        while self.pending_acks.load(Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
    }
}

/// The external IPI transport. `post` must deliver the request to every
/// other CPU; each target invalidates the range and acknowledges.
pub trait IpiCommunicator: Sync {
    /// The number of CPUs a broadcast will target (all but the caller).
    fn nr_targets(&self) -> usize;

    fn post(&self, request: &RangeInvalidationRequest);
}

static COMMUNICATOR: Once<&'static dyn IpiCommunicator> = Once::new();

static NR_CPUS: Once<usize> = Once::new();

/// Registers the IPI transport once the interrupt plumbing is up.
pub fn set_ipi_communicator(communicator: &'static dyn IpiCommunicator) {
    COMMUNICATOR.call_once(|| communicator);
}

/// Records the logical CPU count so other subsystems can size their data.
pub(crate) fn init() {
    NR_CPUS.call_once(|| 1);
}

pub fn nr_cpus() -> usize {
    NR_CPUS.get().copied().unwrap_or(1)
}

/// Posts a range invalidation to all other CPUs and blocks until each has
/// acknowledged. Strictly ordered after the caller's local invalidation.
pub fn broadcast_range_invalidation(range: Range<Vaddr>) {
    let Some(communicator) = COMMUNICATOR.get() else {
        return;
    };

    let request = RangeInvalidationRequest::new(range, communicator.nr_targets());
    communicator.post(&request);
    request.wait_for_completion();
}
