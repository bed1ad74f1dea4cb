//! # Starvation Guard
//!
//! Keeps a per-class [`ServiceDebt`]: the number of slots a buffered class
//! was owed but did not get. A class whose debt rises above the configured
//! threshold is granted one guaranteed slot at the next tick, which bounds
//! how long LOW traffic can wait under sustained HIGH/MEDIUM load.
//!
//! What a class is owed each tick is its part of the work-conserving split
//! ([`AllocationPlan::fair`](crate::aggregation::AllocationPlan::fair)).
//! That split hands out exactly the tick's non-guaranteed slots, so under
//! sustained backlog debt stays at zero. Each guaranteed slot a class
//! receives repays one slot of debt.

use serde::Serialize;

use crate::priority::Priority;

// ─── ServiceDebt ─────────────────────────────────────────────────────────────

/// Owed service slots for one class. Never negative.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ServiceDebt(u32);

impl ServiceDebt {
    pub fn value(self) -> u32 {
        self.0
    }

    fn incur(&mut self, slots: usize) {
        self.0 = self.0.saturating_add(u32::try_from(slots).unwrap_or(u32::MAX));
    }

    fn repay(&mut self, slots: usize) {
        self.0 = self.0.saturating_sub(u32::try_from(slots).unwrap_or(u32::MAX));
    }
}

// ─── StarvationGuard ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StarvationGuard {
    debts: [ServiceDebt; 3],
    threshold: u32,
}

impl StarvationGuard {
    pub fn new(threshold: u32) -> Self {
        StarvationGuard {
            debts: [ServiceDebt::default(); 3],
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Current debt of a class. `Immediate` never accrues debt.
    pub fn debt(&self, priority: Priority) -> ServiceDebt {
        priority
            .buffered_index()
            .map(|i| self.debts[i])
            .unwrap_or_default()
    }

    /// Whether a class is owed a guaranteed slot at the next tick.
    pub fn is_starving(&self, priority: Priority) -> bool {
        self.debt(priority).value() > self.threshold
    }

    /// `is_starving` for every buffered class, in `Priority::BUFFERED` order.
    pub fn starving_classes(&self) -> [bool; 3] {
        self.debts.map(|d| d.value() > self.threshold)
    }

    /// Fold one tick's outcome into the debts.
    ///
    /// `received` counts every slot a class sent, `guaranteed` marks the
    /// classes whose guaranteed slot was among them. `remaining` is the
    /// backlog left after the tick: a class that drained completely is owed
    /// nothing.
    pub fn settle(
        &mut self,
        fair: [usize; 3],
        received: [usize; 3],
        guaranteed: [bool; 3],
        remaining: [usize; 3],
    ) {
        for i in 0..3 {
            let debt = &mut self.debts[i];
            let served = received[i].saturating_sub(usize::from(guaranteed[i]));
            if served < fair[i] {
                debt.incur(fair[i] - served);
            } else {
                debt.repay(served - fair[i]);
            }
            if guaranteed[i] {
                debt.repay(1);
            }
            if remaining[i] == 0 {
                *debt = ServiceDebt::default();
            }
        }
    }

    pub fn reset(&mut self) {
        self.debts = [ServiceDebt::default(); 3];
    }
}
