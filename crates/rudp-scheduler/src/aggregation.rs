//! # Aggregation Policy
//!
//! Turns a tick's slot budget into a per-class allocation for the buffered
//! classes (HIGH, MEDIUM, LOW). IMMEDIATE traffic is not part of the plan.
//!
//! ## Allocation
//!
//! 1. **Guaranteed slots**: every class the starvation guard reports as
//!    starving (and that has backlog) gets one slot, LOW first.
//! 2. **Weighted shares**: the rest of the budget `R` is split `R * w / W`.
//!    Each backlogged class keeps the fractional part as credit for the next
//!    tick, so the long-run split is exactly proportional to weight. The
//!    rounding leftover goes to the highest-weight class with backlog and is
//!    charged against its credit.
//! 3. **Cascade**, walking HIGH → MEDIUM → LOW. A class uses its own share,
//!    then everything passed down from above, and passes on whatever it could
//!    not use. Slots still unused at the bottom go back up to classes with
//!    backlog, in priority order.
//!
//! A class whose share rounds to zero this tick, and that holds no guaranteed
//! slot, sits the cascade out. It is still owed its part of the
//! work-conserving split ([`AllocationPlan::fair`]), so it accrues debt
//! instead. With budget 6, weights 4/2/1 and two records in each class this
//! yields HIGH 2, MEDIUM 2, LOW 0; LOW is owed 2 and is guaranteed a slot at
//! the next tick.

use std::cmp::Reverse;

use crate::priority::{Priority, PriorityWeights};

// ─── TickBudget ──────────────────────────────────────────────────────────────

/// How much one tick may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    /// Record slots per tick, shared by the buffered classes.
    pub max_records: usize,
    /// Optional cap on encoded record bytes per tick.
    pub max_bytes: Option<usize>,
}

impl Default for TickBudget {
    fn default() -> Self {
        TickBudget {
            max_records: 64,
            max_bytes: None,
        }
    }
}

// ─── AllocationPlan ──────────────────────────────────────────────────────────

/// Slots granted to each buffered class for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocationPlan {
    /// Slots per class in `Priority::BUFFERED` order, guaranteed slot included.
    pub slots: [usize; 3],
    /// Which classes received a guaranteed slot.
    pub guaranteed: [bool; 3],
    /// Work-conserving split of the non-guaranteed slots, with every
    /// backlogged class taking part in the cascade. Debt is measured
    /// against it.
    pub fair: [usize; 3],
}

impl AllocationPlan {
    pub fn slots_for(&self, priority: Priority) -> usize {
        priority.buffered_index().map_or(0, |i| self.slots[i])
    }

    pub fn is_guaranteed(&self, priority: Priority) -> bool {
        priority.buffered_index().is_some_and(|i| self.guaranteed[i])
    }

    pub fn total(&self) -> usize {
        self.slots.iter().sum()
    }

    pub fn guaranteed_count(&self) -> usize {
        self.guaranteed.iter().filter(|&&g| g).count()
    }
}

// ─── AggregationPolicy ───────────────────────────────────────────────────────

/// Fixed-point unit of share credit: one slot.
const SLOT: i64 = 1 << 16;

#[derive(Debug, Clone)]
pub struct AggregationPolicy {
    weights: PriorityWeights,
    /// Fractional share carried between ticks, in `SLOT` units.
    credit: [i64; 3],
}

impl AggregationPolicy {
    pub fn new(weights: PriorityWeights) -> Self {
        AggregationPolicy {
            weights,
            credit: [0; 3],
        }
    }

    /// Allocate `budget` slots given each class's backlog and starvation
    /// status (both in `Priority::BUFFERED` order). Never grants a class
    /// more slots than it has records.
    pub fn plan(&mut self, budget: usize, backlog: [usize; 3], starving: [bool; 3]) -> AllocationPlan {
        let mut plan = AllocationPlan::default();
        let mut remaining = budget;

        for i in (0..3).rev() {
            if remaining == 0 {
                break;
            }
            if starving[i] && backlog[i] > 0 {
                plan.guaranteed[i] = true;
                plan.slots[i] = 1;
                remaining -= 1;
            }
        }

        let residual: [usize; 3] = std::array::from_fn(|i| backlog[i] - plan.slots[i]);
        let shares = self.weighted_shares(remaining, &residual);

        let backlogged: [bool; 3] = std::array::from_fn(|i| residual[i] > 0);
        let taking: [bool; 3] =
            std::array::from_fn(|i| backlogged[i] && (shares[i] > 0 || plan.guaranteed[i]));

        plan.fair = cascade(&shares, &residual, &backlogged);
        let taken = cascade(&shares, &residual, &taking);
        for i in 0..3 {
            plan.slots[i] += taken[i];
        }
        plan
    }

    /// Integer shares of `remaining` slots, summing to exactly `remaining`
    /// whenever some class has backlog.
    fn weighted_shares(&mut self, remaining: usize, backlog: &[usize; 3]) -> [usize; 3] {
        let w = self.weights.as_array();
        let total = self.weights.total();
        if total == 0 {
            return [0; 3];
        }

        let recipient = (0..3)
            .filter(|&i| backlog[i] > 0)
            .max_by_key(|&i| (w[i], Reverse(i)));

        let mut shares = [0usize; 3];
        let mut stray = 0i64;
        for i in 0..3 {
            let exact = (remaining as i128 * w[i] as i128 * SLOT as i128 / total as i128) as i64;
            if backlog[i] == 0 {
                // Passes straight down the cascade; no credit is banked.
                self.credit[i] = 0;
                shares[i] = (exact / SLOT) as usize;
                stray += exact % SLOT;
                continue;
            }
            self.credit[i] += exact;
            let whole = self.credit[i].div_euclid(SLOT).max(0);
            self.credit[i] -= whole * SLOT;
            shares[i] = whole as usize;
        }

        let Some(recipient) = recipient else {
            return shares;
        };
        self.credit[recipient] += stray;

        let mut given: usize = shares.iter().sum();
        while given > remaining {
            let Some(i) = (0..3)
                .filter(|&i| backlog[i] > 0 && shares[i] > 0)
                .max_by_key(|&i| (shares[i], i))
            else {
                break;
            };
            shares[i] -= 1;
            self.credit[i] += SLOT;
            given -= 1;
        }

        let leftover = remaining.saturating_sub(given);
        shares[recipient] += leftover;
        self.credit[recipient] -= leftover as i64 * SLOT;
        shares
    }
}

/// Walk HIGH → MEDIUM → LOW. Classes not `taking` pass everything through.
/// Whatever reaches the bottom unused is handed back up to taking classes
/// that still have records.
fn cascade(shares: &[usize; 3], residual: &[usize; 3], taking: &[bool; 3]) -> [usize; 3] {
    let mut taken = [0usize; 3];
    let mut carry = 0usize;
    for i in 0..3 {
        let available = shares[i] + carry;
        if !taking[i] {
            carry = available;
            continue;
        }
        taken[i] = available.min(residual[i]);
        carry = available - taken[i];
    }
    for i in 0..3 {
        if carry == 0 {
            break;
        }
        if taking[i] {
            let extra = carry.min(residual[i] - taken[i]);
            taken[i] += extra;
            carry -= extra;
        }
    }
    taken
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self::new(PriorityWeights::default())
    }
}
