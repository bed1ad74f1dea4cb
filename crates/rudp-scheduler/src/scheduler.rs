//! # Tick Scheduler
//!
//! Two entry points drive the send path:
//!
//! - **Application side** ([`SchedulerHandle`]): `enqueue` stores buffered
//!   records for the next tick. IMMEDIATE records are packed and handed to
//!   the transport inline, on the caller's thread, without touching the
//!   tick state machine.
//! - **I/O side** ([`TickScheduler`]): on every timer fire the scheduler
//!   goes `Idle → TickPending → Flushing → Idle`, selecting a weighted batch
//!   of records, packing it into datagrams and sending them.
//!
//! The queue set, service debts and counters sit behind a single mutex
//! that is only held while records move in or out of the queues. Packing
//! and transport calls always run with the lock released.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use quanta::Instant;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregation::{AggregationPolicy, AllocationPlan};
use crate::config::SchedulerConfig;
use crate::error::{ConfigError, PackError, QueueError, TransportError};
use crate::packer::{DatagramPacker, PackOutcome};
use crate::priority::Priority;
use crate::queue::{PacketId, PacketIdGenerator, PacketRecord, PriorityQueueSet};
use crate::starvation::StarvationGuard;
use crate::stats::{ClassCounters, SchedulerStats};
use crate::transport::DatagramTransport;
use crate::wire::RecordHeader;

const RATE_WINDOW: Duration = Duration::from_secs(1);

// ─── Events ──────────────────────────────────────────────────────────────────

/// Diagnostic events for the reliability layer.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// The packer refused a record; it will never be sent.
    Dropped {
        id: PacketId,
        priority: Priority,
        error: PackError,
    },
    /// A fully formed datagram was refused by the transport. Not retried.
    TransportFailed {
        sequence: u32,
        destination: SocketAddr,
        packet_ids: Vec<PacketId>,
        error: TransportError,
    },
    /// A queued record was removed by `cancel` or by teardown.
    Cancelled { id: PacketId, priority: Priority },
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    TickPending,
    Flushing,
}

/// What one flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Skipped by the send-rate ceiling.
    pub throttled: bool,
    /// Records taken per buffered class, in `Priority::BUFFERED` order.
    pub selected: [usize; 3],
    pub plan: AllocationPlan,
    pub datagrams: usize,
    pub dropped: usize,
    pub transport_failures: usize,
}

impl TickReport {
    pub fn selected_for(&self, priority: Priority) -> usize {
        priority.buffered_index().map_or(0, |i| self.selected[i])
    }

    pub fn total_selected(&self) -> usize {
        self.selected.iter().sum()
    }
}

/// Datagrams handed to the transport in the current one-second window.
struct RateWindow {
    started: Instant,
    sent: u64,
}

impl RateWindow {
    fn new() -> Self {
        RateWindow {
            started: Instant::now(),
            sent: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.started) >= RATE_WINDOW {
            self.started = now;
            self.sent = 0;
        }
    }
}

/// Everything both threads touch.
struct Shared {
    queues: PriorityQueueSet,
    guard: StarvationGuard,
    ids: PacketIdGenerator,
    stats: SchedulerStats,
    window: RateWindow,
    closed: bool,
}

struct Core<T: ?Sized> {
    config: SchedulerConfig,
    packer: DatagramPacker,
    shared: Mutex<Shared>,
    events: Sender<SchedulerEvent>,
    transport: Arc<T>,
}

impl<T: DatagramTransport + ?Sized> Core<T> {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SchedulerEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "scheduler event channel full, discarding event");
            }
        }
    }

    /// Largest payload check, done with the id the record is about to get.
    fn check_size(&self, shared: &Shared, payload: &Bytes) -> Result<(), QueueError> {
        let id = PacketId(shared.ids.current());
        let framed = RecordHeader::encoded_len_for(id, payload.len()) + payload.len();
        if framed > self.packer.max_record_bytes() {
            return Err(QueueError::PayloadTooLarge {
                size: payload.len(),
                max: self.packer.max_datagram_bytes(),
            });
        }
        Ok(())
    }

    /// Hand packed datagrams to the transport and report failures.
    /// Returns `(sent, bytes, failed)`.
    fn dispatch(&self, outcome: PackOutcome) -> (u64, u64, u64) {
        // Empty unless a queued record slipped past `check_size`.
        for (record, error) in outcome.rejected {
            warn!(packet_id = %record.id, class = %record.priority, %error, "dropping record");
            self.emit(SchedulerEvent::Dropped {
                id: record.id,
                priority: record.priority,
                error,
            });
        }

        let (mut sent, mut bytes, mut failed) = (0, 0, 0);
        for datagram in outcome.datagrams {
            let len = datagram.len() as u64;
            match self
                .transport
                .send_datagram(datagram.data, datagram.destination)
            {
                Ok(()) => {
                    sent += 1;
                    bytes += len;
                }
                Err(error) => {
                    failed += 1;
                    warn!(
                        sequence = datagram.sequence,
                        destination = %datagram.destination,
                        records = datagram.packet_ids.len(),
                        %error,
                        "transport refused datagram"
                    );
                    self.emit(SchedulerEvent::TransportFailed {
                        sequence: datagram.sequence,
                        destination: datagram.destination,
                        packet_ids: datagram.packet_ids,
                        error,
                    });
                }
            }
        }
        (sent, bytes, failed)
    }

    /// Count records the packer will accept, per class.
    fn packable(&self, records: &[PacketRecord]) -> (ClassCounters, ClassCounters) {
        let mut packed = ClassCounters::default();
        let mut dropped = ClassCounters::default();
        for record in records {
            if self.packer.fits(record) {
                packed.add(record.priority, 1);
            } else {
                dropped.add(record.priority, 1);
            }
        }
        (packed, dropped)
    }
}

// ─── SchedulerHandle ─────────────────────────────────────────────────────────

/// Application-side handle. Cheap to clone and safe to share across threads.
pub struct SchedulerHandle<T: ?Sized> {
    core: Arc<Core<T>>,
}

impl<T: ?Sized> Clone for SchedulerHandle<T> {
    fn clone(&self) -> Self {
        SchedulerHandle {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: DatagramTransport + ?Sized> SchedulerHandle<T> {
    /// Queue a payload for `destination`. IMMEDIATE payloads are sent before
    /// this returns; all others wait for the next tick.
    pub fn enqueue(
        &self,
        payload: Bytes,
        priority: Priority,
        destination: SocketAddr,
    ) -> Result<PacketId, QueueError> {
        if priority.is_immediate() {
            return self.send_immediate(payload, destination);
        }

        let mut shared = self.core.lock();
        if shared.closed {
            return Err(QueueError::Closed);
        }
        self.core.check_size(&shared, &payload)?;
        let id = shared.ids.next();
        shared
            .queues
            .enqueue(PacketRecord::new(id, priority, destination, payload));
        shared.stats.enqueued.add(priority, 1);
        Ok(id)
    }

    /// Pack and send one IMMEDIATE payload on the calling thread.
    ///
    /// The id is returned even if the transport refuses the datagram; that
    /// failure is reported as [`SchedulerEvent::TransportFailed`].
    pub fn send_immediate(&self, payload: Bytes, destination: SocketAddr) -> Result<PacketId, QueueError> {
        let record = {
            let mut shared = self.core.lock();
            if shared.closed {
                return Err(QueueError::Closed);
            }
            self.core.check_size(&shared, &payload)?;
            let id = shared.ids.next();
            shared.stats.enqueued.add(Priority::Immediate, 1);
            PacketRecord::new(id, Priority::Immediate, destination, payload)
        };
        let id = record.id;

        let outcome = self.core.packer.pack([record]);
        let datagrams = outcome.datagrams.len() as u64;
        let packed = outcome.packed_records() as u64;
        let (sent, bytes, failed) = self.core.dispatch(outcome);
        debug!(packet_id = %id, %destination, sent, "immediate dispatch");

        let mut shared = self.core.lock();
        let now = Instant::now();
        shared.window.roll(now);
        shared.window.sent += datagrams;
        shared.stats.immediate_dispatches += 1;
        shared.stats.packed.add(Priority::Immediate, packed);
        shared.stats.datagrams_sent += sent;
        shared.stats.bytes_sent += bytes;
        shared.stats.transport_failures += failed;
        Ok(id)
    }

    /// Remove a still-queued record. Returns whether it was found.
    pub fn cancel(&self, id: PacketId) -> bool {
        let removed = {
            let mut shared = self.core.lock();
            let removed = shared.queues.cancel(id);
            if let Some(record) = &removed {
                shared.stats.cancelled.add(record.priority, 1);
            }
            removed
        };
        match removed {
            Some(record) => {
                debug!(packet_id = %id, class = %record.priority, "record cancelled");
                self.core.emit(SchedulerEvent::Cancelled {
                    id,
                    priority: record.priority,
                });
                true
            }
            None => false,
        }
    }

    /// Records waiting in one class.
    pub fn queued(&self, priority: Priority) -> usize {
        self.core.lock().queues.len_of(priority)
    }

    pub fn debt(&self, priority: Priority) -> u32 {
        self.core.lock().guard.debt(priority).value()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core.lock().stats.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.core.lock().closed
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }
}

// ─── TickScheduler ───────────────────────────────────────────────────────────

/// I/O-side driver. Owned by the timer context; not `Clone`.
pub struct TickScheduler<T: ?Sized> {
    core: Arc<Core<T>>,
    policy: AggregationPolicy,
    state: SchedulerState,
    events_rx: Receiver<SchedulerEvent>,
}

impl<T: DatagramTransport + ?Sized> TickScheduler<T> {
    pub fn new(config: SchedulerConfig, transport: Arc<T>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events_tx, events_rx) = bounded(config.event_capacity);
        let shared = Shared {
            queues: PriorityQueueSet::new(),
            guard: StarvationGuard::new(config.starvation_threshold),
            ids: PacketIdGenerator::new(),
            stats: SchedulerStats::new(),
            window: RateWindow::new(),
            closed: false,
        };
        let policy = AggregationPolicy::new(config.weights);
        let core = Core {
            packer: DatagramPacker::new(config.max_datagram_bytes),
            config,
            shared: Mutex::new(shared),
            events: events_tx,
            transport,
        };
        Ok(TickScheduler {
            core: Arc::new(core),
            policy,
            state: SchedulerState::Idle,
            events_rx,
        })
    }

    pub fn handle(&self) -> SchedulerHandle<T> {
        SchedulerHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Receiver for diagnostic events. All clones share one queue.
    pub fn events(&self) -> Receiver<SchedulerEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Timer fired. Returns `false` if a tick was already pending.
    pub fn on_timer(&mut self) -> bool {
        if self.state != SchedulerState::Idle {
            return false;
        }
        self.state = SchedulerState::TickPending;
        true
    }

    /// Timer fire followed by the flush it triggers.
    pub fn tick(&mut self) -> TickReport {
        self.on_timer();
        self.flush()
    }

    /// Select, pack and send one tick's worth of records.
    pub fn flush(&mut self) -> TickReport {
        self.state = SchedulerState::Flushing;
        let report = self.run_flush();
        self.state = SchedulerState::Idle;
        report
    }

    /// Close the queue set and cancel everything still queued. Later
    /// enqueues fail with [`QueueError::Closed`]. Idempotent.
    pub fn close(&mut self) -> Vec<PacketRecord> {
        let cancelled = {
            let mut shared = self.core.lock();
            shared.closed = true;
            let records = shared.queues.drain_all();
            for record in &records {
                shared.stats.cancelled.add(record.priority, 1);
            }
            shared.guard.reset();
            records
        };
        for record in &cancelled {
            self.core.emit(SchedulerEvent::Cancelled {
                id: record.id,
                priority: record.priority,
            });
        }
        if !cancelled.is_empty() {
            info!(cancelled = cancelled.len(), "scheduler closed with queued records");
        }
        self.state = SchedulerState::Idle;
        cancelled
    }

    fn run_flush(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let budget = self.core.config.tick_budget;

        let batch = {
            let mut shared = self.core.lock();
            if shared.closed {
                return report;
            }
            if let Some(limit) = self.core.config.max_datagrams_per_second {
                shared.window.roll(Instant::now());
                if shared.window.sent >= u64::from(limit) {
                    shared.stats.ticks_throttled += 1;
                    report.throttled = true;
                    return report;
                }
            }
            let shared = &mut *shared;

            let backlog = shared.queues.buffered_backlog();
            let plan = self
                .policy
                .plan(budget.max_records, backlog, shared.guard.starving_classes());

            let mut bytes = ByteBudget::new(budget.max_bytes);
            let mut taken: [Vec<PacketRecord>; 3] = Default::default();

            // Guaranteed slots are honoured before the byte budget runs out.
            for i in (0..3).rev() {
                if plan.guaranteed[i] {
                    taken[i] = take_class(&mut shared.queues, Priority::BUFFERED[i], 1, &mut bytes);
                }
            }
            for (i, priority) in Priority::BUFFERED.into_iter().enumerate() {
                let want = plan.slots[i].saturating_sub(taken[i].len());
                let more = take_class(&mut shared.queues, priority, want, &mut bytes);
                taken[i].extend(more);
            }

            report.selected = std::array::from_fn(|i| taken[i].len());
            report.plan = plan;
            let guaranteed: [bool; 3] =
                std::array::from_fn(|i| plan.guaranteed[i] && !taken[i].is_empty());

            let remaining = shared.queues.buffered_backlog();
            shared
                .guard
                .settle(plan.fair, report.selected, guaranteed, remaining);

            shared.stats.ticks += 1;
            shared.stats.guaranteed_slots += guaranteed.iter().filter(|&&g| g).count() as u64;

            taken.into_iter().flatten().collect::<Vec<_>>()
        };

        if batch.is_empty() {
            return report;
        }

        let (packed, dropped) = self.core.packable(&batch);
        let outcome = self.core.packer.pack(batch);
        let datagrams = outcome.datagrams.len() as u64;
        report.datagrams = outcome.datagrams.len();
        report.dropped = outcome.rejected.len();
        let (sent, bytes, failed) = self.core.dispatch(outcome);
        report.transport_failures = failed as usize;

        debug!(
            high = report.selected[0],
            medium = report.selected[1],
            low = report.selected[2],
            datagrams,
            "tick flushed"
        );

        let mut shared = self.core.lock();
        shared.window.sent += datagrams;
        for priority in Priority::ALL {
            shared.stats.packed.add(priority, packed.get(priority));
            shared.stats.dropped.add(priority, dropped.get(priority));
        }
        shared.stats.datagrams_sent += sent;
        shared.stats.bytes_sent += bytes;
        shared.stats.transport_failures += failed;
        report
    }
}

// ─── Byte Budget ─────────────────────────────────────────────────────────────

/// Optional cap on encoded bytes per tick. The first record of a tick is
/// always admitted; once a record is refused the tick takes nothing more.
struct ByteBudget {
    limit: Option<usize>,
    used: usize,
    exhausted: bool,
}

impl ByteBudget {
    fn new(limit: Option<usize>) -> Self {
        ByteBudget {
            limit,
            used: 0,
            exhausted: false,
        }
    }

    fn admit(&mut self, len: usize) -> bool {
        if self.exhausted {
            return false;
        }
        let fits = match self.limit {
            None => true,
            Some(limit) => self.used == 0 || self.used + len <= limit,
        };
        if fits {
            self.used += len;
        } else {
            self.exhausted = true;
        }
        fits
    }
}

fn take_class(
    queues: &mut PriorityQueueSet,
    priority: Priority,
    count: usize,
    bytes: &mut ByteBudget,
) -> Vec<PacketRecord> {
    if count == 0 {
        return Vec::new();
    }
    queues.dequeue_while(priority, count, |record| bytes.admit(record.encoded_len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::TickBudget;
    use crate::transport::MemoryTransport;
    use crate::wire::DatagramReader;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 7000))
    }

    fn scheduler(config: SchedulerConfig) -> (TickScheduler<MemoryTransport>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let sched = TickScheduler::new(config, Arc::clone(&transport)).unwrap();
        (sched, transport)
    }

    fn budget(records: usize) -> SchedulerConfig {
        SchedulerConfig {
            tick_budget: TickBudget {
                max_records: records,
                max_bytes: None,
            },
            ..SchedulerConfig::default()
        }
    }

    fn payload(n: u8) -> Bytes {
        Bytes::from(vec![n; 8])
    }

    fn sent_ids(transport: &MemoryTransport) -> Vec<PacketId> {
        transport
            .sent()
            .into_iter()
            .flat_map(|(_, data)| DatagramReader::new(data).unwrap().map(|r| r.id))
            .collect()
    }

    // ─── State Machine ──────────────────────────────────────────────────

    #[test]
    fn timer_moves_idle_to_pending_and_flush_returns_to_idle() {
        let (mut sched, _) = scheduler(SchedulerConfig::default());
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert!(sched.on_timer());
        assert_eq!(sched.state(), SchedulerState::TickPending);
        assert!(!sched.on_timer());
        sched.flush();
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn empty_tick_sends_nothing() {
        let (mut sched, transport) = scheduler(SchedulerConfig::default());
        let report = sched.tick();
        assert_eq!(report.total_selected(), 0);
        assert_eq!(transport.sent_count(), 0);
        assert_eq!(sched.handle().stats().ticks, 1);
    }

    // ─── Enqueue ────────────────────────────────────────────────────────

    #[test]
    fn buffered_records_wait_for_tick() {
        let (mut sched, transport) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        let a = handle.enqueue(payload(1), Priority::High, addr()).unwrap();
        let b = handle.enqueue(payload(2), Priority::Low, addr()).unwrap();
        assert_eq!(transport.sent_count(), 0);

        let report = sched.tick();
        assert_eq!(report.datagrams, 1);
        assert_eq!(sent_ids(&transport), vec![a, b]);
    }

    #[test]
    fn immediate_is_sent_inline() {
        let (sched, transport) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        let id = handle
            .enqueue(payload(9), Priority::Immediate, addr())
            .unwrap();
        assert_eq!(sent_ids(&transport), vec![id]);
        assert_eq!(sched.state(), SchedulerState::Idle);
        let stats = handle.stats();
        assert_eq!(stats.immediate_dispatches, 1);
        assert_eq!(stats.packed.immediate, 1);
    }

    #[test]
    fn oversize_payload_rejected_at_enqueue() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        let err = sched
            .handle()
            .enqueue(Bytes::from(vec![0u8; 1500]), Priority::Medium, addr())
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::PayloadTooLarge {
                size: 1500,
                max: 1464
            }
        );
        assert_eq!(sched.handle().stats().enqueued.total(), 0);
    }

    #[test]
    fn enqueue_after_close_fails() {
        let (mut sched, _) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        sched.close();
        assert!(handle.is_closed());
        assert_eq!(
            handle.enqueue(payload(1), Priority::Low, addr()),
            Err(QueueError::Closed)
        );
        assert_eq!(
            handle.enqueue(payload(1), Priority::Immediate, addr()),
            Err(QueueError::Closed)
        );
    }

    // ─── Cancel ─────────────────────────────────────────────────────────

    #[test]
    fn cancel_removes_queued_record_once() {
        let (mut sched, transport) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        let events = sched.events();
        let a = handle.enqueue(payload(1), Priority::Medium, addr()).unwrap();
        let b = handle.enqueue(payload(2), Priority::Medium, addr()).unwrap();

        assert!(handle.cancel(a));
        assert!(!handle.cancel(a));
        assert!(matches!(
            events.try_recv(),
            Ok(SchedulerEvent::Cancelled { id, priority: Priority::Medium }) if id == a
        ));

        sched.tick();
        assert_eq!(sent_ids(&transport), vec![b]);
        assert!(!handle.cancel(b));
    }

    // ─── Allocation ─────────────────────────────────────────────────────

    #[test]
    fn two_per_class_then_low_guaranteed() {
        let (mut sched, transport) = scheduler(budget(6));
        let handle = sched.handle();
        for class in [Priority::High, Priority::Medium, Priority::Low] {
            for n in 0..2 {
                handle.enqueue(payload(n), class, addr()).unwrap();
            }
        }

        let first = sched.tick();
        assert_eq!(first.selected, [2, 2, 0]);
        assert!(handle.debt(Priority::Low) > 0);
        assert_eq!(handle.queued(Priority::Low), 2);

        // Keep HIGH and MEDIUM loaded so LOW only gets in via its guarantee.
        for n in 0..10 {
            handle.enqueue(payload(n), Priority::High, addr()).unwrap();
            handle.enqueue(payload(n), Priority::Medium, addr()).unwrap();
        }
        let second = sched.tick();
        assert!(second.plan.is_guaranteed(Priority::Low));
        assert!(second.selected_for(Priority::Low) >= 1);
        assert_eq!(handle.stats().guaranteed_slots, 1);
        assert!(transport.sent_count() >= 2);
    }

    #[test]
    fn byte_budget_caps_a_tick() {
        let mut config = budget(64);
        // Each 8-byte payload frames to 11 bytes.
        config.tick_budget.max_bytes = Some(30);
        let (mut sched, _) = scheduler(config);
        let handle = sched.handle();
        for n in 0..5 {
            handle.enqueue(payload(n), Priority::High, addr()).unwrap();
        }
        let report = sched.tick();
        assert_eq!(report.selected, [2, 0, 0]);
        assert_eq!(handle.queued(Priority::High), 3);
    }

    #[test]
    fn byte_budget_always_admits_first_record() {
        let mut config = budget(64);
        config.tick_budget.max_bytes = Some(1);
        let (mut sched, _) = scheduler(config);
        let handle = sched.handle();
        handle.enqueue(payload(1), Priority::Low, addr()).unwrap();
        handle.enqueue(payload(2), Priority::Low, addr()).unwrap();
        assert_eq!(sched.tick().selected, [0, 0, 1]);
    }

    // ─── Failures ───────────────────────────────────────────────────────

    #[test]
    fn transport_failure_is_reported_not_retried() {
        let (mut sched, transport) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        let events = sched.events();
        let id = handle.enqueue(payload(1), Priority::High, addr()).unwrap();
        transport.fail_next(1);

        let report = sched.tick();
        assert_eq!(report.transport_failures, 1);
        match events.try_recv() {
            Ok(SchedulerEvent::TransportFailed { packet_ids, .. }) => {
                assert_eq!(packet_ids, vec![id]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        sched.tick();
        assert_eq!(transport.sent_count(), 0);
        let stats = handle.stats();
        assert_eq!(stats.transport_failures, 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn record_too_large_for_packer_is_dropped_at_tick() {
        let (mut sched, transport) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        let events = sched.events();
        let small = handle.enqueue(payload(1), Priority::Medium, addr()).unwrap();
        // Queued directly, bypassing the enqueue-time size check.
        let big = {
            let mut shared = sched.core.lock();
            let id = shared.ids.next();
            let record = PacketRecord::new(id, Priority::Medium, addr(), Bytes::from(vec![0u8; 1500]));
            shared.queues.enqueue(record);
            shared.stats.enqueued.add(Priority::Medium, 1);
            id
        };

        let report = sched.tick();
        assert_eq!(report.selected, [0, 2, 0]);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.datagrams, 1);
        assert_eq!(sent_ids(&transport), vec![small]);
        match events.try_recv() {
            Ok(SchedulerEvent::Dropped {
                id,
                priority: Priority::Medium,
                error: PackError::RecordTooLarge { .. },
            }) => assert_eq!(id, big),
            other => panic!("unexpected event {other:?}"),
        }

        let stats = handle.stats();
        assert_eq!(stats.dropped.medium, 1);
        assert_eq!(stats.packed.medium, 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn close_cancels_everything_queued() {
        let (mut sched, _) = scheduler(SchedulerConfig::default());
        let handle = sched.handle();
        let events = sched.events();
        for n in 0..3 {
            handle.enqueue(payload(n), Priority::Low, addr()).unwrap();
        }
        let cancelled = sched.close();
        assert_eq!(cancelled.len(), 3);
        assert_eq!(events.len(), 3);
        assert_eq!(handle.stats().cancelled.low, 3);
        assert_eq!(handle.stats().outstanding(), 0);
        assert!(sched.close().is_empty());
        assert_eq!(sched.tick().total_selected(), 0);
    }

    #[test]
    fn full_event_channel_does_not_block() {
        let mut config = SchedulerConfig::default();
        config.event_capacity = 1;
        let (mut sched, _) = scheduler(config);
        let handle = sched.handle();
        for n in 0..4 {
            handle.enqueue(payload(n), Priority::Low, addr()).unwrap();
        }
        assert_eq!(sched.close().len(), 4);
        assert_eq!(sched.events().len(), 1);
    }

    // ─── Rate Ceiling ───────────────────────────────────────────────────

    #[test]
    fn rate_ceiling_skips_ticks() {
        let mut config = SchedulerConfig::default();
        config.max_datagrams_per_second = Some(1);
        let (mut sched, transport) = scheduler(config);
        let handle = sched.handle();
        handle.enqueue(payload(1), Priority::High, addr()).unwrap();
        sched.tick();
        handle.enqueue(payload(2), Priority::High, addr()).unwrap();

        let report = sched.tick();
        assert!(report.throttled);
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(handle.queued(Priority::High), 1);
        assert_eq!(handle.stats().ticks_throttled, 1);
    }

    #[test]
    fn immediate_bypasses_rate_ceiling() {
        let mut config = SchedulerConfig::default();
        config.max_datagrams_per_second = Some(1);
        let (sched, transport) = scheduler(config);
        let handle = sched.handle();
        for n in 0..3 {
            handle.send_immediate(payload(n), addr()).unwrap();
        }
        assert_eq!(transport.sent_count(), 3);
    }
}
