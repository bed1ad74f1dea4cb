use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use quanta::Instant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::queue::PacketRecord;
use crate::scheduler::{SchedulerEvent, SchedulerHandle, TickScheduler};
use crate::transport::DatagramTransport;

/// Control messages for the tick thread (infrequent).
enum ControlMessage {
    ConnectionClosed(Sender<Vec<PacketRecord>>),
    Shutdown,
}

/// Runs a [`TickScheduler`] on its own timer thread.
///
/// Application threads enqueue through [`handle`](Self::handle); the worker
/// flushes every `tick_interval`. Closing the connection cancels whatever is
/// still queued and stops the worker.
///
/// Dropping the runtime triggers a graceful shutdown of the worker thread.
pub struct SchedulerRuntime<T: DatagramTransport + ?Sized + 'static> {
    handle: SchedulerHandle<T>,
    events: Receiver<SchedulerEvent>,
    control_tx: Sender<ControlMessage>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<T: DatagramTransport + ?Sized + 'static> SchedulerRuntime<T> {
    pub fn start(config: SchedulerConfig, transport: Arc<T>) -> anyhow::Result<Self> {
        let scheduler = TickScheduler::new(config, transport)?;
        let handle = scheduler.handle();
        let events = scheduler.events();
        let (control_tx, control_rx) = bounded(8);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread = thread::Builder::new()
            .name("rudp-tick".into())
            .spawn(move || runtime_worker(scheduler, control_rx, shutdown_clone))?;

        info!(
            tick_ms = handle.config().tick_interval.as_millis() as u64,
            max_datagram_bytes = handle.config().max_datagram_bytes,
            "scheduler runtime started"
        );

        Ok(Self {
            handle,
            events,
            control_tx,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> SchedulerHandle<T> {
        self.handle.clone()
    }

    pub fn events(&self) -> Receiver<SchedulerEvent> {
        self.events.clone()
    }

    /// Tear down the queue set and return the records that were cancelled.
    /// Waits for any in-flight flush to finish first. Calling it again
    /// returns nothing.
    pub fn on_connection_closed(&self) -> Vec<PacketRecord> {
        if self.handle.is_closed() {
            return Vec::new();
        }
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .control_tx
            .send(ControlMessage::ConnectionClosed(reply_tx))
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the worker and cancels anything still queued. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl<T: DatagramTransport + ?Sized + 'static> Drop for SchedulerRuntime<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn runtime_worker<T: DatagramTransport + ?Sized>(
    mut scheduler: TickScheduler<T>,
    control_rx: Receiver<ControlMessage>,
    shutdown: Arc<AtomicBool>,
) {
    let tick_interval = scheduler.config().tick_interval;
    let mut next_tick = Instant::now() + tick_interval;

    while !shutdown.load(Ordering::Relaxed) {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match control_rx.recv_timeout(wait) {
            Ok(ControlMessage::ConnectionClosed(reply)) => {
                let cancelled = scheduler.close();
                info!(cancelled = cancelled.len(), "connection closed, scheduler torn down");
                let _ = reply.send(cancelled);
                return;
            }
            Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now >= next_tick {
            scheduler.tick();
            // Fixed cadence; ticks missed while flushing are not replayed.
            next_tick += tick_interval;
            if next_tick < now {
                next_tick = now + tick_interval;
            }
        }
    }

    let cancelled = scheduler.close();
    debug!(cancelled = cancelled.len(), "scheduler worker stopped");
}
