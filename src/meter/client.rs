//! Background poller for the power meter.

use super::registers::{
    decode_snapshot, ENERGY_BLOCK_COUNT, ENERGY_BLOCK_START, LINE_BLOCK_COUNT, LINE_BLOCK_START,
};
use super::{FaultClass, MeterError, MeterReading, MeterTransport};
use crate::error::{AppResult, DaqError};
use crate::snapshot::{SnapshotCell, SnapshotReader};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between successful polls.
pub const DEFAULT_POLL_PAUSE: Duration = Duration::from_millis(100);
/// Wait after a transport fault.
pub const DEFAULT_FAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct Poller {
    transport: Arc<Mutex<Box<dyn MeterTransport>>>,
    cell: Arc<SnapshotCell<MeterReading>>,
    streaming: Arc<AtomicBool>,
    pending_writes: Arc<Mutex<VecDeque<(u16, u16)>>>,
}

impl Poller {
    fn poll_once(&self) -> Result<MeterReading, MeterError> {
        let mut transport = self.transport.lock();
        self.flush_writes(&mut **transport);

        let result = transport
            .read_holding_registers(LINE_BLOCK_START, LINE_BLOCK_COUNT)
            .and_then(|line| {
                let energy =
                    transport.read_holding_registers(ENERGY_BLOCK_START, ENERGY_BLOCK_COUNT)?;
                decode_snapshot(&line, &energy)
            });
        drop(transport);

        let was_connected = self.cell.latest().connected;
        match result {
            Ok(snapshot) => {
                if !was_connected {
                    info!("Meter connected");
                }
                let reading = MeterReading {
                    snapshot,
                    connected: true,
                };
                self.cell.publish(reading);
                Ok(reading)
            }
            Err(err) => {
                match err.class() {
                    FaultClass::Backoff => {
                        if was_connected {
                            warn!(error = %err, "Meter connection lost");
                        }
                        self.cell.update(|reading| reading.connected = false);
                    }
                    FaultClass::Skip => debug!(error = %err, "Skipping malformed meter reply"),
                    FaultClass::Retry => debug!(error = %err, "Invalid meter reply, retrying"),
                }
                Err(err)
            }
        }
    }

    fn flush_writes(&self, transport: &mut dyn MeterTransport) {
        let writes: Vec<(u16, u16)> = self.pending_writes.lock().drain(..).collect();
        for (address, value) in writes {
            match transport.write_register(address, value) {
                Ok(()) => info!(address, value, "Meter register written"),
                Err(err) => warn!(address, value, error = %err, "Meter register write failed"),
            }
        }
    }

    fn poll_loop(&self, poll_pause: Duration, fault_backoff: Duration) {
        info!("Meter poll loop started");
        while self.streaming.load(Ordering::Acquire) {
            match self.poll_once() {
                Ok(_) => std::thread::sleep(poll_pause),
                Err(err) if err.class() == FaultClass::Backoff => {
                    std::thread::sleep(fault_backoff)
                }
                Err(_) => {}
            }
        }
        info!("Meter poll loop stopped");
    }
}

/// Keeps the latest [`MeterReading`] fresh from a background thread.
///
/// The client starts disconnected with an all-zero snapshot. Values survive
/// faults: a transport failure only clears the `connected` flag.
pub struct MeterClient {
    poller: Poller,
    poll_pause: Duration,
    fault_backoff: Duration,
    worker: Option<JoinHandle<()>>,
}

impl MeterClient {
    /// Client over `transport`. Nothing is read until [`start`](Self::start)
    /// or [`poll_once`](Self::poll_once).
    pub fn new(transport: Box<dyn MeterTransport>) -> Self {
        Self {
            poller: Poller {
                transport: Arc::new(Mutex::new(transport)),
                cell: Arc::new(SnapshotCell::new(MeterReading::default())),
                streaming: Arc::new(AtomicBool::new(false)),
                pending_writes: Arc::new(Mutex::new(VecDeque::new())),
            },
            poll_pause: DEFAULT_POLL_PAUSE,
            fault_backoff: DEFAULT_FAULT_BACKOFF,
            worker: None,
        }
    }

    /// Set the pause between successful polls.
    pub fn with_poll_pause(mut self, poll_pause: Duration) -> Self {
        self.poll_pause = poll_pause;
        self
    }

    /// Set the wait after a transport fault.
    pub fn with_fault_backoff(mut self, fault_backoff: Duration) -> Self {
        self.fault_backoff = fault_backoff;
        self
    }

    /// Spawn the poll thread. Does nothing if already running.
    pub fn start(&mut self) -> AppResult<()> {
        if self.poller.streaming.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let poller = self.poller.clone();
        let (poll_pause, fault_backoff) = (self.poll_pause, self.fault_backoff);
        let handle = std::thread::Builder::new()
            .name("meter-poller".to_string())
            .spawn(move || poller.poll_loop(poll_pause, fault_backoff))
            .map_err(|e| {
                self.poller.streaming.store(false, Ordering::Release);
                DaqError::Worker(format!("failed to spawn meter poller: {}", e))
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Run one poll on the calling thread, including queued writes.
    pub fn poll_once(&self) -> Result<MeterReading, MeterError> {
        self.poller.poll_once()
    }

    /// Queue a register write. The poller performs it before its next read;
    /// failures are logged and dropped.
    pub fn write_register(&self, address: u16, value: u16) {
        debug!(address, value, "Queueing meter register write");
        self.poller.pending_writes.lock().push_back((address, value));
    }

    /// Most recent reading and link health. Never waits.
    pub fn latest_snapshot(&self) -> MeterReading {
        self.poller.cell.latest()
    }

    /// Read handle for the snapshot cell.
    pub fn reader(&self) -> SnapshotReader<MeterReading> {
        self.poller.cell.reader()
    }

    /// True while the poll thread is enabled.
    pub fn is_streaming(&self) -> bool {
        self.poller.streaming.load(Ordering::Acquire)
    }

    /// Stop the poll thread and wait for it. Bounded by one transaction timeout.
    pub fn shutdown(&mut self) {
        self.poller.streaming.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Meter poll thread panicked");
            }
        }
    }
}

impl Drop for MeterClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
