//! Background poller that publishes fixed-layout hardware snapshots.

use super::{
    ChassisBackend, ChassisError, ChassisInventory, HardwareReading, HardwareSnapshot,
    ANALOG_CHANNELS,
};
use crate::error::{AppResult, DaqError};
use crate::snapshot::{SnapshotCell, SnapshotReader};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default wait before each read so the modules can buffer samples.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// State shared between the adapter and its poll thread.
#[derive(Clone)]
struct Poller {
    backend: Arc<Mutex<Box<dyn ChassisBackend>>>,
    inventory: ChassisInventory,
    cell: Arc<SnapshotCell<HardwareReading>>,
    streaming: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
}

impl Poller {
    fn poll_once(&self) -> Result<HardwareReading, ChassisError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(ChassisError::Disconnected {
                message: "adapter stopped after a previous disconnect".to_string(),
            });
        }
        if self.inventory.is_empty() {
            let reading = HardwareReading::absent();
            self.cell.publish(reading);
            return Ok(reading);
        }

        match self.read_all() {
            Ok(snapshot) => {
                let reading = HardwareReading {
                    snapshot,
                    module_count: self.inventory.module_count(),
                    connected: true,
                };
                if self.failing.swap(false, Ordering::AcqRel) {
                    info!("Hardware reads recovered");
                }
                self.cell.publish(reading);
                Ok(reading)
            }
            Err(err) if err.is_disconnect() => {
                error!(error = %err, "Chassis connection lost; publishing zero snapshot");
                self.terminated.store(true, Ordering::Release);
                self.streaming.store(false, Ordering::Release);
                self.cell.publish(HardwareReading {
                    snapshot: HardwareSnapshot::zeroed(),
                    module_count: self.inventory.module_count(),
                    connected: false,
                });
                Err(err)
            }
            Err(err) => {
                // Warn once per outage
                if self.failing.swap(true, Ordering::AcqRel) {
                    debug!(error = %err, "Hardware read still failing");
                } else {
                    warn!(error = %err, "Hardware read failed; keeping previous snapshot");
                }
                Err(err)
            }
        }
    }

    fn read_all(&self) -> Result<HardwareSnapshot, ChassisError> {
        let mut backend = self.backend.lock();
        let mut snapshot = HardwareSnapshot::zeroed();

        if self.inventory.has_counters() {
            snapshot.counters = backend.read_counters()?;
        }

        for (group, module) in self.inventory.thermocouple_modules().into_iter().enumerate() {
            let buffered = backend.read_thermocouples(module)?;
            let means: Vec<f64> = buffered.iter().map(|samples| mean(samples)).collect();
            snapshot.set_thermocouple_group(group, &means);
        }

        if let Some(source) = self.inventory.analog_source() {
            let values = backend.read_analog(source)?;
            for (i, slot) in snapshot.analog.iter_mut().enumerate().take(ANALOG_CHANNELS) {
                *slot = values.get(i).copied().unwrap_or(0.0);
            }
        }

        Ok(snapshot)
    }

    fn poll_loop(&self, settle_delay: Duration) {
        info!(
            modules = self.inventory.module_count(),
            "Hardware poll loop started"
        );
        while self.streaming.load(Ordering::Acquire) {
            std::thread::sleep(settle_delay);
            if !self.streaming.load(Ordering::Acquire) {
                break;
            }
            match self.poll_once() {
                Err(err) if err.is_disconnect() => break,
                _ => {}
            }
        }
        info!("Hardware poll loop stopped");
    }
}

/// Mean of buffered samples; NaN when nothing was buffered.
fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Unifies the installed chassis modules into one [`HardwareSnapshot`] and
/// keeps it fresh from a background thread.
///
/// # Example
///
/// ```rust,ignore
/// let mut adapter = HardwareAdapter::new(Box::new(MockChassis::simulated()));
/// adapter.start()?;
/// let reading = adapter.latest_snapshot();
/// adapter.close();
/// ```
pub struct HardwareAdapter {
    poller: Poller,
    settle_delay: Duration,
    closed: AtomicBool,
    worker: Option<JoinHandle<()>>,
}

impl HardwareAdapter {
    /// Wrap a chassis backend. Nothing is read until [`start`](Self::start)
    /// or [`poll_once`](Self::poll_once).
    pub fn new(backend: Box<dyn ChassisBackend>) -> Self {
        let inventory = backend.inventory();
        if inventory.is_empty() {
            warn!("No supported chassis modules detected");
        } else {
            for module in inventory.modules() {
                info!(slot = module.slot, module = module.kind.product_type(), "Chassis module detected");
            }
        }

        Self {
            poller: Poller {
                backend: Arc::new(Mutex::new(backend)),
                inventory,
                cell: Arc::new(SnapshotCell::new(HardwareReading::absent())),
                streaming: Arc::new(AtomicBool::new(false)),
                terminated: Arc::new(AtomicBool::new(false)),
                failing: Arc::new(AtomicBool::new(false)),
            },
            settle_delay: DEFAULT_SETTLE_DELAY,
            closed: AtomicBool::new(false),
            worker: None,
        }
    }

    /// Set the settle delay waited before each read.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Modules this adapter maps into its snapshot.
    pub fn inventory(&self) -> &ChassisInventory {
        &self.poller.inventory
    }

    /// Spawn the poll thread. Does nothing if already streaming or if no
    /// modules are installed.
    pub fn start(&mut self) -> AppResult<()> {
        if self.poller.inventory.is_empty() {
            self.poller.cell.publish(HardwareReading::absent());
            return Ok(());
        }
        if self.poller.terminated.load(Ordering::Acquire) {
            warn!("Hardware adapter disconnected; re-create it to resume polling");
            return Ok(());
        }
        if self.poller.streaming.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let poller = self.poller.clone();
        let settle_delay = self.settle_delay;
        let handle = std::thread::Builder::new()
            .name("hw-poller".to_string())
            .spawn(move || poller.poll_loop(settle_delay))
            .map_err(|e| {
                self.poller.streaming.store(false, Ordering::Release);
                DaqError::Worker(format!("failed to spawn hardware poller: {}", e))
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Run one acquisition pass on the calling thread and publish the result.
    pub fn poll_once(&self) -> Result<HardwareReading, ChassisError> {
        self.poller.poll_once()
    }

    /// True while the poll thread is enabled.
    pub fn is_streaming(&self) -> bool {
        self.poller.streaming.load(Ordering::Acquire)
    }

    /// Most recently published reading. Never waits for a fresh one.
    pub fn latest_snapshot(&self) -> HardwareReading {
        self.poller.cell.latest()
    }

    /// Read handle for the snapshot cell.
    pub fn reader(&self) -> SnapshotReader<HardwareReading> {
        self.poller.cell.reader()
    }

    /// Stop polling and release the chassis. Safe to call more than once.
    pub fn close(&mut self) {
        self.poller.streaming.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Hardware poll thread panicked");
            }
        }

        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Hardware adapter already closed");
            return;
        }
        if let Err(err) = self.poller.backend.lock().close() {
            warn!(error = %err, "Closing chassis failed");
        } else {
            info!("Chassis closed");
        }
    }
}

impl Drop for HardwareAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{ChannelGroup, MockChassis};
    use tracing_test::traced_test;

    fn adapter() -> (HardwareAdapter, crate::hardware::MockChassisHandle) {
        let chassis = MockChassis::standard();
        let handle = chassis.handle();
        (HardwareAdapter::new(Box::new(chassis)), handle)
    }

    #[test]
    fn test_not_live_before_first_poll() {
        let (adapter, _handle) = adapter();
        assert!(!adapter.latest_snapshot().is_live());
    }

    #[test]
    fn test_poll_once_maps_layout() {
        let (adapter, handle) = adapter();
        handle.set_counters([10, 20, 30, 40]);
        handle.set_thermocouple(0, 71.5);
        handle.set_thermocouple(15, 80.0);
        handle.set_analog([2.5, 7.5]);

        let reading = adapter.poll_once().unwrap();

        assert!(reading.is_live());
        assert_eq!(reading.snapshot.counters, [10, 20, 30, 40]);
        assert_eq!(reading.snapshot.thermocouples[0], 71.5);
        assert_eq!(reading.snapshot.thermocouples[15], 80.0);
        assert!(reading.snapshot.thermocouples[16..].iter().all(|v| *v == 0.0));
        assert_eq!(reading.snapshot.analog, [2.5, 7.5]);
        assert_eq!(adapter.latest_snapshot(), reading);
    }

    #[test]
    fn test_transient_failure_keeps_previous_snapshot() {
        let (adapter, handle) = adapter();
        handle.set_counters([5, 5, 5, 5]);
        let first = adapter.poll_once().unwrap();

        handle.fail_next_read(ChannelGroup::Thermocouples);
        handle.set_counters([6, 6, 6, 6]);
        assert!(adapter.poll_once().is_err());
        assert_eq!(adapter.latest_snapshot(), first);

        let third = adapter.poll_once().unwrap();
        assert_eq!(third.snapshot.counters, [6, 6, 6, 6]);
    }

    #[test]
    fn test_disconnect_publishes_zero_snapshot_and_is_terminal() {
        let (adapter, handle) = adapter();
        handle.set_counters([100, 0, 0, 0]);
        adapter.poll_once().unwrap();

        handle.disconnect();
        let err = adapter.poll_once().unwrap_err();
        assert!(err.is_disconnect());

        let reading = adapter.latest_snapshot();
        assert!(!reading.connected);
        assert_eq!(reading.snapshot, HardwareSnapshot::zeroed());

        handle.reconnect();
        assert!(adapter.poll_once().is_err());
    }

    #[test]
    fn test_empty_chassis_reads_absent() {
        let adapter = HardwareAdapter::new(Box::new(MockChassis::new(ChassisInventory::default())));
        let reading = adapter.poll_once().unwrap();
        assert_eq!(reading.module_count, 0);
        assert!(!reading.is_live());
    }

    #[test]
    fn test_poll_thread_publishes() {
        let chassis = MockChassis::standard();
        let handle = chassis.handle();
        handle.set_counters([1, 2, 3, 4]);
        let mut adapter = HardwareAdapter::new(Box::new(chassis))
            .with_settle_delay(Duration::from_millis(5));

        adapter.start().unwrap();
        assert!(adapter.is_streaming());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !adapter.latest_snapshot().is_live() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        adapter.close();

        assert!(!adapter.is_streaming());
        assert_eq!(adapter.latest_snapshot().snapshot.counters, [1, 2, 3, 4]);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    #[traced_test]
    fn test_persistent_read_failure_warns_once() {
        let (adapter, handle) = adapter();
        adapter.poll_once().unwrap();

        for _ in 0..3 {
            handle.fail_next_read(ChannelGroup::Analog);
            assert!(adapter.poll_once().is_err());
        }
        adapter.poll_once().unwrap();
        handle.fail_next_read(ChannelGroup::Analog);
        assert!(adapter.poll_once().is_err());

        logs_assert(|lines: &[&str]| {
            let warned = lines
                .iter()
                .filter(|line| line.contains("Hardware read failed"))
                .count();
            match warned {
                2 => Ok(()),
                n => Err(format!("expected one warning per outage, got {}", n)),
            }
        });
        assert!(logs_contain("Hardware read still failing"));
        assert!(logs_contain("Hardware reads recovered"));
    }

    #[test]
    #[traced_test]
    fn test_close_is_idempotent() {
        let (mut adapter, handle) = adapter();
        adapter.close();
        adapter.close();
        assert_eq!(handle.close_calls(), 1);
        assert!(logs_contain("already closed"));
    }
}
