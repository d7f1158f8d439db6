//! Per-tick fusion of hardware and meter snapshots.
//!
//! The [`Aggregator`] owns the clock, both acquisition adapters and the time
//! series. Each call to [`Aggregator::tick`] reads the latest snapshots
//! without blocking, builds one raw [`FusedRecord`], derives the output record
//! for the current reporting interval and hands it to every registered
//! [`RecordSink`] together with the `test_active` and `should_write` flags.

use crate::clock::{round2, ClockEngine, ClockTick, ReportingInterval};
use crate::data::{
    ConversionConfig, FusedRecord, MeterFields, PulseBank, PulseValue, RecordSink,
    TimeSeriesLog,
};
use crate::error::{AppResult, DaqError};
use crate::hardware::{HardwareAdapter, HardwareReading, PULSE_CHANNELS, THERMOCOUPLE_CHANNELS};
use crate::meter::registers::{ENERGY_RESET_COMMAND, ENERGY_RESET_REGISTER};
use crate::meter::{MeterClient, MeterReading};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Status messages kept for the operator.
pub const STATUS_CAPACITY: usize = 100;

/// Status shown while a test is recording.
pub const STATUS_TESTING: &str = "testing in progress...";
/// Status shown when a test ends.
pub const STATUS_CONCLUDED: &str = "testing concluded.";
/// Status shown while the chassis is missing or disconnected.
pub const STATUS_HARDWARE_ERROR: &str = "error reading from hardware";
/// Status shown when the meter port cannot be opened.
pub const STATUS_METER_UNAVAILABLE: &str = "Unable to connect to modbus device.";

/// One timestamped operator status message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    /// When the message was posted.
    pub at: DateTime<Local>,
    /// Message text.
    pub text: String,
}

/// Result of one aggregation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Record appended to the time series.
    pub raw: FusedRecord,
    /// Record handed to the sinks (windowed when the interval exceeds 1 s).
    pub output: FusedRecord,
    /// True when the clock says a record is due.
    pub should_write: bool,
    /// True while a test is recording.
    pub test_active: bool,
    /// Hardware snapshot was usable.
    pub hardware_live: bool,
    /// Meter link was healthy.
    pub meter_connected: bool,
}

impl TickOutcome {
    /// The record was built from missing or disconnected hardware.
    pub fn degraded(&self) -> bool {
        !self.hardware_live
    }
}

/// What the presentation layer sees after every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveView {
    /// Latest raw record.
    pub raw: Option<FusedRecord>,
    /// Latest output record.
    pub output: Option<FusedRecord>,
    /// Latest meter reading, including per-phase values.
    pub meter: MeterReading,
    /// Hardware snapshot was usable.
    pub hardware_live: bool,
    /// A test is recording.
    pub test_active: bool,
    /// Current reporting interval.
    pub interval: ReportingInterval,
    /// Most recent status message.
    pub status: Option<StatusMessage>,
}

/// One chart sample for the selected thermocouple channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// Test time of the sample, minutes.
    pub test_minutes: f64,
    /// Values of the selected channels, in selection order.
    pub values: Vec<Option<f64>>,
}

/// Fuses acquisition snapshots into records and runs the test lifecycle.
pub struct Aggregator {
    clock: ClockEngine,
    hardware: HardwareAdapter,
    meter: MeterClient,
    log: TimeSeriesLog,
    pulses: PulseBank,
    conversion: ConversionConfig,
    staged_conversion: Option<ConversionConfig>,
    reset_energy_on_start: bool,
    sinks: Vec<Box<dyn RecordSink>>,
    status: VecDeque<StatusMessage>,
    test_active: bool,
    hardware_live: bool,
    selected_channels: Vec<usize>,
    live_tx: watch::Sender<LiveView>,
}

impl Aggregator {
    /// Aggregator over already constructed adapters.
    pub fn new(clock: ClockEngine, hardware: HardwareAdapter, meter: MeterClient) -> Self {
        let (live_tx, _) = watch::channel(LiveView {
            interval: clock.interval(),
            ..LiveView::default()
        });
        Self {
            clock,
            hardware,
            meter,
            log: TimeSeriesLog::default(),
            pulses: PulseBank::default(),
            conversion: ConversionConfig::default(),
            staged_conversion: None,
            reset_energy_on_start: true,
            sinks: Vec::new(),
            status: VecDeque::with_capacity(STATUS_CAPACITY),
            test_active: false,
            // Assume live until the first tick says otherwise so the first
            // degraded tick posts its status message.
            hardware_live: true,
            selected_channels: vec![0],
            live_tx,
        }
    }

    /// Bound the in-memory time series to `capacity` records.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = TimeSeriesLog::new(capacity);
        self
    }

    /// Use `conversion` from the first tick on.
    pub fn with_conversion(mut self, conversion: ConversionConfig) -> Self {
        self.conversion = conversion;
        self
    }

    /// Queue the meter energy reset on test start and reset.
    pub fn with_energy_reset(mut self, enabled: bool) -> Self {
        self.reset_energy_on_start = enabled;
        self
    }

    /// Register an output sink.
    pub fn add_sink(&mut self, sink: Box<dyn RecordSink>) {
        self.sinks.push(sink);
    }

    /// Start both acquisition pollers.
    pub fn start_acquisition(&mut self) -> AppResult<()> {
        self.hardware.start()?;
        self.meter.start()?;
        Ok(())
    }

    /// Wait until the chassis reading is live and the meter has connected.
    ///
    /// Returns `false` when `timeout` runs out first. Call after
    /// [`start_acquisition`](Self::start_acquisition) and before
    /// [`start_test`](Self::start_test) so the t0 record carries real readings.
    pub async fn wait_for_first_readings(&self, timeout: Duration) -> bool {
        let mut hardware = self.hardware.reader();
        let mut meter = self.meter.reader();
        let ready = async {
            while !hardware.latest().is_live() {
                if !hardware.changed().await {
                    return false;
                }
            }
            while !meter.latest().connected {
                if !meter.changed().await {
                    return false;
                }
            }
            true
        };
        tokio::time::timeout(timeout, ready).await.unwrap_or(false)
    }

    /// Advance the clock one second and sample.
    pub fn tick(&mut self) -> TickOutcome {
        let tick = self.clock.tick();
        self.sample(&tick)
    }

    /// Fuse the latest snapshots for `tick`.
    pub fn sample(&mut self, tick: &ClockTick) -> TickOutcome {
        let hardware = self.hardware.latest_snapshot();
        let meter = self.meter.latest_snapshot();
        let time_of_day = Local::now().time();

        let hardware_live = hardware.is_live();
        self.track_hardware(hardware_live);

        let raw = if hardware_live {
            let factors = self.conversion.factors();
            let counts = self.pulses.observe(hardware.snapshot.counters);
            let mut pulses = [PulseValue::default(); PULSE_CHANNELS];
            for ((pulse, (delta, cumulative)), factor) in
                pulses.iter_mut().zip(counts).zip(factors)
            {
                pulse.interval = round2(delta as f64 * factor);
                pulse.cumulative = round2(cumulative as f64 * factor);
            }
            self.fuse(&hardware, &meter, time_of_day, tick.test_minutes, pulses)
        } else {
            FusedRecord::zeroed(time_of_day, tick.test_minutes)
        };
        self.log.push(raw.clone());

        let window = self.clock.interval().seconds() as usize;
        let output = if window > 1 {
            self.log.windowed(window).unwrap_or_else(|| raw.clone())
        } else {
            raw.clone()
        };

        let outcome = TickOutcome {
            raw,
            output,
            should_write: tick.emit_now,
            test_active: self.test_active,
            hardware_live,
            meter_connected: meter.connected,
        };
        self.dispatch(&outcome.output, outcome.should_write);
        self.publish_live(Some(outcome.raw.clone()), Some(outcome.output.clone()), meter);
        outcome
    }

    fn fuse(
        &self,
        hardware: &HardwareReading,
        meter: &MeterReading,
        time_of_day: chrono::NaiveTime,
        test_minutes: f64,
        pulses: [PulseValue; PULSE_CHANNELS],
    ) -> FusedRecord {
        let analog_band = self.conversion.analog_band;
        let thermocouple_band = self.conversion.thermocouple_band;

        let mut record = FusedRecord::zeroed(time_of_day, test_minutes);
        record.meter = MeterFields {
            avg_voltage: meter.snapshot.avg_voltage,
            watts: meter.snapshot.watts,
            energy_wh: meter.snapshot.energy_wh,
        };
        record.pulses = pulses;
        for (slot, value) in record.analog.iter_mut().zip(hardware.snapshot.analog) {
            *slot = analog_band.sanitize(value).map(round2);
        }
        for (slot, value) in record
            .thermocouples
            .iter_mut()
            .zip(hardware.snapshot.thermocouples)
        {
            *slot = thermocouple_band.sanitize(value).map(round2);
        }
        record
    }

    fn track_hardware(&mut self, live: bool) {
        if live == self.hardware_live {
            return;
        }
        self.hardware_live = live;
        if live {
            info!("Hardware readings restored");
        } else {
            warn!("Hardware not available; recording zeros");
            self.push_status(STATUS_HARDWARE_ERROR);
        }
    }

    fn dispatch(&mut self, record: &FusedRecord, should_write: bool) {
        let test_active = self.test_active;
        for sink in &mut self.sinks {
            if let Err(err) = sink.accept(record, test_active, should_write) {
                error!(error = %err, "Record sink rejected record");
            }
        }
    }

    fn publish_live(
        &self,
        raw: Option<FusedRecord>,
        output: Option<FusedRecord>,
        meter: MeterReading,
    ) {
        let view = LiveView {
            raw,
            output,
            meter,
            hardware_live: self.hardware_live,
            test_active: self.test_active,
            interval: self.clock.interval(),
            status: self.latest_status().cloned(),
        };
        self.live_tx.send_replace(view);
    }

    /// Begin recording.
    ///
    /// Clears the time series, rebases the pulse totals, restarts the clock,
    /// applies staged conversion settings and immediately hands a t0 record
    /// (test time 0.0) to the sinks.
    pub fn start_test(&mut self) {
        self.test_active = true;
        self.rebase();
        info!("Test started");
        self.push_status(STATUS_TESTING);
        self.emit_initial_record();
    }

    /// Stop recording. Acquisition keeps running.
    pub fn stop_test(&mut self) {
        if !self.test_active {
            warn!("Stop requested with no test running");
        }
        self.test_active = false;
        info!(records = self.log.len(), "Test stopped");
        self.push_status(STATUS_CONCLUDED);
        self.publish_live(
            self.log.latest().cloned(),
            self.log.latest().cloned(),
            self.meter.latest_snapshot(),
        );
    }

    /// Restart the test time base without changing whether a test is recording.
    pub fn reset(&mut self) {
        self.rebase();
        info!(test_active = self.test_active, "Test time reset");
        self.emit_initial_record();
    }

    fn rebase(&mut self) {
        self.log.clear();
        self.pulses.rebase();
        self.clock.reset();
        if self.reset_energy_on_start {
            self.meter
                .write_register(ENERGY_RESET_REGISTER, ENERGY_RESET_COMMAND);
        }
        if let Some(conversion) = self.staged_conversion.take() {
            info!(factors = ?conversion.factors(), "Applying conversion settings");
            self.conversion = conversion;
        }
    }

    fn emit_initial_record(&mut self) {
        let hardware = self.hardware.latest_snapshot();
        let meter = self.meter.latest_snapshot();
        let time_of_day = Local::now().time();
        let hardware_live = hardware.is_live();
        self.track_hardware(hardware_live);
        let record = if hardware_live {
            self.fuse(
                &hardware,
                &meter,
                time_of_day,
                0.0,
                [PulseValue::default(); PULSE_CHANNELS],
            )
        } else {
            FusedRecord::zeroed(time_of_day, 0.0)
        };
        self.dispatch(&record, true);
        self.publish_live(None, Some(record), meter);
    }

    /// Change the reporting interval (1, 5, 30 or 60 seconds).
    pub fn set_interval(&mut self, seconds: u32) -> AppResult<()> {
        self.clock.set_interval(seconds)?;
        info!(seconds, "Reporting interval changed");
        Ok(())
    }

    /// Choose the thermocouple channels returned by [`chart_series`](Self::chart_series).
    pub fn select_channels(&mut self, channels: Vec<usize>) -> AppResult<()> {
        if let Some(bad) = channels.iter().find(|&&c| c >= THERMOCOUPLE_CHANNELS) {
            return Err(DaqError::Configuration(format!(
                "thermocouple channel {} out of range (0..{})",
                bad, THERMOCOUPLE_CHANNELS
            )));
        }
        self.selected_channels = channels;
        Ok(())
    }

    /// Selected thermocouple channels.
    pub fn selected_channels(&self) -> &[usize] {
        &self.selected_channels
    }

    /// Conversion settings to apply at the next start or reset.
    pub fn stage_conversion(&mut self, conversion: ConversionConfig) -> AppResult<()> {
        conversion.validate().map_err(DaqError::Configuration)?;
        self.staged_conversion = Some(conversion);
        Ok(())
    }

    /// Conversion settings currently applied.
    pub fn conversion(&self) -> &ConversionConfig {
        &self.conversion
    }

    /// Live view channel, updated every tick.
    pub fn subscribe(&self) -> watch::Receiver<LiveView> {
        self.live_tx.subscribe()
    }

    /// The last `tail` raw records, reduced to the selected channels.
    pub fn chart_series(&self, tail: usize) -> Vec<ChartPoint> {
        self.log
            .tail(tail)
            .map(|record| ChartPoint {
                test_minutes: record.test_minutes,
                values: self
                    .selected_channels
                    .iter()
                    .map(|&c| record.thermocouples[c])
                    .collect(),
            })
            .collect()
    }

    /// Full raw time series.
    pub fn log(&self) -> &TimeSeriesLog {
        &self.log
    }

    /// Post an operator status message.
    pub fn push_status(&mut self, text: impl Into<String>) {
        if self.status.len() == STATUS_CAPACITY {
            self.status.pop_front();
        }
        self.status.push_back(StatusMessage {
            at: Local::now(),
            text: text.into(),
        });
    }

    /// Most recent status message.
    pub fn latest_status(&self) -> Option<&StatusMessage> {
        self.status.back()
    }

    /// All retained status messages, oldest first.
    pub fn status_messages(&self) -> impl Iterator<Item = &StatusMessage> + '_ {
        self.status.iter()
    }

    /// A test is recording.
    pub fn is_test_active(&self) -> bool {
        self.test_active
    }

    /// Clock state as of the last tick.
    pub fn clock(&self) -> ClockTick {
        self.clock.current()
    }

    /// Hardware adapter.
    pub fn hardware(&self) -> &HardwareAdapter {
        &self.hardware
    }

    /// Meter client.
    pub fn meter(&self) -> &MeterClient {
        &self.meter
    }

    /// Stop the pollers, release the chassis and close every sink.
    pub fn shutdown(&mut self) {
        self.meter.shutdown();
        self.hardware.close();
        for sink in &mut self.sinks {
            if let Err(err) = sink.shutdown() {
                error!(error = %err, "Closing record sink failed");
            }
        }
        self.sinks.clear();
        info!("Aggregator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTime;
    use crate::hardware::{ChassisInventory, MockChassis, MockChassisHandle};
    use crate::meter::{MeterSnapshot, MockMeterHandle, MockMeterTransport};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(FusedRecord, bool, bool)>>>);

    impl RecordSink for Captured {
        fn accept(&mut self, record: &FusedRecord, test_active: bool, should_write: bool) -> AppResult<()> {
            self.0.lock().push((record.clone(), test_active, should_write));
            Ok(())
        }
    }

    struct Rig {
        aggregator: Aggregator,
        time: ManualTime,
        chassis: MockChassisHandle,
        meter: MockMeterHandle,
        sink: Captured,
    }

    impl Rig {
        fn new(interval: ReportingInterval) -> Self {
            let time = ManualTime::new();
            let clock = ClockEngine::with_time_source(interval, Box::new(time.clone()));
            let chassis = MockChassis::standard();
            let chassis_handle = chassis.handle();
            let meter = MockMeterTransport::new(MeterSnapshot {
                avg_voltage: 480.0,
                watts: 1200.0,
                energy_wh: 10.0,
                ..MeterSnapshot::default()
            });
            let meter_handle = meter.handle();
            let mut aggregator = Aggregator::new(
                clock,
                HardwareAdapter::new(Box::new(chassis)),
                MeterClient::new(Box::new(meter)),
            );
            let sink = Captured::default();
            aggregator.add_sink(Box::new(sink.clone()));
            Self {
                aggregator,
                time,
                chassis: chassis_handle,
                meter: meter_handle,
                sink,
            }
        }

        fn step(&mut self) -> TickOutcome {
            self.aggregator.hardware().poll_once().unwrap();
            let _ = self.aggregator.meter().poll_once();
            self.time.advance(Duration::from_secs(1));
            self.aggregator.tick()
        }
    }

    #[test]
    fn test_interval_one_output_equals_raw() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.chassis.set_thermocouple(0, 71.234);
        let outcome = rig.step();

        assert_eq!(outcome.raw, outcome.output);
        assert!(outcome.should_write);
        assert!(!outcome.test_active);
        assert_eq!(outcome.raw.thermocouples[0], Some(71.23));
        assert_eq!(outcome.raw.meter.watts, 1200.0);
        assert_eq!(rig.aggregator.log().len(), 1);
    }

    #[test]
    fn test_pulse_conversion() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.chassis.set_counters([1000, 1000, 0, 0]);
        rig.step();
        rig.aggregator.start_test();

        rig.chassis.set_counters([1005, 1005, 0, 0]);
        let first = rig.step();
        rig.chassis.set_counters([1009, 1009, 0, 0]);
        let second = rig.step();

        assert_eq!(first.raw.pulses[0], PulseValue { interval: 5.0, cumulative: 5.0 });
        assert_eq!(second.raw.pulses[0], PulseValue { interval: 4.0, cumulative: 9.0 });
        // Gas channel scales by 0.1
        assert_eq!(second.raw.pulses[1], PulseValue { interval: 0.4, cumulative: 0.9 });
    }

    #[test]
    fn test_out_of_band_readings_become_null() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.chassis.set_thermocouple(2, 9999.0);
        rig.chassis.set_thermocouple(3, f64::NAN);
        rig.chassis.set_analog([1.5, 4000.0]);
        let outcome = rig.step();

        assert_eq!(outcome.raw.thermocouples[2], None);
        assert_eq!(outcome.raw.thermocouples[3], None);
        assert_eq!(outcome.raw.analog, [Some(1.5), None]);
    }

    #[test]
    fn test_windowed_output() {
        let mut rig = Rig::new(ReportingInterval::FiveSeconds);
        let mut outcomes = Vec::new();
        for (i, value) in [70.0, 72.0, f64::NAN, 74.0, 76.0].into_iter().enumerate() {
            rig.chassis.set_thermocouple(0, value);
            rig.chassis.set_counters([i as u64 * 2, 0, 0, 0]);
            outcomes.push(rig.step());
        }

        let writes: Vec<bool> = outcomes.iter().map(|o| o.should_write).collect();
        assert_eq!(writes, [false, false, false, false, true]);

        let last = &outcomes[4].output;
        assert_eq!(last.thermocouples[0], Some(73.0));
        assert_eq!(last.pulses[0].interval, 8.0);
        assert_eq!(last.pulses[0].cumulative, 8.0);
        assert_eq!(last.test_minutes, 0.08);
    }

    #[test]
    fn test_start_clears_log_and_emits_t0() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.step();
        rig.step();
        assert_eq!(rig.aggregator.log().len(), 2);

        rig.aggregator.start_test();
        assert!(rig.aggregator.log().is_empty());
        assert_eq!(rig.aggregator.clock().elapsed_secs, 0);
        assert_eq!(rig.aggregator.latest_status().unwrap().text, STATUS_TESTING);

        let (t0, active, due) = rig.sink.0.lock().last().cloned().unwrap();
        assert!(active && due);
        assert_eq!(t0.test_minutes, 0.0);
        assert_eq!(t0.meter.watts, 1200.0);
    }

    #[test]
    fn test_t0_without_hardware_reading_posts_status() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.aggregator.start_test();

        let (t0, active, due) = rig.sink.0.lock().last().cloned().unwrap();
        assert!(active && due);
        assert_eq!(t0.thermocouples[0], Some(0.0));
        assert_eq!(rig.aggregator.latest_status().unwrap().text, STATUS_HARDWARE_ERROR);
        assert!(!rig.aggregator.subscribe().borrow().hardware_live);
    }

    #[tokio::test]
    async fn test_wait_for_first_readings_times_out_without_chassis() {
        let rig = Rig::new(ReportingInterval::OneSecond);
        rig.aggregator.meter().poll_once().unwrap();
        assert!(
            !rig.aggregator
                .wait_for_first_readings(Duration::from_millis(20))
                .await
        );

        rig.aggregator.hardware().poll_once().unwrap();
        assert!(
            rig.aggregator
                .wait_for_first_readings(Duration::from_millis(20))
                .await
        );
    }

    #[test]
    fn test_start_queues_energy_reset() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.step();
        rig.aggregator.start_test();
        let outcome = rig.step();

        assert_eq!(rig.meter.writes(), vec![(ENERGY_RESET_REGISTER, ENERGY_RESET_COMMAND)]);
        assert_eq!(outcome.raw.meter.energy_wh, 0.0);
    }

    #[test]
    fn test_stop_keeps_sampling() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.aggregator.start_test();
        rig.step();
        rig.aggregator.stop_test();
        let outcome = rig.step();

        assert!(!outcome.test_active);
        assert_eq!(rig.aggregator.log().len(), 2);
        assert_eq!(rig.aggregator.latest_status().unwrap().text, STATUS_CONCLUDED);
    }

    #[test]
    fn test_reset_keeps_test_flag() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.step();
        rig.aggregator.reset();
        assert!(!rig.aggregator.is_test_active());
        assert!(rig.aggregator.log().is_empty());

        rig.aggregator.start_test();
        rig.step();
        rig.aggregator.reset();
        assert!(rig.aggregator.is_test_active());
    }

    #[test]
    fn test_missing_hardware_records_zeros() {
        let time = ManualTime::new();
        let clock = ClockEngine::with_time_source(ReportingInterval::OneSecond, Box::new(time.clone()));
        let mut aggregator = Aggregator::new(
            clock,
            HardwareAdapter::new(Box::new(MockChassis::new(ChassisInventory::default()))),
            MeterClient::new(Box::new(MockMeterTransport::simulated())),
        );
        aggregator.meter().poll_once().unwrap();
        time.advance(Duration::from_secs(1));
        let outcome = aggregator.tick();

        assert!(outcome.degraded());
        assert_eq!(outcome.raw, FusedRecord::zeroed(outcome.raw.time_of_day, outcome.raw.test_minutes));
        assert_eq!(aggregator.latest_status().unwrap().text, STATUS_HARDWARE_ERROR);

        // Status is posted once per outage
        aggregator.tick();
        let count = aggregator
            .status_messages()
            .filter(|m| m.text == STATUS_HARDWARE_ERROR)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_staged_conversion_applies_on_start() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        let mut conversion = ConversionConfig::default();
        conversion.pulse_channels[0].factor = 2.0;
        rig.aggregator.stage_conversion(conversion).unwrap();
        assert_eq!(rig.aggregator.conversion().factors()[0], 1.0);

        rig.aggregator.start_test();
        assert_eq!(rig.aggregator.conversion().factors()[0], 2.0);

        let mut bad = ConversionConfig::default();
        bad.pulse_channels.clear();
        assert!(rig.aggregator.stage_conversion(bad).is_err());
    }

    #[test]
    fn test_chart_series_and_channel_selection() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        rig.chassis.set_thermocouple(0, 70.0);
        rig.chassis.set_thermocouple(5, 80.0);
        rig.aggregator.select_channels(vec![5, 0]).unwrap();
        rig.step();
        rig.step();

        let series = rig.aggregator.chart_series(1);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values, vec![Some(80.0), Some(70.0)]);
        assert!(rig.aggregator.select_channels(vec![32]).is_err());
    }

    #[test]
    fn test_set_interval_rejects_unsupported() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        assert!(rig.aggregator.set_interval(30).is_ok());
        assert!(matches!(
            rig.aggregator.set_interval(7),
            Err(DaqError::InvalidInterval(7))
        ));
        assert_eq!(rig.aggregator.clock.interval(), ReportingInterval::ThirtySeconds);
    }

    #[tokio::test]
    async fn test_live_view_follows_ticks() {
        let mut rig = Rig::new(ReportingInterval::OneSecond);
        let mut rx = rig.aggregator.subscribe();
        rig.aggregator.start_test();
        rig.step();

        rx.changed().await.unwrap();
        let view = rx.borrow_and_update().clone();
        assert!(view.test_active);
        assert!(view.hardware_live);
        assert!(view.raw.is_some());
        assert!(view.meter.connected);
    }
}
