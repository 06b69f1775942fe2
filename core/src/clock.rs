//! Sample clock
//!
//! Paces the transmitter at the audio sample rate. Deadlines are absolute
//! (`start + n / rate`), so rounding never accumulates into drift, and the
//! lateness of every wake-up is measured. A sample that starts later than the
//! backend tolerates counts as a missed deadline and the schedule restarts
//! from the current time instead of bursting to catch up.

use crate::error::{FmError, Result};
use crate::source::SampleSource;
use crate::transmitter::{FmTransmitter, TransmitterHandle};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Remaining wait below which `SystemClock` spins instead of sleeping
const SPIN_WINDOW: Duration = Duration::from_micros(200);

/// Monotonic time source the sample clock schedules against
pub trait MonotonicClock: Send {
    /// Time elapsed since the clock's epoch
    fn now(&self) -> Duration;

    /// Return once `now() >= deadline`
    fn sleep_until(&self, deadline: Duration);
}

/// Wall-clock time: sleeps coarsely, then spins to the deadline
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        loop {
            let now = self.now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            if remaining > SPIN_WINDOW {
                thread::sleep(remaining - SPIN_WINDOW);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Deterministic clock that only moves when told to
///
/// Clones share the same time, so a test backend can charge its own latency
/// to the clock the sample loop is reading.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    nanos: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl MonotonicClock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    fn sleep_until(&self, deadline: Duration) {
        self.nanos.fetch_max(deadline.as_nanos() as u64, Ordering::AcqRel);
    }
}

/// Outcome of a sample clock run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub samples: u64,
    pub apply_errors: u64,
    pub timing_violations: u64,
    pub missed_deadlines: u64,
    pub max_lateness: Duration,
    pub mean_lateness: Duration,
    pub max_apply_time: Duration,
}

/// Periodic driver for the per-sample pipeline
pub struct SampleClock<C: MonotonicClock> {
    clock: C,
    sample_rate: u32,
    period: Duration,
    start: Option<Duration>,
    index: u64,
    report: RunReport,
    total_lateness: Duration,
}

impl<C: MonotonicClock> SampleClock<C> {
    pub fn new(sample_rate: u32, clock: C) -> Result<Self> {
        if sample_rate == 0 {
            return Err(FmError::InvalidConfig("sample rate must be positive".to_string()));
        }
        Ok(Self {
            clock,
            sample_rate,
            period: Duration::from_nanos(NANOS_PER_SEC / sample_rate as u64),
            start: None,
            index: 0,
            report: RunReport::default(),
            total_lateness: Duration::ZERO,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn report(&self) -> RunReport {
        let mut report = self.report;
        if report.samples > 0 {
            let mean_ns = self.total_lateness.as_nanos() / report.samples as u128;
            report.mean_lateness = Duration::from_nanos(u64::try_from(mean_ns).unwrap_or(u64::MAX));
        }
        report
    }

    /// Pull samples from `source` until it runs dry or `stop` is raised
    ///
    /// Errors from the transmitter are counted and the loop moves on to the
    /// next sample.
    pub fn run<S>(
        &mut self,
        tx: &mut FmTransmitter,
        source: &mut S,
        stop: &AtomicBool,
    ) -> RunReport
    where
        S: SampleSource + ?Sized,
    {
        let handle = tx.handle();
        let tolerance = tx.backend().timing_class().lateness_tolerance();
        info!(
            "sample clock running at {} Hz ({:?} per sample) on {} backend",
            self.sample_rate,
            self.period,
            tx.backend().kind()
        );

        while !stop.load(Ordering::Acquire) {
            let Some(sample) = source.next_sample() else {
                debug!("sample source exhausted");
                break;
            };
            self.dispatch(tx, &handle, tolerance, sample);
        }

        let report = self.report();
        info!(
            "sample clock stopped: {} samples, {} errors, \
             {} timing violations, {} missed deadlines",
            report.samples, report.apply_errors, report.timing_violations, report.missed_deadlines
        );
        report
    }

    fn dispatch(
        &mut self,
        tx: &mut FmTransmitter,
        handle: &TransmitterHandle,
        tolerance: u32,
        sample: u8,
    ) {
        let lateness = self.wait_next(tolerance);
        if lateness > self.period * tolerance {
            self.report.missed_deadlines += 1;
            handle.record_missed_deadline();
            debug!("sample {} started {:?} late, resynchronizing", self.report.samples, lateness);
        }
        self.total_lateness = self.total_lateness.saturating_add(lateness);
        self.report.max_lateness = self.report.max_lateness.max(lateness);

        let started = self.clock.now();
        let result = tx.send_sample(sample);
        let elapsed = self.clock.now().saturating_sub(started);

        self.report.samples += 1;
        self.report.max_apply_time = self.report.max_apply_time.max(elapsed);

        if let Err(e) = result {
            self.report.apply_errors += 1;
            handle.record_apply_error();
            debug!("sample {} not applied: {}", self.report.samples, e);
        }

        if elapsed > self.period {
            self.report.timing_violations += 1;
            handle.record_timing_violation();
            let violation = FmError::TimingViolation {
                elapsed,
                budget: self.period,
            };
            debug!("sample {}: {}", self.report.samples, violation);
        }
    }

    /// Sleep until the next deadline and return how late the wake-up was
    fn wait_next(&mut self, tolerance: u32) -> Duration {
        let start = *self.start.get_or_insert_with(|| self.clock.now());
        let offset = self.index * NANOS_PER_SEC / self.sample_rate as u64;
        let deadline = start + Duration::from_nanos(offset);

        self.clock.sleep_until(deadline);
        let woke = self.clock.now();
        let lateness = woke.saturating_sub(deadline);

        if lateness > self.period * tolerance {
            // Next deadline is one period after this wake-up
            self.start = Some(woke);
            self.index = 1;
        } else {
            self.index += 1;
        }
        lateness
    }
}

impl<C: MonotonicClock + 'static> SampleClock<C> {
    /// Run the loop on a dedicated thread that owns the transmitter
    pub fn spawn<S>(mut self, mut tx: FmTransmitter, mut source: S) -> Result<SampleTask>
    where
        S: SampleSource + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = tx.handle();

        let join = thread::Builder::new()
            .name("fm-sample-clock".to_string())
            .spawn(move || {
                let report = self.run(&mut tx, &mut source, &flag);
                (tx, report)
            })
            .map_err(|e| FmError::Resource(format!("cannot start sample thread: {}", e)))?;

        Ok(SampleTask { stop, handle, join })
    }
}

/// Sample clock running on its own thread
pub struct SampleTask {
    stop: Arc<AtomicBool>,
    handle: TransmitterHandle,
    join: JoinHandle<(FmTransmitter, RunReport)>,
}

impl SampleTask {
    pub fn handle(&self) -> &TransmitterHandle {
        &self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop after the current sample and hand the transmitter back
    pub fn stop(self) -> Result<(FmTransmitter, RunReport)> {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    /// Wait for the source to run dry
    pub fn join(self) -> Result<(FmTransmitter, RunReport)> {
        self.join
            .join()
            .map_err(|_| FmError::Resource("sample thread panicked".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendKind, DirectSynthesizer, ModulationBackend, ModulationContext, PulseTrain,
        TimingClass,
    };
    use crate::code::FrequencyCode;
    use crate::config::TransmitterConfig;
    use crate::sim::{SimSynthesizer, SimWaveformChannel};
    use crate::source::{Silence, ToneSource};

    /// Wraps a backend and charges a fixed cost per `apply` to a virtual clock
    struct SlowBackend {
        inner: Box<dyn ModulationBackend>,
        clock: VirtualClock,
        cost: Duration,
    }

    impl ModulationBackend for SlowBackend {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }
        fn timing_class(&self) -> TimingClass {
            self.inner.timing_class()
        }
        fn initialize(&mut self, context: ModulationContext) -> Result<()> {
            self.inner.initialize(context)
        }
        fn apply(&mut self, code: FrequencyCode) -> Result<()> {
            self.clock.advance(self.cost);
            self.inner.apply(code)
        }
        fn enable(&mut self) -> Result<()> {
            self.inner.enable()
        }
        fn disable(&mut self) -> Result<()> {
            self.inner.disable()
        }
        fn is_enabled(&self) -> bool {
            self.inner.is_enabled()
        }
        fn shutdown(&mut self) -> Result<()> {
            self.inner.shutdown()
        }
        fn last_applied(&self) -> Option<FrequencyCode> {
            self.inner.last_applied()
        }
    }

    fn slow_transmitter(
        inner: Box<dyn ModulationBackend>,
        clock: &VirtualClock,
        cost_us: u64,
    ) -> FmTransmitter {
        let backend = SlowBackend {
            inner,
            clock: clock.clone(),
            cost: Duration::from_micros(cost_us),
        };
        let mut tx = FmTransmitter::new(TransmitterConfig::default(), Box::new(backend));
        tx.init().unwrap();
        tx.enable().unwrap();
        tx
    }

    fn run_silence(tx: &mut FmTransmitter, clock: &VirtualClock, samples: usize) -> RunReport {
        let mut sampler = SampleClock::new(8_000, clock.clone()).unwrap();
        let mut source = Silence.take_samples(samples);
        sampler.run(tx, &mut source, &AtomicBool::new(false))
    }

    #[test]
    fn test_period_for_common_rates() {
        let clock = VirtualClock::new();
        assert_eq!(
            SampleClock::new(8_000, clock.clone()).unwrap().period(),
            Duration::from_micros(125)
        );
        assert_eq!(
            SampleClock::new(44_100, clock.clone()).unwrap().period(),
            Duration::from_nanos(22_675)
        );
        assert!(SampleClock::new(0, clock).is_err());
    }

    #[test]
    fn test_mean_lateness_past_u32_sample_count() {
        let mut sampler = SampleClock::new(8_000, VirtualClock::new()).unwrap();
        sampler.report.samples = 1 << 32;
        sampler.total_lateness = Duration::from_secs(1 << 32);
        assert_eq!(sampler.report().mean_lateness, Duration::from_secs(1));

        sampler.report.samples = (1 << 32) + 1;
        sampler.total_lateness = Duration::from_millis(1);
        assert_eq!(sampler.report().mean_lateness, Duration::ZERO);
    }

    #[test]
    fn test_mean_lateness_averages_samples() {
        let mut sampler = SampleClock::new(8_000, VirtualClock::new()).unwrap();
        assert_eq!(sampler.report().mean_lateness, Duration::ZERO);

        sampler.report.samples = 4;
        sampler.total_lateness = Duration::from_micros(10);
        assert_eq!(sampler.report().mean_lateness, Duration::from_nanos(2_500));
    }

    #[test]
    fn test_paces_on_absolute_deadlines() {
        let clock = VirtualClock::new();
        let mut tx = FmTransmitter::simulated(TransmitterConfig::default());
        tx.init().unwrap();
        tx.enable().unwrap();

        let report = run_silence(&mut tx, &clock, 100);

        assert_eq!(report.samples, 100);
        assert_eq!(report.apply_errors, 0);
        assert_eq!(report.timing_violations, 0);
        assert_eq!(report.missed_deadlines, 0);
        assert_eq!(report.max_lateness, Duration::ZERO);
        // The first sample fires immediately, the last at 99 periods
        assert_eq!(clock.now(), Duration::from_micros(99 * 125));
    }

    #[test]
    fn test_no_drift_at_44100() {
        let clock = VirtualClock::new();
        let mut tx = FmTransmitter::simulated(TransmitterConfig {
            sample_rate: 44_100,
            ..TransmitterConfig::default()
        });
        tx.init().unwrap();
        tx.enable().unwrap();

        let mut sampler = SampleClock::new(44_100, clock.clone()).unwrap();
        let mut source = Silence.take_samples(44_101);
        sampler.run(&mut tx, &mut source, &AtomicBool::new(false));

        // Sample 44100 lands on exactly one second
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_slow_apply_counts_timing_violations() {
        let clock = VirtualClock::new();
        let inner = Box::new(DirectSynthesizer::new(SimSynthesizer::new()));
        let mut tx = slow_transmitter(inner, &clock, 200);

        let report = run_silence(&mut tx, &clock, 20);

        assert_eq!(report.samples, 20);
        assert_eq!(report.timing_violations, 20);
        assert_eq!(report.apply_errors, 0);
        assert_eq!(report.max_apply_time, Duration::from_micros(200));
        assert_eq!(tx.diagnostics().timing_violations, 20);
    }

    #[test]
    fn test_overrun_resynchronizes_instead_of_bursting() {
        let clock = VirtualClock::new();
        let inner = Box::new(DirectSynthesizer::new(SimSynthesizer::new()));
        let mut tx = slow_transmitter(inner, &clock, 300);

        let report = run_silence(&mut tx, &clock, 10);

        // Every sample after the first starts 175 us late
        assert_eq!(report.missed_deadlines, 9);
        assert_eq!(report.max_lateness, Duration::from_micros(175));
        assert_eq!(tx.diagnostics().missed_deadlines, 9);
    }

    #[test]
    fn test_queued_backend_tolerates_more_lateness() {
        let blocking_clock = VirtualClock::new();
        let blocking = Box::new(DirectSynthesizer::new(SimSynthesizer::new()));
        let mut blocking_tx = slow_transmitter(blocking, &blocking_clock, 300);
        let blocking_report = run_silence(&mut blocking_tx, &blocking_clock, 40);

        let queued_clock = VirtualClock::new();
        let queued = Box::new(PulseTrain::new(SimWaveformChannel::default()));
        let mut queued_tx = slow_transmitter(queued, &queued_clock, 300);
        let queued_report = run_silence(&mut queued_tx, &queued_clock, 40);

        assert!(queued_report.missed_deadlines > 0);
        assert!(queued_report.missed_deadlines < blocking_report.missed_deadlines);
    }

    #[test]
    fn test_apply_errors_do_not_stop_the_loop() {
        let clock = VirtualClock::new();
        let synth = SimSynthesizer::new();
        let probe = synth.probe();
        let mut tx = FmTransmitter::new(
            TransmitterConfig::default(),
            Box::new(DirectSynthesizer::new(synth)),
        );
        tx.init().unwrap();
        tx.enable().unwrap();
        probe.fail_writes(true);

        let report = run_silence(&mut tx, &clock, 25);
        assert_eq!(report.samples, 25);
        assert_eq!(report.apply_errors, 25);
        assert_eq!(tx.diagnostics().apply_errors, 25);
    }

    #[test]
    fn test_disable_mid_stream_halts_updates() {
        let clock = VirtualClock::new();
        let synth = SimSynthesizer::new();
        let probe = synth.probe();
        let mut tx = FmTransmitter::new(
            TransmitterConfig::default(),
            Box::new(DirectSynthesizer::new(synth)),
        );
        let plan = tx.init().unwrap();
        tx.enable().unwrap();

        let handle = tx.handle();
        let mut count = 0u32;
        let mut source = move || {
            if count == 100 {
                return None;
            }
            if count == 50 {
                handle.disable();
            }
            count += 1;
            Some(255u8)
        };

        let mut sampler = SampleClock::new(8_000, clock).unwrap();
        sampler.run(&mut tx, &mut source, &AtomicBool::new(false));

        // Baseline at init, 50 modulated samples, one idle write
        assert_eq!(probe.writes(), 52);
        assert!(!probe.routed());
        assert_eq!(tx.backend().last_applied(), Some(plan.code));
    }

    #[test]
    fn test_stop_flag_checked_before_each_sample() {
        let clock = VirtualClock::new();
        let mut tx = FmTransmitter::simulated(TransmitterConfig::default());
        tx.init().unwrap();

        let mut sampler = SampleClock::new(8_000, clock).unwrap();
        let report = sampler.run(&mut tx, &mut Silence, &AtomicBool::new(true));
        assert_eq!(report.samples, 0);
    }

    #[test]
    fn test_spawned_task_accepts_cross_thread_retune() {
        let mut tx = FmTransmitter::simulated(TransmitterConfig::default());
        tx.init().unwrap();
        tx.enable().unwrap();

        let sampler = SampleClock::new(8_000, SystemClock::new()).unwrap();
        let task = sampler.spawn(tx, ToneSource::new(1_000.0, 8_000)).unwrap();

        let plan = task.handle().set_frequency(100_000_000).unwrap();
        thread::sleep(Duration::from_millis(50));

        let (tx, report) = task.stop().unwrap();
        assert!(report.samples > 0);
        let last = tx.backend().last_applied().unwrap();
        assert_eq!(last.output_divider, plan.code.output_divider);
        assert_eq!(tx.handle().carrier_hz(), 100_000_000);
    }
}
