//! Transmitter control surface
//!
//! [`FmTransmitter`] is the single owned context for one carrier: it holds the
//! active backend and runs the per-sample path. [`TransmitterHandle`] is the
//! cross-thread side used for reconfiguration; it never touches the backend,
//! only atomics that the sample path reads at the next sample boundary.

use crate::backend::{self, ModulationBackend};
use crate::code::{plan, DeviationLimit, FrequencyCode, FrequencyPlan, ReferenceClock};
use crate::config::TransmitterConfig;
use crate::deviation::DeviationEncoder;
use crate::error::{FmError, Result};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Baseline code and its deviation limit, published as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub code: FrequencyCode,
    pub limit: DeviationLimit,
}

impl Baseline {
    fn pack(&self) -> u64 {
        self.code.pack() as u64 | (self.limit.units() as u64) << 32
    }

    fn unpack(bits: u64) -> Self {
        Self {
            code: FrequencyCode::unpack(bits as u32),
            limit: DeviationLimit::new((bits >> 32) as u16),
        }
    }
}

impl From<&FrequencyPlan> for Baseline {
    fn from(plan: &FrequencyPlan) -> Self {
        Self {
            code: plan.code,
            limit: plan.deviation_limit,
        }
    }
}

/// Point-in-time copy of the diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub samples: u64,
    pub apply_errors: u64,
    pub timing_violations: u64,
    pub missed_deadlines: u64,
}

#[derive(Debug)]
struct Shared {
    reference: ReferenceClock,
    max_deviation_hz: u32,
    // Held while publishing so the carrier and its baseline change together
    carrier_hz: Mutex<u32>,
    baseline: AtomicU64,
    enabled: AtomicBool,
    samples: AtomicU64,
    apply_errors: AtomicU64,
    timing_violations: AtomicU64,
    missed_deadlines: AtomicU64,
}

/// Cloneable handle for reconfiguring a running transmitter from any thread
#[derive(Debug, Clone)]
pub struct TransmitterHandle {
    shared: Arc<Shared>,
}

impl TransmitterHandle {
    fn new(config: &TransmitterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                reference: config.reference,
                max_deviation_hz: config.max_deviation_hz,
                carrier_hz: Mutex::new(config.carrier_hz),
                baseline: AtomicU64::new(0),
                enabled: AtomicBool::new(false),
                samples: AtomicU64::new(0),
                apply_errors: AtomicU64::new(0),
                timing_violations: AtomicU64::new(0),
                missed_deadlines: AtomicU64::new(0),
            }),
        }
    }

    /// Re-plan the carrier and publish the new baseline
    ///
    /// The sample path picks it up on its next sample. On error the previous
    /// baseline stays in effect.
    pub fn set_frequency(&self, carrier_hz: u32) -> Result<FrequencyPlan> {
        let plan = plan(carrier_hz, self.shared.max_deviation_hz, self.shared.reference)?;
        self.publish(&plan);
        info!(
            "carrier set to {} Hz (o_div={}, sdm2={}, frac=0x{:04X}, dev={} LSB)",
            carrier_hz,
            plan.code.output_divider,
            plan.code.integer_part,
            plan.code.fractional_part,
            plan.deviation_limit.units()
        );
        Ok(plan)
    }

    /// Request transmission; the backend is enabled at the next sample
    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::Release);
    }

    /// Request silence; the carrier idles at the next sample
    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn carrier_hz(&self) -> u32 {
        *self
            .shared
            .carrier_hz
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn baseline(&self) -> Baseline {
        Baseline::unpack(self.shared.baseline.load(Ordering::Acquire))
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples: self.shared.samples.load(Ordering::Relaxed),
            apply_errors: self.shared.apply_errors.load(Ordering::Relaxed),
            timing_violations: self.shared.timing_violations.load(Ordering::Relaxed),
            missed_deadlines: self.shared.missed_deadlines.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, plan: &FrequencyPlan) {
        let mut carrier_hz = self
            .shared
            .carrier_hz
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared
            .baseline
            .store(Baseline::from(plan).pack(), Ordering::Release);
        *carrier_hz = plan.target_hz;
    }

    pub(crate) fn record_apply_error(&self) {
        self.shared.apply_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timing_violation(&self) {
        self.shared.timing_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_missed_deadline(&self) {
        self.shared.missed_deadlines.fetch_add(1, Ordering::Relaxed);
    }
}

/// FM transmitter bound to one modulation backend
pub struct FmTransmitter {
    config: TransmitterConfig,
    backend: Box<dyn ModulationBackend>,
    handle: TransmitterHandle,
    initialized: bool,
}

impl FmTransmitter {
    pub fn new(config: TransmitterConfig, backend: Box<dyn ModulationBackend>) -> Self {
        Self {
            handle: TransmitterHandle::new(&config),
            config,
            backend,
            initialized: false,
        }
    }

    /// Transmitter over simulated peripherals of the configured backend kind
    pub fn simulated(config: TransmitterConfig) -> Self {
        Self::new(config, backend::simulated(config.backend))
    }

    pub fn config(&self) -> &TransmitterConfig {
        &self.config
    }

    pub fn handle(&self) -> TransmitterHandle {
        self.handle.clone()
    }

    pub fn backend(&self) -> &dyn ModulationBackend {
        self.backend.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Plan the carrier, acquire the backend and load the baseline code
    ///
    /// Leaves the transmitter disabled. On failure the backend is released and
    /// `init` may be called again.
    pub fn init(&mut self) -> Result<FrequencyPlan> {
        self.handle.disable();
        self.config.validate()?;

        let plan = plan(
            self.handle.carrier_hz(),
            self.config.max_deviation_hz,
            self.config.reference,
        )?;

        if self.initialized {
            self.release_backend();
        }

        let context = self.config.context();
        let started = self
            .backend
            .initialize(context)
            .and_then(|_| self.backend.apply(plan.code));
        if let Err(e) = started {
            warn!("{} backend failed to start: {}", self.backend.kind(), e);
            self.release_backend();
            return Err(e);
        }

        self.handle.publish(&plan);
        self.initialized = true;
        info!(
            "FM transmitter ready: {} Hz via {} backend, \
             o_div={}, sdm2={}, frac=0x{:04X}, dev={} LSB",
            plan.target_hz,
            self.backend.kind(),
            plan.code.output_divider,
            plan.code.integer_part,
            plan.code.fractional_part,
            plan.deviation_limit.units()
        );
        Ok(plan)
    }

    /// Re-plan the carrier and move the hardware to the new baseline now
    pub fn set_frequency(&mut self, carrier_hz: u32) -> Result<FrequencyPlan> {
        let plan = self.handle.set_frequency(carrier_hz)?;
        self.config.carrier_hz = carrier_hz;
        if self.initialized {
            self.backend.apply(plan.code)?;
        }
        Ok(plan)
    }

    /// Run one audio sample through the encoder and the backend
    ///
    /// Enable and disable requests made through the handle take effect here.
    pub fn send_sample(&mut self, sample: u8) -> Result<()> {
        if !self.initialized {
            return Err(FmError::NotInitialized);
        }
        self.handle.shared.samples.fetch_add(1, Ordering::Relaxed);

        let baseline = self.handle.baseline();
        if !self.handle.is_enabled() {
            if self.backend.is_enabled() {
                self.idle(baseline.code)?;
            }
            return Ok(());
        }

        if !self.backend.is_enabled() {
            self.start()?;
        }

        let code = DeviationEncoder::new(baseline.limit).encode(baseline.code, sample);
        self.backend.apply(code)
    }

    pub fn enable(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(FmError::NotInitialized);
        }
        self.handle.enable();
        self.start()
    }

    /// Stop emitting and park the hardware on the baseline code
    pub fn disable(&mut self) -> Result<()> {
        self.handle.disable();
        if self.initialized && self.backend.is_enabled() {
            let baseline = self.handle.baseline();
            self.idle(baseline.code)?;
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_enabled()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.handle.diagnostics()
    }

    /// Disable and release the hardware channel
    pub fn shutdown(&mut self) -> Result<()> {
        self.handle.disable();
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        // Release the channel even when it could not be stopped cleanly
        let stopped = self.backend.disable();
        let released = self.backend.shutdown();
        stopped.and(released)?;
        info!("FM transmitter shut down");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if let Err(e) = self.backend.enable() {
            warn!("{} backend failed to enable: {}", self.backend.kind(), e);
            self.handle.disable();
            return Err(e);
        }
        info!("FM transmitter enabled");
        Ok(())
    }

    fn idle(&mut self, code: FrequencyCode) -> Result<()> {
        self.backend.disable()?;
        self.backend.apply(code)?;
        info!("FM transmitter disabled");
        Ok(())
    }

    fn release_backend(&mut self) {
        self.initialized = false;
        if let Err(e) = self.backend.shutdown() {
            warn!("{} backend failed to release: {}", self.backend.kind(), e);
        }
    }
}

impl Drop for FmTransmitter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("shutdown on drop failed: {}", e);
        }
    }
}
