//! Modulation backends
//!
//! Three interchangeable strategies apply a [`FrequencyCode`] to the physical
//! carrier. The variant is picked once, at configuration time, through
//! [`BackendKind`]; the sample pipeline only sees [`ModulationBackend`].

pub mod direct;
pub mod pulse_train;
pub mod retuned;

pub use direct::DirectSynthesizer;
pub use pulse_train::PulseTrain;
pub use retuned::RetunedCarrier;

use crate::code::{FrequencyCode, ReferenceClock};
use crate::error::{FmError, Result};
use crate::sim::{SimSynthesizer, SimTimer, SimWaveformChannel};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Highest odd harmonic the square-wave variants will fall back to
pub(crate) const MAX_HARMONIC: u32 = 31;

/// Backend variant selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Fractional-N synthesizer with direct coefficient writes
    #[default]
    Direct,
    /// Timer retuned every sample
    Retuned,
    /// Queued pulse-train generator
    PulseTrain,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Direct,
        BackendKind::Retuned,
        BackendKind::PulseTrain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Direct => "direct",
            BackendKind::Retuned => "retuned",
            BackendKind::PulseTrain => "pulse-train",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = FmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "synth" | "apll" => Ok(BackendKind::Direct),
            "retuned" | "pwm" | "timer" => Ok(BackendKind::Retuned),
            "pulse-train" | "pulse_train" | "pulse" => Ok(BackendKind::PulseTrain),
            other => Err(FmError::InvalidConfig(format!("unknown backend '{}'", other))),
        }
    }
}

/// How a backend's `apply` relates to the sample period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingClass {
    /// `apply` finishes the hardware update before returning
    Blocking,
    /// `apply` enqueues; up to `depth` samples may be in flight
    Queued { depth: usize },
}

impl TimingClass {
    /// Periods a sample may start late before it counts as a missed deadline
    pub fn lateness_tolerance(&self) -> u32 {
        match self {
            TimingClass::Blocking => 1,
            TimingClass::Queued { depth } => (*depth).max(1) as u32,
        }
    }
}

/// Fixed parameters a backend receives on initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulationContext {
    pub reference: ReferenceClock,
    pub sample_rate: u32,
}

impl ModulationContext {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate.max(1) as f64)
    }
}

/// Mutable state every backend keeps next to its peripheral
#[derive(Debug, Clone, Copy, Default)]
pub struct ModulationState {
    pub context: Option<ModulationContext>,
    pub current: Option<FrequencyCode>,
    pub enabled: bool,
}

impl ModulationState {
    pub fn context(&self) -> Result<ModulationContext> {
        self.context.ok_or(FmError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }
}

/// Contract shared by all modulation strategies
///
/// A backend exclusively owns its peripheral. `disable` must leave the line in
/// a fixed idle state with no residual emission.
pub trait ModulationBackend: Send {
    fn kind(&self) -> BackendKind;

    fn timing_class(&self) -> TimingClass;

    /// Acquire the peripheral; may be called again after `shutdown`
    fn initialize(&mut self, context: ModulationContext) -> Result<()>;

    /// Apply a code to the carrier. Must not block past one sample interval.
    fn apply(&mut self, code: FrequencyCode) -> Result<()>;

    fn enable(&mut self) -> Result<()>;

    fn disable(&mut self) -> Result<()>;

    fn is_enabled(&self) -> bool;

    /// Disable and release the peripheral
    fn shutdown(&mut self) -> Result<()>;

    /// Code most recently accepted by `apply`
    fn last_applied(&self) -> Option<FrequencyCode>;
}

/// Smallest odd harmonic whose fundamental fits under `max_fundamental_hz`
pub(crate) fn harmonic_for(target_hz: f64, max_fundamental_hz: f64) -> u32 {
    let mut harmonic = 1;
    while target_hz / harmonic as f64 > max_fundamental_hz && harmonic < MAX_HARMONIC {
        harmonic += 2;
    }
    harmonic
}

/// Build a backend of the given kind over simulated peripherals
pub fn simulated(kind: BackendKind) -> Box<dyn ModulationBackend> {
    match kind {
        BackendKind::Direct => Box::new(DirectSynthesizer::new(SimSynthesizer::new())),
        BackendKind::Retuned => Box::new(RetunedCarrier::new(SimTimer::default())),
        BackendKind::PulseTrain => Box::new(PulseTrain::new(SimWaveformChannel::default())),
    }
}
