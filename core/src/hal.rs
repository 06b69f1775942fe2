//! Peripheral interfaces driven by the modulation backends
//!
//! Each backend owns exactly one peripheral. Implementations must not block:
//! these calls sit on the per-sample path.

use crate::error::Result;

/// Logic level of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Coefficient register image of a fractional-N synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthCoefficients {
    pub low_revision: bool,
    pub o_div: u8,
    pub sdm0: u8,
    pub sdm1: u8,
    pub sdm2: u8,
}

/// Fractional-N clock generator with a routable output
pub trait ClockSynthesizer: Send {
    /// Power the synthesizer from the reference oscillator
    fn power_up(&mut self) -> Result<()>;

    fn write_coefficients(&mut self, coefficients: SynthCoefficients) -> Result<()>;

    /// Connect or disconnect the generated clock from the output pin
    fn route_output(&mut self, routed: bool) -> Result<()>;

    fn power_down(&mut self) -> Result<()>;
}

/// Square-wave timer whose period is set by a Q8 fixed-point divider
pub trait CarrierTimer: Send {
    fn acquire(&mut self) -> Result<()>;

    /// Clock feeding the divider
    fn source_clock_hz(&self) -> u32;

    /// Largest divider the hardware accepts, in Q8
    fn max_divider_q8(&self) -> u32;

    /// Reprogram the period and restart output at 50% duty
    fn configure(&mut self, divider_q8: u32) -> Result<()>;

    /// Halt the output and hold the line at `idle`
    fn stop(&mut self, idle: Level) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

/// Two-edge waveform item: `high_ticks` high then `low_ticks` low, `repeat` times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseDescriptor {
    pub high_ticks: u16,
    pub low_ticks: u16,
    pub repeat: u32,
}

impl PulseDescriptor {
    pub fn period_ticks(&self) -> u32 {
        self.high_ticks as u32 + self.low_ticks as u32
    }
}

/// Queued waveform generator
pub trait WaveformChannel: Send {
    fn acquire(&mut self) -> Result<()>;

    /// Tick rate of descriptor durations
    fn resolution_hz(&self) -> u32;

    /// Number of descriptors the queue holds
    fn queue_depth(&self) -> usize;

    /// Queue a descriptor; returns `false` when the queue is full
    fn try_enqueue(&mut self, pulse: PulseDescriptor) -> Result<bool>;

    /// Drop queued descriptors and hold the line at `idle`
    fn flush(&mut self, idle: Level) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}
