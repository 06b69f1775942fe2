//! Analog FM engine for fractional-N carrier synthesis
//!
//! Converts 8-bit audio samples into per-sample deviations of a carrier frequency
//! and applies them through interchangeable hardware backends.

pub mod error;
pub mod code;
pub mod deviation;
pub mod hal;
pub mod sim;
pub mod backend;
pub mod config;
pub mod transmitter;
pub mod clock;
pub mod source;

pub use code::{plan, DeviationLimit, FrequencyCode, FrequencyPlan, ReferenceClock};
pub use deviation::{apply_offset, sample_to_offset, DeviationEncoder};
pub use backend::{BackendKind, ModulationBackend, ModulationContext, TimingClass};
pub use config::TransmitterConfig;
pub use transmitter::{DiagnosticsSnapshot, FmTransmitter, TransmitterHandle};
pub use clock::{MonotonicClock, RunReport, SampleClock, SampleTask, SystemClock, VirtualClock};
pub use source::{BufferSource, SampleSource, Silence, ToneSource};
pub use error::{FmError, Result};

// Carrier defaults
pub const DEFAULT_CARRIER_HZ: u32 = 85_000_000; // 85.0 MHz
pub const MAX_DEVIATION_HZ: u32 = 75_000; // ±75 kHz broadcast swing
pub const DEFAULT_REFERENCE_HZ: u32 = 40_000_000;

// Sample rates
pub const DEFAULT_SAMPLE_RATE: u32 = 8_000;
pub const CD_SAMPLE_RATE: u32 = 44_100;

// Synthesizer limits
pub const MIN_VCO_HZ: u64 = 350_000_000;
pub const MAX_OUTPUT_DIVIDER: u8 = 31;
pub const MAX_INTEGER_PART: u8 = 63;
pub const INTEGER_OFFSET: u32 = 4; // multiplier = 4 + sdm2 + frac / 65536
pub const FRACTION_SCALE: u32 = 65_536;

/// Audio sample value that maps to zero deviation
pub const SAMPLE_CENTER: u8 = 128;
