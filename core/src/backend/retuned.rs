use super::{
    harmonic_for, BackendKind, ModulationBackend, ModulationContext, ModulationState, TimingClass,
};
use crate::code::FrequencyCode;
use crate::error::{FmError, Result};
use crate::hal::{CarrierTimer, Level};
use log::{info, warn};

/// Highest sample rate at which per-sample timer reprogramming is expected to
/// keep up
pub const RETUNED_MAX_SAMPLE_RATE: u32 = 8_000;

/// Smallest divider, in Q8, that still yields a square wave
const MIN_DIVIDER_Q8: u32 = 2 << 8;

/// Carrier produced by a square-wave timer retuned on every sample
///
/// The timer's divider is Q8 fixed point, so the carrier moves in discrete
/// steps. Carriers above half the timer clock are reached through an odd
/// harmonic of the square wave.
///
/// Known limitation: each `apply` reconfigures the timer, which dominates the
/// per-sample cost and can overrun the interval at 44.1 kHz. Reconfiguration
/// is skipped when the divider does not change, but this variant is only
/// dependable at reduced sample rates.
pub struct RetunedCarrier<T: CarrierTimer> {
    timer: T,
    state: ModulationState,
    wanted_q8: Option<u32>,
    programmed_q8: Option<u32>,
    harmonic: u32,
}

impl<T: CarrierTimer> RetunedCarrier<T> {
    pub fn new(timer: T) -> Self {
        Self {
            timer,
            state: ModulationState::default(),
            wanted_q8: None,
            programmed_q8: None,
            harmonic: 1,
        }
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Harmonic used for the most recent code
    pub fn harmonic(&self) -> u32 {
        self.harmonic
    }

    /// Carrier frequency the timer actually produces for the last code
    pub fn achieved_hz(&self) -> Option<f64> {
        self.wanted_q8.map(|q8| {
            self.timer.source_clock_hz() as f64 * 256.0 / q8 as f64 * self.harmonic as f64
        })
    }

    fn divider_for(&self, code: FrequencyCode, reference_hz: u32) -> (u32, u32) {
        let target_hz = code.output_hz(reference_hz);
        let source_hz = self.timer.source_clock_hz() as f64;
        let harmonic = harmonic_for(target_hz, source_hz / 2.0);
        let fundamental_hz = target_hz / harmonic as f64;

        let q8 = (source_hz * 256.0 / fundamental_hz).round();
        let q8 = q8.clamp(MIN_DIVIDER_Q8 as f64, self.timer.max_divider_q8() as f64) as u32;
        (harmonic, q8)
    }

    fn program(&mut self) -> Result<()> {
        if let Some(q8) = self.wanted_q8 {
            if self.programmed_q8 != Some(q8) {
                self.timer.configure(q8)?;
                self.programmed_q8 = Some(q8);
            }
        }
        Ok(())
    }
}

impl<T: CarrierTimer> ModulationBackend for RetunedCarrier<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::Retuned
    }

    fn timing_class(&self) -> TimingClass {
        TimingClass::Blocking
    }

    fn initialize(&mut self, context: ModulationContext) -> Result<()> {
        if self.timer.max_divider_q8() < MIN_DIVIDER_Q8 {
            return Err(FmError::Resource(format!(
                "timer divider range tops out at {}/256, below the minimum of {}/256",
                self.timer.max_divider_q8(),
                MIN_DIVIDER_Q8
            )));
        }
        self.timer.acquire()?;
        self.timer.stop(Level::Low)?;

        if context.sample_rate > RETUNED_MAX_SAMPLE_RATE {
            warn!(
                "retuned carrier may overrun at {} Hz (rated for {} Hz)",
                context.sample_rate, RETUNED_MAX_SAMPLE_RATE
            );
        }

        self.state = ModulationState {
            context: Some(context),
            ..ModulationState::default()
        };
        self.wanted_q8 = None;
        self.programmed_q8 = None;
        info!("timer backend ready, source clock {} Hz", self.timer.source_clock_hz());
        Ok(())
    }

    fn apply(&mut self, code: FrequencyCode) -> Result<()> {
        let context = self.state.context()?;
        let (harmonic, q8) = self.divider_for(code, context.reference.frequency_hz);
        self.harmonic = harmonic;
        self.wanted_q8 = Some(q8);

        if self.state.enabled {
            self.program()?;
        }
        self.state.current = Some(code);
        Ok(())
    }

    fn enable(&mut self) -> Result<()> {
        self.state.context()?;
        self.state.enabled = true;
        self.program()
    }

    fn disable(&mut self) -> Result<()> {
        if !self.state.enabled {
            return Ok(());
        }
        self.timer.stop(Level::Low)?;
        self.programmed_q8 = None;
        self.state.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.state.is_initialized() {
            return Ok(());
        }
        let stopped = self.timer.stop(Level::Low);
        let released = self.timer.release();
        self.state = ModulationState::default();
        self.wanted_q8 = None;
        self.programmed_q8 = None;
        stopped.and(released)
    }

    fn last_applied(&self) -> Option<FrequencyCode> {
        self.state.current
    }
}
