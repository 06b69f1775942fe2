use super::{
    BackendKind, ModulationBackend, ModulationContext, ModulationState, TimingClass, MAX_HARMONIC,
};
use crate::code::FrequencyCode;
use crate::error::{FmError, Result};
use crate::hal::{Level, PulseDescriptor, WaveformChannel};

/// Longest half period a descriptor can carry, in ticks
pub const MAX_HALF_PERIOD_TICKS: u16 = 32_767;

/// Half periods shorter than this are only used when nothing longer fits
const MIN_HALF_PERIOD_TICKS: u16 = 4;

/// Descriptor for one sample interval and the harmonic that carries the signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePlan {
    pub harmonic: u32,
    pub pulse: PulseDescriptor,
}

impl PulsePlan {
    /// Frequency of the carrying harmonic on a channel ticking at `resolution_hz`
    pub fn emitted_hz(&self, resolution_hz: u32) -> f64 {
        resolution_hz as f64 * self.harmonic as f64 / self.pulse.period_ticks() as f64
    }
}

/// Carrier synthesized as a queued train of two-edge pulses
///
/// `apply` converts the instantaneous frequency into a half-period, wraps it
/// in a descriptor that fills one sample interval and returns as soon as the
/// descriptor is queued. The peripheral plays it while the next sample is
/// prepared, so the carrier trails the audio by one sample.
///
/// Half periods are whole ticks, so the carrier is placed on whichever odd
/// harmonic of the square wave lands closest to the wanted frequency. At
/// coarse resolutions the tick step can exceed the deviation swing, in which
/// case every code in the swing maps to the same descriptor.
pub struct PulseTrain<W: WaveformChannel> {
    channel: W,
    state: ModulationState,
    last_pulse: Option<PulseDescriptor>,
    harmonic: u32,
}

impl<W: WaveformChannel> PulseTrain<W> {
    pub fn new(channel: W) -> Self {
        Self {
            channel,
            state: ModulationState::default(),
            last_pulse: None,
            harmonic: 1,
        }
    }

    pub fn channel(&self) -> &W {
        &self.channel
    }

    /// Descriptor queued for the most recent code
    pub fn last_pulse(&self) -> Option<PulseDescriptor> {
        self.last_pulse
    }

    /// Harmonic carrying the most recent queued code
    pub fn harmonic(&self) -> u32 {
        self.harmonic
    }

    /// Build the descriptor for one sample interval at this code's frequency
    pub fn pulse_for(&self, code: FrequencyCode, context: ModulationContext) -> PulsePlan {
        let target_hz = code.output_hz(context.reference.frequency_hz);
        let resolution_hz = self.channel.resolution_hz() as f64;

        // (harmonic, half period, frequency error) for each odd harmonic
        let candidates = (1..=MAX_HARMONIC).step_by(2).map(|harmonic| {
            let half = (resolution_hz * harmonic as f64 / (2.0 * target_hz))
                .round()
                .clamp(1.0, MAX_HALF_PERIOD_TICKS as f64) as u16;
            let emitted_hz = resolution_hz * harmonic as f64 / (2.0 * half as f64);
            (harmonic, half, (emitted_hz - target_hz).abs())
        });
        // Ties keep the lower harmonic
        let closest = |best: Option<(u32, u16, f64)>, candidate: (u32, u16, f64)| match best {
            Some(best) if best.2 <= candidate.2 => Some(best),
            _ => Some(candidate),
        };
        let (harmonic, half, _) = candidates
            .clone()
            .filter(|&(_, half, _)| half >= MIN_HALF_PERIOD_TICKS)
            .fold(None, closest)
            .or_else(|| candidates.fold(None, closest))
            .unwrap_or((1, 1, 0.0));

        let interval_ticks = resolution_hz * context.sample_interval().as_secs_f64();
        let repeat = (interval_ticks / (2.0 * half as f64)).round().max(1.0) as u32;

        PulsePlan {
            harmonic,
            pulse: PulseDescriptor {
                high_ticks: half,
                low_ticks: half,
                repeat,
            },
        }
    }
}

impl<W: WaveformChannel> ModulationBackend for PulseTrain<W> {
    fn kind(&self) -> BackendKind {
        BackendKind::PulseTrain
    }

    fn timing_class(&self) -> TimingClass {
        TimingClass::Queued {
            depth: self.channel.queue_depth(),
        }
    }

    fn initialize(&mut self, context: ModulationContext) -> Result<()> {
        self.channel.acquire()?;
        self.channel.flush(Level::Low)?;
        self.state = ModulationState {
            context: Some(context),
            ..ModulationState::default()
        };
        self.last_pulse = None;
        log::info!(
            "pulse-train backend ready, {} Hz resolution, queue depth {}",
            self.channel.resolution_hz(),
            self.channel.queue_depth()
        );
        Ok(())
    }

    fn apply(&mut self, code: FrequencyCode) -> Result<()> {
        let context = self.state.context()?;

        if self.state.enabled {
            let plan = self.pulse_for(code, context);
            if !self.channel.try_enqueue(plan.pulse)? {
                return Err(FmError::QueueFull);
            }
            self.last_pulse = Some(plan.pulse);
            self.harmonic = plan.harmonic;
        }
        self.state.current = Some(code);
        Ok(())
    }

    fn enable(&mut self) -> Result<()> {
        self.state.context()?;
        self.state.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        if !self.state.enabled {
            return Ok(());
        }
        self.channel.flush(Level::Low)?;
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
        // Release even when the line could not be parked
        let flushed = self.channel.flush(Level::Low);
        let released = self.channel.release();
        self.state = ModulationState::default();
        self.last_pulse = None;
        flushed.and(released)
    }

    fn last_applied(&self) -> Option<FrequencyCode> {
        self.state.current
    }
}
