use super::{BackendKind, ModulationBackend, ModulationContext, ModulationState, TimingClass};
use crate::code::FrequencyCode;
use crate::error::Result;
use crate::hal::{ClockSynthesizer, SynthCoefficients};
use log::info;

/// Direct fractional-N synthesis
///
/// Every sample rewrites the synthesizer's coefficient registers. Register
/// writes are the whole cost of `apply`, well inside a 44.1 kHz interval.
/// Disabling disconnects the clock from the pin but keeps the synthesizer
/// running, so re-enabling is immediate.
pub struct DirectSynthesizer<S: ClockSynthesizer> {
    synth: S,
    state: ModulationState,
}

impl<S: ClockSynthesizer> DirectSynthesizer<S> {
    pub fn new(synth: S) -> Self {
        Self {
            synth,
            state: ModulationState::default(),
        }
    }

    pub fn synthesizer(&self) -> &S {
        &self.synth
    }
}

fn coefficients(code: FrequencyCode) -> SynthCoefficients {
    SynthCoefficients {
        low_revision: code.reference_is_low_revision,
        o_div: code.output_divider,
        sdm0: code.sdm0(),
        sdm1: code.sdm1(),
        sdm2: code.integer_part,
    }
}

impl<S: ClockSynthesizer> ModulationBackend for DirectSynthesizer<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    fn timing_class(&self) -> TimingClass {
        TimingClass::Blocking
    }

    fn initialize(&mut self, context: ModulationContext) -> Result<()> {
        self.synth.power_up()?;
        self.synth.route_output(false)?;
        self.state = ModulationState {
            context: Some(context),
            ..ModulationState::default()
        };
        info!("synthesizer backend ready at {} Hz reference", context.reference.frequency_hz);
        Ok(())
    }

    fn apply(&mut self, code: FrequencyCode) -> Result<()> {
        self.state.context()?;
        // With the output unrouted this only stages the code
        self.synth.write_coefficients(coefficients(code))?;
        self.state.current = Some(code);
        Ok(())
    }

    fn enable(&mut self) -> Result<()> {
        self.state.context()?;
        self.synth.route_output(true)?;
        self.state.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        if !self.state.enabled {
            return Ok(());
        }
        self.synth.route_output(false)?;
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
        // Power down even when the output could not be disconnected
        let unrouted = self.synth.route_output(false);
        let powered_down = self.synth.power_down();
        self.state = ModulationState::default();
        unrouted.and(powered_down)
    }

    fn last_applied(&self) -> Option<FrequencyCode> {
        self.state.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::ReferenceClock;
    use crate::sim::SimSynthesizer;

    fn context() -> ModulationContext {
        ModulationContext {
            reference: ReferenceClock::default(),
            sample_rate: 44_100,
        }
    }

    fn code() -> FrequencyCode {
        FrequencyCode {
            integer_part: 8,
            fractional_part: 0xC1F0,
            output_divider: 1,
            reference_is_low_revision: true,
        }
    }

    #[test]
    fn test_apply_writes_register_image() {
        let synth = SimSynthesizer::new();
        let probe = synth.probe();
        let mut backend = DirectSynthesizer::new(synth);

        backend.initialize(context()).unwrap();
        backend.apply(code()).unwrap();

        let written = probe.coefficients().unwrap();
        assert_eq!(written.o_div, 1);
        assert_eq!(written.sdm0, 0xF0);
        assert_eq!(written.sdm1, 0xC1);
        assert_eq!(written.sdm2, 8);
        assert!(written.low_revision);
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let synth = SimSynthesizer::new();
        let probe = synth.probe();
        let mut backend = DirectSynthesizer::new(synth);
        backend.initialize(context()).unwrap();
        backend.enable().unwrap();

        backend.apply(code()).unwrap();
        let first = (probe.coefficients(), backend.last_applied());
        backend.apply(code()).unwrap();
        let second = (probe.coefficients(), backend.last_applied());

        assert_eq!(first, second);
        assert_eq!(probe.writes(), 2);
    }

    #[test]
    fn test_disable_unroutes_but_keeps_power() {
        let synth = SimSynthesizer::new();
        let probe = synth.probe();
        let mut backend = DirectSynthesizer::new(synth);

        backend.initialize(context()).unwrap();
        backend.enable().unwrap();
        assert!(probe.routed());

        backend.disable().unwrap();
        assert!(!probe.routed());
        assert!(probe.powered());

        backend.shutdown().unwrap();
        assert!(!probe.powered());
    }

    #[test]
    fn test_power_up_failure_surfaces() {
        let synth = SimSynthesizer::new();
        synth.probe().fail_power_up(true);
        let mut backend = DirectSynthesizer::new(synth);

        assert!(backend.initialize(context()).is_err());
        assert!(backend.enable().is_err());
    }

    #[test]
    fn test_shutdown_powers_down_after_routing_failure() {
        let synth = SimSynthesizer::new();
        let probe = synth.probe();
        let mut backend = DirectSynthesizer::new(synth);
        backend.initialize(context()).unwrap();
        backend.enable().unwrap();

        probe.fail_routing(true);
        assert!(backend.shutdown().is_err());
        assert!(!probe.powered());
        assert!(!backend.is_enabled());

        probe.fail_routing(false);
        backend.initialize(context()).unwrap();
        assert!(probe.powered());
    }
}
