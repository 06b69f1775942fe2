use crate::backend::{BackendKind, ModulationContext};
use crate::code::ReferenceClock;
use crate::error::{FmError, Result};
use crate::{DEFAULT_CARRIER_HZ, DEFAULT_SAMPLE_RATE, MAX_DEVIATION_HZ};

/// Lowest sample rate the clock will pace
pub const MIN_SAMPLE_RATE: u32 = 1_000;

/// Highest sample rate the clock will pace
pub const MAX_SAMPLE_RATE: u32 = 96_000;

/// Everything the transmitter needs from its configuration collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitterConfig {
    pub carrier_hz: u32,
    pub max_deviation_hz: u32,
    pub reference: ReferenceClock,
    pub sample_rate: u32,
    pub backend: BackendKind,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            carrier_hz: DEFAULT_CARRIER_HZ,
            max_deviation_hz: MAX_DEVIATION_HZ,
            reference: ReferenceClock::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            backend: BackendKind::default(),
        }
    }
}

impl TransmitterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.carrier_hz == 0 {
            return Err(FmError::InvalidConfig("carrier frequency must be positive".to_string()));
        }
        if self.reference.frequency_hz == 0 {
            return Err(FmError::InvalidConfig("reference frequency must be positive".to_string()));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(FmError::InvalidConfig(format!(
                "sample rate {} Hz outside {}..={} Hz",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        Ok(())
    }

    pub fn context(&self) -> ModulationContext {
        ModulationContext {
            reference: self.reference,
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = TransmitterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.carrier_hz, 85_000_000);
        assert_eq!(config.sample_rate, 8_000);
        assert_eq!(config.backend, BackendKind::Direct);
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        let config = TransmitterConfig {
            sample_rate: 200,
            ..TransmitterConfig::default()
        };
        assert!(matches!(config.validate(), Err(FmError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_carrier() {
        let config = TransmitterConfig {
            carrier_hz: 0,
            ..TransmitterConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
