use crate::error::{FmError, Result};
use crate::{
    DEFAULT_REFERENCE_HZ, FRACTION_SCALE, INTEGER_OFFSET, MAX_INTEGER_PART, MAX_OUTPUT_DIVIDER,
    MIN_VCO_HZ,
};
use log::{debug, warn};

// Fractional-N code calculator
//
// The synthesizer produces:
//   vco  = reference * (4 + integer_part + fractional_part / 65536)
//   fout = vco / (2 * (output_divider + 2))
//
// The VCO must stay at or above MIN_VCO_HZ, so the output divider is chosen
// first and the multiplier is derived from it.

/// Largest deviation expressible as a signed 16-bit fractional offset
pub const MAX_DEVIATION_UNITS: u16 = i16::MAX as u16;

const FRACTION_MAX: i64 = FRACTION_SCALE as i64 - 1;

// Packed layout: fraction 0..16, integer 16..22, divider 22..27, revision 27
const INTEGER_SHIFT: u32 = 16;
const INTEGER_MASK: u32 = 0x3F;
const DIVIDER_SHIFT: u32 = 22;
const DIVIDER_MASK: u32 = 0x1F;
const REVISION_BIT: u32 = 1 << 27;

/// Reference oscillator feeding the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceClock {
    pub frequency_hz: u32,
    /// Early silicon revisions use a different coefficient register layout
    pub low_revision: bool,
}

impl ReferenceClock {
    pub fn new(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            low_revision: false,
        }
    }

    pub fn with_low_revision(mut self, low_revision: bool) -> Self {
        self.low_revision = low_revision;
        self
    }
}

impl Default for ReferenceClock {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_HZ)
    }
}

/// Hardware-neutral fractional-N frequency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrequencyCode {
    /// Integer multiplier above the fixed offset of 4 (0..=63)
    pub integer_part: u8,
    /// 16-bit fixed-point fraction of the multiplier
    pub fractional_part: u16,
    /// Output divider selector (0..=31), divides by 2 * (n + 2)
    pub output_divider: u8,
    pub reference_is_low_revision: bool,
}

impl FrequencyCode {
    /// Low byte of the fraction register pair
    pub fn sdm0(&self) -> u8 {
        (self.fractional_part & 0xFF) as u8
    }

    /// High byte of the fraction register pair
    pub fn sdm1(&self) -> u8 {
        (self.fractional_part >> 8) as u8
    }

    /// Total division between the VCO and the output pin
    pub fn post_divisor(&self) -> u32 {
        2 * (self.output_divider as u32 + 2)
    }

    pub fn multiplier(&self) -> f64 {
        INTEGER_OFFSET as f64
            + self.integer_part as f64
            + self.fractional_part as f64 / FRACTION_SCALE as f64
    }

    pub fn vco_hz(&self, reference_hz: u32) -> f64 {
        reference_hz as f64 * self.multiplier()
    }

    /// Carrier frequency this code produces at the output pin
    pub fn output_hz(&self, reference_hz: u32) -> f64 {
        self.vco_hz(reference_hz) / self.post_divisor() as f64
    }

    /// Pack into a single word so the code can be published atomically
    pub fn pack(&self) -> u32 {
        let mut bits = self.fractional_part as u32;
        bits |= (self.integer_part as u32 & INTEGER_MASK) << INTEGER_SHIFT;
        bits |= (self.output_divider as u32 & DIVIDER_MASK) << DIVIDER_SHIFT;
        if self.reference_is_low_revision {
            bits |= REVISION_BIT;
        }
        bits
    }

    pub fn unpack(bits: u32) -> Self {
        Self {
            integer_part: ((bits >> INTEGER_SHIFT) & INTEGER_MASK) as u8,
            fractional_part: (bits & 0xFFFF) as u16,
            output_divider: ((bits >> DIVIDER_SHIFT) & DIVIDER_MASK) as u8,
            reference_is_low_revision: bits & REVISION_BIT != 0,
        }
    }
}

/// Maximum frequency swing expressed in fractional LSBs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct DeviationLimit(u16);

impl DeviationLimit {
    pub fn new(units: u16) -> Self {
        Self(units.min(MAX_DEVIATION_UNITS))
    }

    pub fn units(&self) -> u16 {
        self.0
    }
}

/// Result of planning a carrier: the baseline code plus its deviation limit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPlan {
    pub target_hz: u32,
    pub reference: ReferenceClock,
    pub code: FrequencyCode,
    pub deviation_limit: DeviationLimit,
}

impl FrequencyPlan {
    pub fn per_lsb_hz(&self) -> f64 {
        per_lsb_hz(self.reference.frequency_hz, self.code.output_divider)
    }

    pub fn output_hz(&self) -> f64 {
        self.code.output_hz(self.reference.frequency_hz)
    }

    pub fn vco_hz(&self) -> f64 {
        self.code.vco_hz(self.reference.frequency_hz)
    }

    /// Deviation the limit actually represents, in Hz
    pub fn deviation_hz(&self) -> f64 {
        self.deviation_limit.units() as f64 * self.per_lsb_hz()
    }
}

/// Output frequency step of one fractional LSB for a given divider
pub fn per_lsb_hz(reference_hz: u32, output_divider: u8) -> f64 {
    reference_hz as f64 / (2.0 * (output_divider as f64 + 2.0) * FRACTION_SCALE as f64)
}

/// Compute the frequency code and deviation limit for a target carrier
///
/// Fails with `FmError::Configuration` when no output divider keeps the VCO
/// above its stability floor or the deviation does not fit the fraction.
pub fn plan(
    target_hz: u32,
    max_deviation_hz: u32,
    reference: ReferenceClock,
) -> Result<FrequencyPlan> {
    if target_hz == 0 {
        return Err(FmError::Configuration(
            "target frequency must be positive".to_string(),
        ));
    }
    if reference.frequency_hz == 0 {
        return Err(FmError::Configuration(
            "reference frequency must be positive".to_string(),
        ));
    }

    let first = first_divider(target_hz).ok_or_else(|| {
        FmError::Configuration(format!(
            "{} Hz cannot reach the {} Hz VCO floor with any output divider",
            target_hz, MIN_VCO_HZ
        ))
    })?;

    // Margin reservation can pull the baseline just under the floor, in which
    // case the next divider up is tried.
    for divider in first..=MAX_OUTPUT_DIVIDER {
        let deviation_limit = deviation_limit(max_deviation_hz, reference.frequency_hz, divider)?;
        let code = quantize(target_hz, reference, divider, deviation_limit);

        if code.vco_hz(reference.frequency_hz) >= MIN_VCO_HZ as f64 {
            debug!(
                "planned {} Hz: o_div={} sdm2={} frac=0x{:04X} dev={} LSB",
                target_hz,
                code.output_divider,
                code.integer_part,
                code.fractional_part,
                deviation_limit.units()
            );
            return Ok(FrequencyPlan {
                target_hz,
                reference,
                code,
                deviation_limit,
            });
        }
    }

    Err(FmError::Configuration(format!(
        "no output divider keeps {} Hz above the VCO floor after margin reservation",
        target_hz
    )))
}

/// First divider whose VCO frequency reaches the floor
fn first_divider(target_hz: u32) -> Option<u8> {
    (0..=MAX_OUTPUT_DIVIDER).find(|&d| 2 * target_hz as u64 * (d as u64 + 2) >= MIN_VCO_HZ)
}

fn deviation_limit(
    max_deviation_hz: u32,
    reference_hz: u32,
    divider: u8,
) -> Result<DeviationLimit> {
    let units = (max_deviation_hz as f64 / per_lsb_hz(reference_hz, divider)).round();
    if units > MAX_DEVIATION_UNITS as f64 {
        return Err(FmError::Configuration(format!(
            "deviation of {} Hz needs {} fractional units, at most {} fit",
            max_deviation_hz, units, MAX_DEVIATION_UNITS
        )));
    }
    Ok(DeviationLimit(units as u16))
}

fn quantize(
    target_hz: u32,
    reference: ReferenceClock,
    divider: u8,
    limit: DeviationLimit,
) -> FrequencyCode {
    let post_divisor = 2.0 * (divider as f64 + 2.0);
    let multiplier = target_hz as f64 * post_divisor / reference.frequency_hz as f64;
    let whole = multiplier.floor();

    let mut integer = whole as i64 - INTEGER_OFFSET as i64;
    // f64::round rounds half away from zero
    let mut fraction = ((multiplier - whole) * FRACTION_SCALE as f64).round() as i64;
    if fraction == FRACTION_SCALE as i64 {
        fraction = 0;
        integer += 1;
    }

    if integer < 0 {
        warn!(
            "{} Hz needs multiplier {:.4}, below the synthesizer range; clamping",
            target_hz, multiplier
        );
        integer = 0;
        fraction = 0;
    } else if integer > MAX_INTEGER_PART as i64 {
        warn!(
            "{} Hz needs multiplier {:.4}, above the synthesizer range; clamping",
            target_hz, multiplier
        );
        integer = MAX_INTEGER_PART as i64;
        fraction = FRACTION_MAX;
    }

    // Keep a full swing of headroom on both sides of the baseline fraction
    let margin = limit.units() as i64;
    if fraction < margin {
        fraction += margin;
    } else if fraction > FRACTION_MAX - margin {
        fraction -= margin;
    }

    FrequencyCode {
        integer_part: integer as u8,
        fractional_part: fraction as u16,
        output_divider: divider,
        reference_is_low_revision: reference.low_revision,
    }
}
