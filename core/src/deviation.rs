use crate::code::{DeviationLimit, FrequencyCode};
use crate::{FRACTION_SCALE, MAX_INTEGER_PART, SAMPLE_CENTER};

const FRACTION_SPAN: i32 = FRACTION_SCALE as i32;
const FRACTION_MAX: i32 = FRACTION_SPAN - 1;

/// Map an 8-bit audio sample to a signed fractional offset
///
/// The sample is centered on 128 and scaled linearly so that 0 maps to
/// `-limit` and 255 maps to just under `+limit`. Division truncates toward zero.
pub fn sample_to_offset(sample: u8, limit: DeviationLimit) -> i16 {
    let centered = sample as i32 - SAMPLE_CENTER as i32;
    (centered * limit.units() as i32 / SAMPLE_CENTER as i32) as i16
}

/// Offset the baseline fraction, propagating borrows and carries into the
/// integer part
///
/// Results past the synthesizer range saturate at `(0, 0)` or `(63, 65535)`.
pub fn apply_offset(baseline: FrequencyCode, offset: i16) -> FrequencyCode {
    let mut fraction = baseline.fractional_part as i32 + offset as i32;
    let mut integer = baseline.integer_part as i32;

    while fraction < 0 {
        fraction += FRACTION_SPAN;
        integer -= 1;
    }
    while fraction > FRACTION_MAX {
        fraction -= FRACTION_SPAN;
        integer += 1;
    }

    if integer < 0 {
        integer = 0;
        fraction = 0;
    } else if integer > MAX_INTEGER_PART as i32 {
        integer = MAX_INTEGER_PART as i32;
        fraction = FRACTION_MAX;
    }

    FrequencyCode {
        integer_part: integer as u8,
        fractional_part: fraction as u16,
        ..baseline
    }
}

/// Per-sample audio to frequency-code mapping for one deviation limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviationEncoder {
    limit: DeviationLimit,
}

impl DeviationEncoder {
    pub fn new(limit: DeviationLimit) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> DeviationLimit {
        self.limit
    }

    pub fn offset_for(&self, sample: u8) -> i16 {
        sample_to_offset(sample, self.limit)
    }

    /// Code to apply for this sample, always derived from the baseline
    pub fn encode(&self, baseline: FrequencyCode, sample: u8) -> FrequencyCode {
        apply_offset(baseline, self.offset_for(sample))
    }
}
