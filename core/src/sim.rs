//! Simulated peripherals
//!
//! Each peripheral records what the backend did to it and shares that record
//! through a probe, so state stays observable after the peripheral has been
//! moved into a backend. Probes can also inject failures.

use crate::error::{FmError, Result};
use crate::hal::{
    CarrierTimer, ClockSynthesizer, Level, PulseDescriptor, SynthCoefficients, WaveformChannel,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default timer source clock (APB-style 80 MHz)
pub const SIM_TIMER_SOURCE_HZ: u32 = 80_000_000;

/// Default waveform tick rate
pub const SIM_WAVEFORM_RESOLUTION_HZ: u32 = 80_000_000;

/// Default waveform queue depth
pub const SIM_WAVEFORM_QUEUE_DEPTH: usize = 4;

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Clock synthesizer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SynthState {
    powered: bool,
    routed: bool,
    coefficients: Option<SynthCoefficients>,
    writes: u64,
    fail_power_up: bool,
    fail_writes: bool,
    fail_routing: bool,
}

/// Recording fractional-N synthesizer
#[derive(Debug, Default)]
pub struct SimSynthesizer {
    state: Arc<Mutex<SynthState>>,
}

/// Observer for a [`SimSynthesizer`]
#[derive(Debug, Clone)]
pub struct SynthProbe {
    state: Arc<Mutex<SynthState>>,
}

impl SimSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> SynthProbe {
        SynthProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl ClockSynthesizer for SimSynthesizer {
    fn power_up(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_power_up {
            return Err(FmError::Resource("synthesizer failed to lock".to_string()));
        }
        state.powered = true;
        Ok(())
    }

    fn write_coefficients(&mut self, coefficients: SynthCoefficients) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.powered {
            return Err(FmError::Resource("synthesizer is powered down".to_string()));
        }
        if state.fail_writes {
            return Err(FmError::Resource("coefficient write rejected".to_string()));
        }
        state.coefficients = Some(coefficients);
        state.writes += 1;
        Ok(())
    }

    fn route_output(&mut self, routed: bool) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_routing {
            return Err(FmError::Resource("output mux did not switch".to_string()));
        }
        if routed && !state.powered {
            return Err(FmError::Resource("cannot route an unpowered synthesizer".to_string()));
        }
        state.routed = routed;
        Ok(())
    }

    fn power_down(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.routed = false;
        state.powered = false;
        Ok(())
    }
}

impl SynthProbe {
    pub fn powered(&self) -> bool {
        lock(&self.state).powered
    }

    pub fn routed(&self) -> bool {
        lock(&self.state).routed
    }

    pub fn coefficients(&self) -> Option<SynthCoefficients> {
        lock(&self.state).coefficients
    }

    pub fn writes(&self) -> u64 {
        lock(&self.state).writes
    }

    pub fn fail_power_up(&self, fail: bool) {
        lock(&self.state).fail_power_up = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    pub fn fail_routing(&self, fail: bool) {
        lock(&self.state).fail_routing = fail;
    }
}

// ---------------------------------------------------------------------------
// Carrier timer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TimerState {
    acquired: bool,
    running: bool,
    divider_q8: Option<u32>,
    line: Level,
    reconfigurations: u64,
    fail_acquire: bool,
    fail_stop: bool,
}

/// Recording square-wave timer
#[derive(Debug)]
pub struct SimTimer {
    source_clock_hz: u32,
    max_divider_q8: u32,
    state: Arc<Mutex<TimerState>>,
}

/// Observer for a [`SimTimer`]
#[derive(Debug, Clone)]
pub struct TimerProbe {
    state: Arc<Mutex<TimerState>>,
}

impl SimTimer {
    pub fn new(source_clock_hz: u32) -> Self {
        Self {
            source_clock_hz,
            // 10-bit integer divider with 8 fractional bits
            max_divider_q8: 1023 << 8,
            state: Arc::new(Mutex::new(TimerState {
                acquired: false,
                running: false,
                divider_q8: None,
                line: Level::Low,
                reconfigurations: 0,
                fail_acquire: false,
                fail_stop: false,
            })),
        }
    }

    /// Override the largest accepted divider
    pub fn with_max_divider_q8(mut self, max_divider_q8: u32) -> Self {
        self.max_divider_q8 = max_divider_q8;
        self
    }

    pub fn probe(&self) -> TimerProbe {
        TimerProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimTimer {
    fn default() -> Self {
        Self::new(SIM_TIMER_SOURCE_HZ)
    }
}

impl CarrierTimer for SimTimer {
    fn acquire(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_acquire {
            return Err(FmError::Resource("timer channel busy".to_string()));
        }
        state.acquired = true;
        Ok(())
    }

    fn source_clock_hz(&self) -> u32 {
        self.source_clock_hz
    }

    fn max_divider_q8(&self) -> u32 {
        self.max_divider_q8
    }

    fn configure(&mut self, divider_q8: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.acquired {
            return Err(FmError::Resource("timer channel not acquired".to_string()));
        }
        if divider_q8 < 2 << 8 || divider_q8 > self.max_divider_q8 {
            return Err(FmError::Resource(format!(
                "divider {:#x} outside timer range",
                divider_q8
            )));
        }
        state.divider_q8 = Some(divider_q8);
        state.running = true;
        state.reconfigurations += 1;
        Ok(())
    }

    fn stop(&mut self, idle: Level) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_stop {
            return Err(FmError::Resource("timer did not halt".to_string()));
        }
        state.running = false;
        state.line = idle;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.running = false;
        state.acquired = false;
        Ok(())
    }
}

impl TimerProbe {
    pub fn acquired(&self) -> bool {
        lock(&self.state).acquired
    }

    pub fn running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn divider_q8(&self) -> Option<u32> {
        lock(&self.state).divider_q8
    }

    /// Line level while stopped
    pub fn idle_level(&self) -> Level {
        lock(&self.state).line
    }

    pub fn reconfigurations(&self) -> u64 {
        lock(&self.state).reconfigurations
    }

    pub fn fail_acquire(&self, fail: bool) {
        lock(&self.state).fail_acquire = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        lock(&self.state).fail_stop = fail;
    }
}

// ---------------------------------------------------------------------------
// Waveform channel
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct WaveformState {
    acquired: bool,
    queue: VecDeque<PulseDescriptor>,
    last_emitted: Option<PulseDescriptor>,
    emitted: u64,
    line: Level,
    stalled: bool,
    fail_acquire: bool,
    fail_flush: bool,
}

/// Recording queued waveform generator
///
/// Playback is modelled at enqueue time: a queued descriptor finishes playing
/// when the next one arrives, so emission trails the queue by one item.
#[derive(Debug)]
pub struct SimWaveformChannel {
    resolution_hz: u32,
    depth: usize,
    state: Arc<Mutex<WaveformState>>,
}

/// Observer for a [`SimWaveformChannel`]
#[derive(Debug, Clone)]
pub struct WaveformProbe {
    state: Arc<Mutex<WaveformState>>,
}

impl SimWaveformChannel {
    pub fn new(resolution_hz: u32, depth: usize) -> Self {
        Self {
            resolution_hz,
            depth: depth.max(1),
            state: Arc::new(Mutex::new(WaveformState {
                acquired: false,
                queue: VecDeque::with_capacity(depth.max(1)),
                last_emitted: None,
                emitted: 0,
                line: Level::Low,
                stalled: false,
                fail_acquire: false,
                fail_flush: false,
            })),
        }
    }

    pub fn probe(&self) -> WaveformProbe {
        WaveformProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimWaveformChannel {
    fn default() -> Self {
        Self::new(SIM_WAVEFORM_RESOLUTION_HZ, SIM_WAVEFORM_QUEUE_DEPTH)
    }
}

impl WaveformChannel for SimWaveformChannel {
    fn acquire(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_acquire {
            return Err(FmError::Resource("waveform channel busy".to_string()));
        }
        state.acquired = true;
        Ok(())
    }

    fn resolution_hz(&self) -> u32 {
        self.resolution_hz
    }

    fn queue_depth(&self) -> usize {
        self.depth
    }

    fn try_enqueue(&mut self, pulse: PulseDescriptor) -> Result<bool> {
        let mut state = lock(&self.state);
        if !state.acquired {
            return Err(FmError::Resource("waveform channel not acquired".to_string()));
        }

        if !state.stalled {
            if let Some(played) = state.queue.pop_front() {
                state.last_emitted = Some(played);
                state.emitted += 1;
            }
        }

        if state.queue.len() >= self.depth {
            return Ok(false);
        }
        state.queue.push_back(pulse);
        Ok(true)
    }

    fn flush(&mut self, idle: Level) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_flush {
            return Err(FmError::Resource("waveform queue did not drain".to_string()));
        }
        state.queue.clear();
        state.line = idle;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.queue.clear();
        state.acquired = false;
        Ok(())
    }
}

impl WaveformProbe {
    pub fn acquired(&self) -> bool {
        lock(&self.state).acquired
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn last_queued(&self) -> Option<PulseDescriptor> {
        lock(&self.state).queue.back().copied()
    }

    pub fn last_emitted(&self) -> Option<PulseDescriptor> {
        lock(&self.state).last_emitted
    }

    pub fn emitted(&self) -> u64 {
        lock(&self.state).emitted
    }

    pub fn idle_level(&self) -> Level {
        lock(&self.state).line
    }

    /// Stop draining the queue, as if playback had fallen behind
    pub fn stall(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    pub fn fail_acquire(&self, fail: bool) {
        lock(&self.state).fail_acquire = fail;
    }

    pub fn fail_flush(&self, fail: bool) {
        lock(&self.state).fail_flush = fail;
    }
}
