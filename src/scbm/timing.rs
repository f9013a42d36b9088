//! Bit-rate and timing register calculation
//!
//! Derives the controller's clock increment, phase widths and glitch filter
//! setting from the configured bit rate, core clock and bus delay. The
//! calculation is a pure function of [`Settings`]; nothing here can fail.
//!
//! # Algorithm
//!
//! The block divides its core clock by a fixed pre-scaler and accumulates an
//! 8-bit increment into a phase counter; each counter overflow is one internal
//! tick. The increment is solved so that 16 ticks take one bit period after
//! correcting for bus propagation delay. Protocol minimum widths are then
//! expressed in ticks, rounded so that no minimum is ever violated.

use super::settings::Settings;

/// Core clock pre-scaler register value (divide by 8)
pub const PRESCALE: u8 = 7;

/// Bit rates at or below this use standard-mode widths
const STANDARD_MODE_MAX_KHZ: u32 = 100;

/// Bit-idle register value
const TBI: u16 = 0xFFFE;

/// Clock-low timeout in fast mode
const TSL_FAST: u16 = 0x2000;

/// Clock-low timeout in standard mode
const TSL_STANDARD: u16 = 0x120;

/// Data-low timeout
const TDL: u16 = 0x120;

/// Largest filter increment the register holds
const FILTER_INC_MAX: u32 = 0x7F;

/// Protocol widths in ns for one bus speed class
#[derive(Debug, Clone, Copy)]
struct BusWidths {
    /// Minimum clock high
    ckh: u32,
    /// Minimum clock low
    ckl: u32,
    /// Minimum data hold after clock falls
    sdh: u32,
    /// Minimum data low (setup + hold)
    sdl: u32,
    /// Maximum stop-to-start
    p2s: u32,
    /// Maximum low phase of a stop condition
    pl: u32,
    /// Maximum high phase of a start condition
    ph: u32,
}

const FAST_MODE: BusWidths = BusWidths {
    ckh: 600,
    ckl: 1300,
    sdh: 600,
    sdl: 1200,
    p2s: 1300,
    pl: 600,
    ph: 600,
};

const STANDARD_MODE: BusWidths = BusWidths {
    ckh: 4000,
    ckl: 4700,
    sdh: 4700,
    sdl: 8700,
    p2s: 4700,
    pl: 4700,
    ph: 4000,
};

/// Glitch filter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Filter {
    /// Filter clock too slow to be useful
    Disabled,
    /// Filter in the path but passing every edge
    Bypass,
    /// Filter enabled with the given clock increment
    Enabled(u8),
}

/// Values programmed into the timing registers
///
/// Phase fields hold the register encoding, which is the tick count minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingConfig {
    pub prescale: u8,
    pub increment: u8,
    /// Internal tick length in ns, delay included
    pub period_ns: u32,
    /// Ticks per bit
    pub bit_ticks: u32,
    pub tckh: u8,
    pub tckl: u8,
    pub tsdh: u8,
    pub tsdl: u8,
    pub tp2s: u8,
    pub tpl: u8,
    pub tph: u8,
    pub tbi: u16,
    pub tsl: u16,
    pub tdl: u16,
    pub filter: Filter,
}

impl TimingConfig {
    /// Clock high time actually produced, in ns
    pub fn high_ns(&self) -> u32 {
        (self.tckh as u32 + 1).saturating_mul(self.period_ns)
    }

    /// Clock low time actually produced, in ns
    pub fn low_ns(&self) -> u32 {
        (self.tckl as u32 + 1).saturating_mul(self.period_ns)
    }
}

fn ceil_div(n: u64, d: u64) -> u64 {
    let d = d.max(1);
    n.div_ceil(d)
}

/// Register encoding of a tick count
fn reg8(count: u64) -> u8 {
    count.saturating_sub(1).min(0xFF) as u8
}

/// Compute the timing register values for `settings`
pub fn compute_timing(settings: &Settings) -> TimingConfig {
    let bitrate = settings.bitrate_khz.max(1) as u64;
    let delay = settings.bus_delay_ns as u64;
    let fce = (settings.core_clock_khz as u64 / (PRESCALE as u64 + 1)).max(1);

    let correction = (16 * bitrate * (fce / 1000)).saturating_mul(delay) / 10_000;
    let denominator = fce.saturating_sub(correction).max(1);
    let increment = (4096 * bitrate / denominator).clamp(1, 0xFF);

    let period = ceil_div(256_000_000, fce * increment).saturating_add(delay);
    let bit_ticks = ceil_div(1_000_000, bitrate.saturating_mul(period)).max(2);

    let widths = if settings.bitrate_khz <= STANDARD_MODE_MAX_KHZ {
        STANDARD_MODE
    } else {
        FAST_MODE
    };

    let high = ceil_div(widths.ckh as u64, period).max(1);
    let min_low = ceil_div(widths.ckl as u64, period).max(1);
    let low = bit_ticks.saturating_sub(high).max(min_low);

    let tsdh = reg8(ceil_div(widths.sdh as u64, period)).max(1);
    let tpl = reg8(widths.pl as u64 / period);
    let tph = reg8(widths.ph as u64 / period);
    let tp2s = reg8(widths.p2s as u64 / period);
    let tsdl = (tph as u64 + tsdh as u64 + 2)
        .max(reg8(ceil_div(widths.sdl as u64, period)) as u64)
        .min(0xFF) as u8;

    let tsl = if settings.bitrate_khz <= STANDARD_MODE_MAX_KHZ {
        TSL_STANDARD
    } else {
        TSL_FAST
    };

    TimingConfig {
        prescale: PRESCALE,
        increment: increment as u8,
        period_ns: period.min(u32::MAX as u64) as u32,
        bit_ticks: bit_ticks.min(u32::MAX as u64) as u32,
        tckh: reg8(high),
        tckl: reg8(low),
        tsdh,
        tsdl,
        tp2s,
        tpl,
        tph,
        tbi: TBI,
        tsl,
        tdl: TDL,
        filter: filter_for(fce, delay),
    }
}

/// Pick the glitch filter mode from the pre-scaled clock (kHz)
fn filter_for(fce: u64, delay: u64) -> Filter {
    if fce < 20_000 {
        Filter::Disabled
    } else if fce < 40_000 {
        Filter::Bypass
    } else {
        let window = (fce / 1000) * 250u64.saturating_sub(delay).max(1);
        let inc = ceil_div(640_000, window).min(FILTER_INC_MAX as u64);
        Filter::Enabled(inc as u8)
    }
}
