//! SysTick configuration used by the M4 profiler.
//!
//! The M4 firmware programs SysTick from the 8 MHz IMO with the full 24-bit
//! reload value, so the counter wraps roughly every 2.097 s:
//!
//! ```text
//! reload   = 0x00FF_FFFF              (16,777,215)
//! tick     = 1 / 8 MHz                = 125 ns
//! period   = (reload + 1) × 125 ns    = 2,097,152,000 ns
//! ```
//!
//! The counter counts **down**; a software counter incremented from the
//! SysTick interrupt records how many times it wrapped.

/// Reload value programmed into `SYST_RVR`, also the counter maximum.
pub const RELOAD: u32 = 0x00FF_FFFF;

/// Number of counter values in one full period (`RELOAD + 1`).
pub const TICKS_PER_PERIOD: u64 = RELOAD as u64 + 1;

/// Clock feeding SysTick: internal main oscillator (IMO).
pub const IMO_HZ: u32 = 8_000_000;

/// Duration of one counter tick in nanoseconds.
pub const TICK_PERIOD_NS: u64 = 1_000_000_000 / IMO_HZ as u64;

/// Duration of one full counter period in nanoseconds.
pub const PERIOD_NS: u64 = TICKS_PER_PERIOD * TICK_PERIOD_NS;

/// Counter value observed `ticks` ticks after a reload.
#[must_use]
pub const fn counter_after(ticks: u64) -> u32 {
    // Always <= RELOAD, so the cast is lossless.
    #[allow(clippy::cast_possible_truncation)]
    let offset = (ticks % TICKS_PER_PERIOD) as u32;
    RELOAD - offset
}

/// Period duration as printed on the console (`2.097`).
#[must_use]
pub fn period_seconds_display() -> String {
    let millis = PERIOD_NS / 1_000_000;
    format!("{}.{:03}", millis / 1000, millis % 1000)
}
