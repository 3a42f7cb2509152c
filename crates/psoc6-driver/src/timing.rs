//! SysTick-style stage profiling.
//!
//! The M4 profiles each pipeline stage by reading the 24-bit SysTick
//! down-counter before and after the stage, together with a software
//! counter the SysTick interrupt bumps on every wrap. [`Elapsed`] turns one
//! such [`TimingSample`] into the two report shapes the firmware prints.
//!
//! With no wrap the result is exact. With wraps it is reported as a
//! symbolic whole-period term plus a residual, and the two are **not**
//! summed: `2.097[sec] * (rollovers - 1) + residual`.

use psoc6_chip::systick::{self, RELOAD, TICKS_PER_PERIOD, TICK_PERIOD_NS};
use std::fmt;
use std::time::Instant;

/// A down-counter plus the number of times it has wrapped.
pub trait TickSource: Send {
    /// Read the counter and the wrap count together.
    ///
    /// Both values must come from the same instant, or a reading taken
    /// across a wrap pairs a reloaded counter with the old wrap count.
    fn sample(&self) -> Mark;

    /// Current counter value, `0..=RELOAD`.
    fn counter(&self) -> u32 {
        self.sample().counter
    }

    /// Wraps observed since the source started.
    fn rollovers(&self) -> u64 {
        self.sample().rollovers
    }

    /// Capture the start of a measurement.
    fn mark_start(&self) -> Mark {
        self.sample()
    }

    /// Capture the end of a measurement begun at `start`.
    fn mark_end(&self, start: Mark) -> TimingSample {
        let end = self.sample();
        TimingSample {
            start: start.counter,
            end: end.counter,
            rollovers: end.rollovers.saturating_sub(start.rollovers),
        }
    }
}

/// One reading of a [`TickSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    counter: u32,
    rollovers: u64,
}

impl Mark {
    /// A counter value and the wrap count seen with it.
    pub const fn new(counter: u32, rollovers: u64) -> Self {
        Self { counter, rollovers }
    }

    /// The reading `ticks` ticks after the first reload.
    pub const fn from_ticks(ticks: u64) -> Self {
        Self {
            counter: systick::counter_after(ticks),
            rollovers: ticks / TICKS_PER_PERIOD,
        }
    }

    /// Counter value.
    pub const fn counter(self) -> u32 {
        self.counter
    }

    /// Wrap count.
    pub const fn rollovers(self) -> u64 {
        self.rollovers
    }
}

/// SysTick emulated from the host's monotonic clock.
///
/// The counter starts at [`RELOAD`] when the source is created and counts
/// down one step per 125 ns.
#[derive(Debug, Clone)]
pub struct SysTick {
    epoch: Instant,
}

impl SysTick {
    /// Start counting from `RELOAD`.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    fn ticks(&self) -> u64 {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        nanos / TICK_PERIOD_NS
    }
}

impl Default for SysTick {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SysTick {
    fn sample(&self) -> Mark {
        Mark::from_ticks(self.ticks())
    }
}

/// Counter readings around one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSample {
    /// Counter value before the stage.
    pub start: u32,
    /// Counter value after the stage.
    pub end: u32,
    /// Wraps between the two readings.
    pub rollovers: u64,
}

impl TimingSample {
    /// Reduce to a reportable duration.
    pub fn elapsed(self) -> Elapsed {
        elapsed_ns(self.start, self.end, self.rollovers)
    }
}

/// Elapsed time as the profiler reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elapsed {
    /// No wrap: an exact nanosecond count.
    Exact {
        /// `(start - end) * 125`.
        ns: u64,
    },
    /// One or more wraps: a symbolic period multiple plus a residual.
    Rollover {
        /// `rollovers - 1`, printed as a multiplier of the 2.097 s period.
        whole_periods: u64,
        /// `((RELOAD - end) + start) * 125`.
        residual_ns: u64,
    },
}

impl Elapsed {
    /// The number the firmware prints: the exact count, or the residual
    /// alone when the counter wrapped.
    pub fn reported_ns(self) -> u64 {
        match self {
            Self::Exact { ns } => ns,
            Self::Rollover { residual_ns, .. } => residual_ns,
        }
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact { ns } => write!(f, "Total time in nano seconds = {ns} "),
            Self::Rollover {
                whole_periods,
                residual_ns,
            } => write!(
                f,
                "Total time in nano seconds: {}[sec] * {whole_periods} + {residual_ns}[nano seconds]",
                systick::period_seconds_display()
            ),
        }
    }
}

/// Elapsed time between two counter readings.
///
/// The counter counts down, so without a wrap `start >= end`. Readings
/// that violate that saturate to zero rather than wrapping.
pub fn elapsed_ns(start: u32, end: u32, rollovers: u64) -> Elapsed {
    if rollovers == 0 {
        Elapsed::Exact {
            ns: u64::from(start.saturating_sub(end)) * TICK_PERIOD_NS,
        }
    } else {
        let residual_ticks = u64::from(RELOAD.saturating_sub(end)) + u64::from(start);
        Elapsed::Rollover {
            whole_periods: rollovers - 1,
            residual_ns: residual_ticks * TICK_PERIOD_NS,
        }
    }
}
