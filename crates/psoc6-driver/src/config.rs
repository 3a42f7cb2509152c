//! Runtime configuration

use psoc6_chip::ipc::{PointerWidth, CYPIPE_INTR_MASK};
use std::time::Duration;

/// Pause before the missing-input banner, as on the target.
pub const DEFAULT_MISSING_INPUT_DELAY: Duration = Duration::from_millis(500);

/// Knobs for one [`DualCoreSystem`](crate::DualCoreSystem).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Address width used when packing pipe messages.
    pub pointer_width: PointerWidth,

    /// Mask forwarded to the notify primitive with every message.
    pub notify_mask: u16,

    /// Delay before reporting a missing image.
    pub missing_input_delay: Duration,

    /// Print per-stage banners and timings to the console.
    pub verbose: bool,

    /// Publish a [`RunOutcome`](crate::RunOutcome) after every message.
    pub report_outcomes: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pointer_width: PointerWidth::Bits32,
            notify_mask: CYPIPE_INTR_MASK,
            missing_input_delay: DEFAULT_MISSING_INPUT_DELAY,
            verbose: true,
            report_outcomes: false,
        }
    }
}

impl RuntimeConfig {
    /// Set the wire pointer width.
    #[must_use]
    pub fn with_pointer_width(mut self, width: PointerWidth) -> Self {
        self.pointer_width = width;
        self
    }

    /// Set the notification mask.
    #[must_use]
    pub fn with_notify_mask(mut self, mask: u16) -> Self {
        self.notify_mask = mask;
        self
    }

    /// Set the missing-input delay.
    #[must_use]
    pub fn with_missing_input_delay(mut self, delay: Duration) -> Self {
        self.missing_input_delay = delay;
        self
    }

    /// Enable or disable per-stage console output.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Enable or disable structured outcome reporting.
    #[must_use]
    pub fn with_outcomes(mut self, report: bool) -> Self {
        self.report_outcomes = report;
        self
    }

    /// Configuration for tests and benches: quiet, no delay, outcomes on.
    #[must_use]
    pub fn headless() -> Self {
        Self::default()
            .with_verbose(false)
            .with_missing_input_delay(Duration::ZERO)
            .with_outcomes(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_target() {
        let config = RuntimeConfig::default();
        assert_eq!(config.notify_mask, 0x0006);
        assert_eq!(config.pointer_width, PointerWidth::Bits32);
        assert_eq!(config.missing_input_delay, Duration::from_millis(500));
        assert!(config.verbose);
        assert!(!config.report_outcomes);
    }

    #[test]
    fn headless_is_quiet() {
        let config = RuntimeConfig::headless();
        assert!(!config.verbose);
        assert!(config.report_outcomes);
        assert_eq!(config.missing_input_delay, Duration::ZERO);
    }
}
