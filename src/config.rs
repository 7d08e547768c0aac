use bitflags::bitflags;

use crate::error::{MkbpError, Result};
use crate::fifo::{DEFAULT_FIFO_DEPTH, MAX_FIFO_DEPTH};

bitflags! {
    /// Which numeric fields of a configuration update are present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ValidMask: u32 {
        const SCAN_PERIOD = 1 << 0;
        const POLL_TIMEOUT = 1 << 1;
        const MIN_POST_SCAN_DELAY = 1 << 3;
        const OUTPUT_SETTLE = 1 << 4;
        const DEBOUNCE_DOWN = 1 << 5;
        const DEBOUNCE_UP = 1 << 6;
        const FIFO_MAX_DEPTH = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u8 {
        const ENABLE = 1 << 0;
    }
}

/// Scan-matrix timing, stored for the scan collaborator. Microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    pub scan_period_us: u16,
    pub poll_timeout_us: u32,
    pub min_post_scan_delay_us: u16,
    pub output_settle_us: u16,
    pub debounce_down_us: u16,
    pub debounce_up_us: u16,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self {
            scan_period_us: 10_000,
            poll_timeout_us: 100_000,
            min_post_scan_delay_us: 1_000,
            output_settle_us: 50,
            debounce_down_us: 9_000,
            debounce_up_us: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkbpConfig {
    pub enabled: bool,
    pub fifo_max_depth: usize,
    pub timing: ScanTiming,
}

impl Default for MkbpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fifo_max_depth: DEFAULT_FIFO_DEPTH,
            timing: ScanTiming::default(),
        }
    }
}

/// Partial configuration change. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub fifo_max_depth: Option<usize>,
    pub scan_period_us: Option<u16>,
    pub poll_timeout_us: Option<u32>,
    pub min_post_scan_delay_us: Option<u16>,
    pub output_settle_us: Option<u16>,
    pub debounce_down_us: Option<u16>,
    pub debounce_up_us: Option<u16>,
}

impl ConfigUpdate {
    pub fn depth(depth: usize) -> Self {
        Self {
            fifo_max_depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn enable(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.fifo_max_depth {
            Some(0) => Err(MkbpError::InvalidConfiguration(
                "fifo depth must be positive",
            )),
            Some(depth) if depth > MAX_FIFO_DEPTH => Err(MkbpError::InvalidConfiguration(
                "fifo depth exceeds buffer size",
            )),
            _ => Ok(()),
        }
    }

    /// Copies the present fields into `config`. Queue effects of a depth
    /// change are the caller's business.
    pub fn apply_to(&self, config: &mut MkbpConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(depth) = self.fifo_max_depth {
            config.fifo_max_depth = depth;
        }

        let timing = &mut config.timing;
        if let Some(value) = self.scan_period_us {
            timing.scan_period_us = value;
        }
        if let Some(value) = self.poll_timeout_us {
            timing.poll_timeout_us = value;
        }
        if let Some(value) = self.min_post_scan_delay_us {
            timing.min_post_scan_delay_us = value;
        }
        if let Some(value) = self.output_settle_us {
            timing.output_settle_us = value;
        }
        if let Some(value) = self.debounce_down_us {
            timing.debounce_down_us = value;
        }
        if let Some(value) = self.debounce_up_us {
            timing.debounce_up_us = value;
        }
    }
}
