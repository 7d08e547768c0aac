use std::{
    cmp,
    time::{Duration, Instant},
};

use spin_sleep::SpinSleeper;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Paces the scan collaborator and the polling host from one loop.
pub struct Timing {
    scan_period_us: u64,
    poll_period_us: u64,
    last_scan: Instant,
    last_poll: Instant,
    sleeper: SpinSleeper,
}

impl Timing {
    /// Rates are in Hz. A zero rate is treated as 1 Hz.
    pub fn new(scan_rate: u64, poll_rate: u64) -> Self {
        let now = Instant::now();
        Self {
            scan_period_us: MICROS_PER_SEC / scan_rate.max(1),
            poll_period_us: MICROS_PER_SEC / poll_rate.max(1),
            last_scan: now,
            last_poll: now,
            sleeper: SpinSleeper::default(),
        }
    }

    pub fn should_scan(&self) -> bool {
        calc_next_timeout(&self.last_scan, self.scan_period_us) == 0
    }
    pub fn should_poll(&self) -> bool {
        calc_next_timeout(&self.last_poll, self.poll_period_us) == 0
    }

    pub fn mark_scan(&mut self) {
        self.last_scan = Instant::now();
    }
    pub fn mark_poll(&mut self) {
        self.last_poll = Instant::now();
    }

    pub fn try_sleep(&self) {
        let sleep_for = cmp::min(
            calc_next_timeout(&self.last_scan, self.scan_period_us),
            calc_next_timeout(&self.last_poll, self.poll_period_us),
        );
        if sleep_for > 0 {
            self.sleeper.sleep(Duration::from_micros(sleep_for));
        }
    }
}

#[inline]
fn calc_next_timeout(last: &Instant, period_us: u64) -> u64 {
    let elapsed = last.elapsed().as_micros() as u64;
    period_us.saturating_sub(elapsed)
}
