use log::{debug, info, trace};
use rand::Rng;

use crate::config::{MkbpConfig, ValidMask};
use crate::error::{MkbpError, Result};
use crate::keystate::{KeyState, KEYBOARD_COLS, KEYBOARD_ROWS};
use crate::line::SignalPin;
use crate::mkbp::{Mkbp, PushOutcome};
use crate::protocol::{RawMkbpConfig, CMD_MKBP_SET_CONFIG, CMD_MKBP_STATE};
use crate::timing::Timing;

#[derive(Debug, Default, Clone, Copy)]
pub struct SimStats {
    pub scans: u64,
    pub queued: u64,
    pub ignored: u64,
    pub overflows: u64,
    pub reads: u64,
    pub underruns: u64,
}

/// Random key activity on one side, a host that polls on EC_INT_L on the
/// other, both sharing one cooperative loop.
pub struct Simulator {
    mkbp: Mkbp<SignalPin>,
    pin: SignalPin,
    matrix: KeyState,
    timing: Timing,
    rng: rand::rngs::ThreadRng,
    press_chance: f64,
    poll_burst: usize,
    stats: SimStats,
}

impl Simulator {
    pub fn new(timing: Timing, press_chance: f64, poll_burst: usize) -> Self {
        let pin = SignalPin::new();
        Self {
            mkbp: Mkbp::new(pin.clone()),
            pin,
            matrix: KeyState::released(),
            timing,
            rng: rand::thread_rng(),
            press_chance,
            poll_burst,
            stats: SimStats::default(),
        }
    }

    /// Sends a depth change the way a host would, through SET_CONFIG.
    pub fn host_set_depth(&self, depth: u8) -> Result<()> {
        let mut raw = RawMkbpConfig::from_config(&MkbpConfig::default())?;
        raw.valid_mask = ValidMask::FIFO_MAX_DEPTH.bits().to_le();
        raw.valid_flags = 0;
        raw.fifo_max_depth = depth;

        self.mkbp
            .handle_command(CMD_MKBP_SET_CONFIG, bytemuck::bytes_of(&raw), &mut [])
            .map(|_| ())
    }

    pub fn handle_update(&mut self) -> Result<()> {
        if self.timing.should_scan() {
            self.scan();
            self.timing.mark_scan();
        }

        if self.timing.should_poll() {
            self.poll()?;
            self.timing.mark_poll();
        }

        self.timing.try_sleep();
        Ok(())
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.mkbp.pending()
    }

    fn scan(&mut self) {
        self.stats.scans += 1;
        if !self.rng.gen_bool(self.press_chance) {
            return;
        }

        let col = self.rng.gen_range(0..KEYBOARD_COLS);
        let row = self.rng.gen_range(0..KEYBOARD_ROWS);
        let pressed = !self.matrix.is_pressed(col, row);
        self.matrix.set(col, row, pressed);
        trace!("Scan: key ({}, {}) pressed={}", col, row, pressed);

        match self.mkbp.notify_new_scan(self.matrix) {
            Ok(PushOutcome::Queued) => self.stats.queued += 1,
            Ok(PushOutcome::Ignored) => self.stats.ignored += 1,
            Err(MkbpError::Overflow) => self.stats.overflows += 1,
            Err(err) => debug!("Scan rejected: {}", err),
        }
    }

    fn poll(&mut self) -> Result<()> {
        if !self.pin.events_pending() {
            return Ok(());
        }

        let mut out = [0u8; KEYBOARD_COLS];
        for _ in 0..self.poll_burst {
            self.mkbp.handle_command(CMD_MKBP_STATE, &[], &mut out)?;
            self.stats.reads += 1;
            debug!("Host read {:02x?}", out);

            if !self.pin.events_pending() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Empties the queue after the loop stops so every accepted scan is seen.
    pub fn drain(&mut self) -> Result<()> {
        let mut out = [0u8; KEYBOARD_COLS];
        while self.pin.events_pending() {
            self.mkbp.handle_command(CMD_MKBP_STATE, &[], &mut out)?;
            self.stats.reads += 1;
        }
        // One extra read shows the last known state
        self.mkbp.handle_command(CMD_MKBP_STATE, &[], &mut out)?;
        self.stats.underruns += 1;
        info!("Final key state {:02x?}", out);
        Ok(())
    }
}
