use log::{debug, info, warn};
use spin::Mutex;

use crate::config::{ConfigUpdate, MkbpConfig};
use crate::error::{MkbpError, Result};
use crate::fifo::KeyFifo;
use crate::keystate::{KeyState, KEYBOARD_COLS, KEYBOARD_ROWS};
use crate::line::{InterruptPin, LineState, NotificationLine};
use crate::protocol::{write_response, HostCommand, RawMkbpConfig, RawMkbpInfo};

/// How an accepted scan was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Scanning is disabled; the snapshot was discarded without error.
    Ignored,
}

struct MkbpState<P> {
    fifo: KeyFifo,
    config: MkbpConfig,
    line: NotificationLine<P>,
    simulated: KeyState,
}

impl<P: InterruptPin> MkbpState<P> {
    #[inline]
    fn sync_line(&mut self) {
        self.line.update(!self.fifo.is_empty());
    }

    fn push(&mut self, state: KeyState) -> Result<PushOutcome> {
        if !self.config.enabled {
            return Ok(PushOutcome::Ignored);
        }

        let result = self.fifo.push(state);
        self.sync_line();
        result.map(|_| PushOutcome::Queued)
    }
}

/// Keyboard event queue shared by the scan collaborator and the host
/// command handlers.
///
/// Every operation runs inside one short critical section, and the
/// interrupt line is driven before it is released, so the host never sees
/// the line disagree with the queue.
pub struct Mkbp<P> {
    state: Mutex<MkbpState<P>>,
}

impl<P: InterruptPin> Mkbp<P> {
    // Pub

    pub fn new(pin: P) -> Self {
        Self {
            state: Mutex::new(MkbpState {
                fifo: KeyFifo::default(),
                config: MkbpConfig::default(),
                line: NotificationLine::new(pin),
                simulated: KeyState::released(),
            }),
        }
    }

    /// Called by the scan matrix driver with each new debounced snapshot.
    ///
    /// Never blocks. A full queue reports `MkbpError::Overflow` to this
    /// caller only.
    pub fn notify_new_scan(&self, state: KeyState) -> Result<PushOutcome> {
        self.state.lock().push(state)
    }

    /// Drops every queued event, keeping the last known state.
    pub fn reset_buffer(&self) {
        let mut state = self.state.lock();
        let dropped = state.fifo.len();
        state.fifo.clear();
        state.sync_line();
        debug!("Keyboard buffer reset, {} events dropped", dropped);
    }

    /// Next queued snapshot, or the last known state when nothing is queued.
    pub fn read_state(&self) -> KeyState {
        let mut state = self.state.lock();
        let next = match state.fifo.pop() {
            Some(next) => next,
            None => state.fifo.last_state(),
        };
        state.sync_line();
        next
    }

    /// Applies a partial update. Nothing changes if any field is invalid.
    pub fn set_config(&self, update: ConfigUpdate) -> Result<()> {
        if let Err(err) = update.validate() {
            warn!("Rejected mkbp config {:?}: {}", update, err);
            return Err(err);
        }

        let mut state = self.state.lock();
        if let Some(depth) = update.fifo_max_depth {
            state.fifo.resize(depth)?;
        }
        update.apply_to(&mut state.config);
        state.sync_line();

        info!(
            "Mkbp config: enabled={} depth={}",
            state.config.enabled,
            state.fifo.depth()
        );
        Ok(())
    }

    /// Current settings. The depth is read back from the fifo itself.
    pub fn config(&self) -> MkbpConfig {
        let state = self.state.lock();
        MkbpConfig {
            fifo_max_depth: state.fifo.depth(),
            ..state.config
        }
    }

    /// Flips one key of the simulated matrix and feeds the result through
    /// the regular scan path.
    pub fn simulate_key(&self, col: usize, row: usize, pressed: bool) -> Result<PushOutcome> {
        if col >= KEYBOARD_COLS || row >= KEYBOARD_ROWS {
            return Err(MkbpError::InvalidParam("key outside the matrix"));
        }

        let mut state = self.state.lock();
        state.simulated.set(col, row, pressed);
        let snapshot = state.simulated;
        state.push(snapshot)
    }

    /// Decodes and runs one host command, writing its response into
    /// `response`. Returns the response length.
    pub fn handle_command(
        &self,
        command: u16,
        params: &[u8],
        response: &mut [u8],
    ) -> Result<usize> {
        match HostCommand::decode(command, params)? {
            HostCommand::GetState => self.get_state(response),
            HostCommand::Info => self.info(response),
            HostCommand::SimulateKey { col, row, pressed } => self.simulate(col, row, pressed),
            HostCommand::SetConfig(update) => self.set_config(update).map(|_| 0),
            HostCommand::GetConfig => self.get_config(response),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().fifo.len()
    }

    pub fn line_state(&self) -> LineState {
        self.state.lock().line.state()
    }

    // Priv

    #[inline]
    fn get_state(&self, response: &mut [u8]) -> Result<usize> {
        // 0x60 - MKBP_STATE
        // Check the buffer first so a short response never costs an event.
        if response.len() < KEYBOARD_COLS {
            return Err(MkbpError::ResponseTooBig {
                needed: KEYBOARD_COLS,
                max: response.len(),
            });
        }
        write_response(response, self.read_state().as_bytes())
    }

    #[inline]
    fn info(&self, response: &mut [u8]) -> Result<usize> {
        // 0x61 - MKBP_INFO
        write_response(response, bytemuck::bytes_of(&RawMkbpInfo::matrix()))
    }

    #[inline]
    fn simulate(&self, col: usize, row: usize, pressed: bool) -> Result<usize> {
        // 0x62 - MKBP_SIMULATE_KEY
        // Overflow stays with the producer, the command itself succeeded.
        match self.simulate_key(col, row, pressed) {
            Ok(_) | Err(MkbpError::Overflow) => Ok(0),
            Err(err) => Err(err),
        }
    }

    #[inline]
    fn get_config(&self, response: &mut [u8]) -> Result<usize> {
        // 0x65 - MKBP_GET_CONFIG
        let raw = RawMkbpConfig::from_config(&self.config())?;
        write_response(response, bytemuck::bytes_of(&raw))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Mkbp, PushOutcome};
    use crate::config::{ConfigUpdate, MkbpConfig};
    use crate::error::MkbpError;
    use crate::fifo::DEFAULT_FIFO_DEPTH;
    use crate::keystate::{KeyState, KEYBOARD_COLS, KEYBOARD_ROWS};
    use crate::line::{LineState, SignalPin};
    use crate::protocol::{
        EcStatus, RawMkbpConfig, CMD_MKBP_GET_CONFIG, CMD_MKBP_INFO, CMD_MKBP_SET_CONFIG,
        CMD_MKBP_SIMULATE_KEY, CMD_MKBP_STATE,
    };
    use proptest::prelude::*;

    struct Harness {
        mkbp: Mkbp<SignalPin>,
        pin: SignalPin,
        matrix: KeyState,
    }

    impl Harness {
        fn new() -> Self {
            let pin = SignalPin::new();
            Self {
                mkbp: Mkbp::new(pin.clone()),
                pin,
                matrix: KeyState::released(),
            }
        }

        fn press_key(
            &mut self,
            col: usize,
            row: usize,
            pressed: bool,
        ) -> Result<PushOutcome, MkbpError> {
            self.matrix.set(col, row, pressed);
            self.mkbp.notify_new_scan(self.matrix)
        }

        fn read_state(&self) -> KeyState {
            let mut out = [0u8; KEYBOARD_COLS];
            let size = self
                .mkbp
                .handle_command(CMD_MKBP_STATE, &[], &mut out)
                .expect("MKBP_STATE failed");
            assert_eq!(size, KEYBOARD_COLS);
            KeyState::from_bytes(&out).unwrap()
        }

        fn set_config(&self, valid_mask: u32, valid_flags: u8, flags: u8, depth: u8) -> EcStatus {
            let mut raw = RawMkbpConfig::from_config(&MkbpConfig::default()).unwrap();
            raw.valid_mask = valid_mask.to_le();
            raw.valid_flags = valid_flags;
            raw.flags = flags;
            raw.fifo_max_depth = depth;
            match self
                .mkbp
                .handle_command(CMD_MKBP_SET_CONFIG, bytemuck::bytes_of(&raw), &mut [])
            {
                Ok(_) => EcStatus::Success,
                Err(err) => err.into(),
            }
        }

        fn set_fifo_size(&self, depth: u8) -> EcStatus {
            self.set_config(1 << 7, 0, 0, depth)
        }

        fn set_scan_enabled(&self, enabled: bool) -> EcStatus {
            self.set_config(0, 1, enabled as u8, 0)
        }

        fn fifo_empty(&self) -> bool {
            self.pin.is_high()
        }
    }

    fn pressed(col: usize, row: usize) -> KeyState {
        KeyState::released().with_key(col, row, true)
    }

    #[test]
    fn single_key_press_test() {
        let mut h = Harness::new();
        assert!(h.fifo_empty());

        assert_eq!(h.press_key(0, 0, true), Ok(PushOutcome::Queued));
        assert!(!h.fifo_empty());
        assert_eq!(h.press_key(0, 0, false), Ok(PushOutcome::Queued));
        assert!(!h.fifo_empty());

        assert_eq!(h.read_state(), pressed(0, 0));
        assert!(!h.fifo_empty());
        assert_eq!(h.read_state(), KeyState::released());
        assert!(h.fifo_empty());
    }

    #[test]
    fn fifo_size_test() {
        let mut h = Harness::new();
        assert_eq!(h.set_fifo_size(1), EcStatus::Success);
        assert_eq!(h.press_key(0, 0, true), Ok(PushOutcome::Queued));
        assert_eq!(h.press_key(0, 0, false), Err(MkbpError::Overflow));

        assert_eq!(h.read_state(), pressed(0, 0));
        assert!(h.fifo_empty());

        assert_eq!(h.set_fifo_size(100), EcStatus::Success);
        assert_eq!(h.mkbp.config().fifo_max_depth, 100);
    }

    #[test]
    fn enable_test() {
        let mut h = Harness::new();
        assert_eq!(h.set_scan_enabled(false), EcStatus::Success);
        assert_eq!(h.press_key(0, 0, true), Ok(PushOutcome::Ignored));
        assert!(h.fifo_empty());

        assert_eq!(h.set_scan_enabled(true), EcStatus::Success);
        assert_eq!(h.press_key(0, 0, true), Ok(PushOutcome::Queued));
        assert!(!h.fifo_empty());
        assert_eq!(h.read_state(), pressed(0, 0));
    }

    #[test]
    fn fifo_underrun_test() {
        let mut h = Harness::new();
        h.press_key(0, 0, true).unwrap();
        assert_eq!(h.read_state(), pressed(0, 0));

        // Empty queue answers with the last known state
        assert_eq!(h.read_state(), pressed(0, 0));
        assert!(h.fifo_empty());
    }

    #[test]
    fn initial_underrun_test() {
        let h = Harness::new();
        assert_eq!(h.read_state(), KeyState::released());
        assert_eq!(h.mkbp.line_state(), LineState::Deasserted);
    }

    #[test]
    fn overflow_updates_last_state_test() {
        let mut h = Harness::new();
        h.set_fifo_size(1);
        h.press_key(0, 0, true).unwrap();
        assert!(h.press_key(1, 1, true).is_err());

        assert_eq!(h.read_state(), pressed(0, 0));
        assert_eq!(h.read_state(), pressed(0, 0).with_key(1, 1, true));
    }

    #[test]
    fn disable_keeps_queue_test() {
        let mut h = Harness::new();
        h.press_key(2, 3, true).unwrap();
        h.set_scan_enabled(false);
        // Disabling alone never drops the line
        assert!(!h.fifo_empty());
        assert_eq!(h.mkbp.pending(), 1);
        assert_eq!(h.read_state(), pressed(2, 3));
        assert!(h.fifo_empty());
    }

    #[test]
    fn reset_buffer_test() {
        let mut h = Harness::new();
        h.press_key(0, 0, true).unwrap();
        h.press_key(0, 1, true).unwrap();
        h.mkbp.reset_buffer();
        assert!(h.fifo_empty());
        assert_eq!(h.mkbp.pending(), 0);
        assert_eq!(h.read_state(), pressed(0, 0).with_key(0, 1, true));
    }

    #[test]
    fn shrink_drops_oldest_test() {
        let mut h = Harness::new();
        for row in 0..5 {
            h.press_key(0, row, true).unwrap();
        }
        assert_eq!(h.set_fifo_size(2), EcStatus::Success);
        assert_eq!(h.mkbp.pending(), 2);

        let mut expected = KeyState::released();
        for row in 0..4 {
            expected.set(0, row, true);
        }
        assert_eq!(h.read_state(), expected);
        expected.set(0, 4, true);
        assert_eq!(h.read_state(), expected);
        assert!(h.fifo_empty());
    }

    #[test]
    fn invalid_config_test() {
        let mut h = Harness::new();
        assert_eq!(h.set_fifo_size(0), EcStatus::InvalidParam);
        // Unknown mask bit
        assert_eq!(h.set_config((1 << 7) | (1 << 2), 0, 0, 4), EcStatus::InvalidParam);
        assert_eq!(h.mkbp.config().fifo_max_depth, DEFAULT_FIFO_DEPTH);

        assert_eq!(
            h.mkbp.set_config(ConfigUpdate {
                enabled: Some(false),
                fifo_max_depth: Some(0),
                ..ConfigUpdate::default()
            }),
            Err(MkbpError::InvalidConfiguration("fifo depth must be positive"))
        );
        // Partially valid updates leave everything untouched
        assert!(h.mkbp.config().enabled);
        assert_eq!(h.press_key(0, 0, true), Ok(PushOutcome::Queued));
    }

    #[test]
    fn get_config_test() {
        let h = Harness::new();
        h.set_fifo_size(7);
        h.set_scan_enabled(false);

        let mut out = [0u8; 32];
        let size = h
            .mkbp
            .handle_command(CMD_MKBP_GET_CONFIG, &[], &mut out)
            .unwrap();
        assert_eq!(size, 21);

        let raw: RawMkbpConfig = bytemuck::pod_read_unaligned(&out[..size]);
        let mut reported = MkbpConfig::default();
        raw.to_update().unwrap().apply_to(&mut reported);
        assert_eq!(reported, h.mkbp.config());
        assert_eq!(reported.fifo_max_depth, 7);
        assert!(!reported.enabled);
    }

    #[test]
    fn info_test() {
        let h = Harness::new();
        let mut out = [0u8; 9];
        assert_eq!(h.mkbp.handle_command(CMD_MKBP_INFO, &[], &mut out), Ok(9));
        assert_eq!(out, [8u8, 0, 0, 0, 13, 0, 0, 0, 0]);
    }

    #[test]
    fn simulate_key_test() {
        let h = Harness::new();
        assert_eq!(
            h.mkbp.handle_command(CMD_MKBP_SIMULATE_KEY, &[3, 2, 1], &mut []),
            Ok(0)
        );
        assert!(!h.fifo_empty());
        assert_eq!(h.read_state(), pressed(3, 2));

        h.mkbp
            .handle_command(CMD_MKBP_SIMULATE_KEY, &[3, 2, 0], &mut [])
            .unwrap();
        assert_eq!(h.read_state(), KeyState::released());

        let err = h
            .mkbp
            .handle_command(CMD_MKBP_SIMULATE_KEY, &[KEYBOARD_COLS as u8, 0, 1], &mut [])
            .unwrap_err();
        assert_eq!(EcStatus::from(err), EcStatus::InvalidParam);
    }

    #[test]
    fn simulate_overflow_is_not_a_failure_test() {
        let h = Harness::new();
        h.set_fifo_size(1);
        h.mkbp
            .handle_command(CMD_MKBP_SIMULATE_KEY, &[0, 0, 1], &mut [])
            .unwrap();
        assert_eq!(
            h.mkbp.handle_command(CMD_MKBP_SIMULATE_KEY, &[0, 1, 1], &mut []),
            Ok(0)
        );
        assert_eq!(h.mkbp.pending(), 1);
    }

    #[test]
    fn short_response_keeps_event_test() {
        let mut h = Harness::new();
        h.press_key(0, 0, true).unwrap();

        let mut out = [0u8; KEYBOARD_COLS - 1];
        let err = h
            .mkbp
            .handle_command(CMD_MKBP_STATE, &[], &mut out)
            .unwrap_err();
        assert_eq!(EcStatus::from(err), EcStatus::ResponseTooBig);
        assert_eq!(h.mkbp.pending(), 1);
        assert_eq!(h.read_state(), pressed(0, 0));
    }

    #[test]
    fn unknown_command_test() {
        let h = Harness::new();
        let err = h.mkbp.handle_command(0x63, &[], &mut []).unwrap_err();
        assert_eq!(EcStatus::from(err), EcStatus::InvalidCommand);
    }

    fn tagged(seq: u16) -> KeyState {
        let mut raw = [0xFFu8; KEYBOARD_COLS];
        raw[..2].copy_from_slice(&seq.to_le_bytes());
        KeyState::from_bytes(&raw).unwrap()
    }

    fn tag_of(state: &KeyState) -> u16 {
        let bytes = state.as_bytes();
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    #[test]
    fn concurrent_scan_and_read_test() {
        const EVENTS: u16 = 20_000;

        let pin = SignalPin::new();
        let mkbp = Arc::new(Mkbp::new(pin.clone()));
        mkbp.set_config(ConfigUpdate::depth(255)).unwrap();

        let producer = {
            let mkbp = Arc::clone(&mkbp);
            std::thread::spawn(move || {
                for seq in 0..EVENTS {
                    // Full fifo: retry until the host makes room
                    while let Err(err) = mkbp.notify_new_scan(tagged(seq)) {
                        assert_eq!(err, MkbpError::Overflow);
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < EVENTS {
            if pin.events_pending() {
                // Only this thread pops, so a low line means an event is queued
                let state = mkbp.read_state();
                assert_eq!(tag_of(&state), expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();

        assert!(pin.is_high());
        assert_eq!(mkbp.pending(), 0);
        assert_eq!(mkbp.line_state(), LineState::Deasserted);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Scan(usize, usize, bool),
        Read,
        Reset,
        Depth(u8),
        Enable(bool),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            5 => (0..KEYBOARD_COLS, 0..KEYBOARD_ROWS, any::<bool>())
                .prop_map(|(c, r, p)| Op::Scan(c, r, p)),
            4 => Just(Op::Read),
            1 => Just(Op::Reset),
            1 => (0..8u8).prop_map(Op::Depth),
            1 => any::<bool>().prop_map(Op::Enable),
        ]
    }

    proptest! {
        #[test]
        fn line_derivation_proptest(ops in prop::collection::vec(arb_op(), 1..200)) {
            let mut h = Harness::new();
            for op in ops {
                match op {
                    Op::Scan(col, row, down) => {
                        let _ = h.press_key(col, row, down);
                    }
                    Op::Read => {
                        h.read_state();
                    }
                    Op::Reset => h.mkbp.reset_buffer(),
                    Op::Depth(depth) => {
                        h.set_fifo_size(depth);
                    }
                    Op::Enable(enabled) => {
                        h.set_scan_enabled(enabled);
                    }
                }
                let pending = h.mkbp.pending();
                prop_assert!(pending <= h.mkbp.config().fifo_max_depth);
                prop_assert_eq!(!h.fifo_empty(), pending > 0);
            }
        }

        #[test]
        fn disabled_noop_proptest(
            scans in prop::collection::vec(
                (0..KEYBOARD_COLS, 0..KEYBOARD_ROWS, any::<bool>()),
                1..50
            )
        ) {
            let mut h = Harness::new();
            h.press_key(0, 0, true).unwrap();
            h.set_scan_enabled(false);

            for (col, row, down) in scans {
                prop_assert_eq!(h.press_key(col, row, down), Ok(PushOutcome::Ignored));
                prop_assert_eq!(h.mkbp.pending(), 1);
            }

            prop_assert_eq!(h.read_state(), pressed(0, 0));
            // Last known state ignored the discarded scans too
            prop_assert_eq!(h.read_state(), pressed(0, 0));
        }
    }
}
