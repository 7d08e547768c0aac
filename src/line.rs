use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::debug;

/// GPIO that carries the EC_INT_L signal to the host.
pub trait InterruptPin {
    fn set_level(&self, high: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Asserted,
    Deasserted,
}

/// Drives the active-low host interrupt from queue occupancy.
///
/// The state is derived: callers report whether events are pending after
/// every queue mutation and the pin only moves on a real transition.
pub struct NotificationLine<P> {
    pin: P,
    state: LineState,
}

impl<P: InterruptPin> NotificationLine<P> {
    pub fn new(pin: P) -> Self {
        // Idle level is high
        pin.set_level(true);
        Self {
            pin,
            state: LineState::Deasserted,
        }
    }

    pub fn update(&mut self, pending: bool) {
        let new_state = if pending {
            LineState::Asserted
        } else {
            LineState::Deasserted
        };

        if self.state != new_state {
            debug!("EC_INT_L {:?} -> {:?}", self.state, new_state);
            self.state = new_state;
            self.pin.set_level(new_state == LineState::Deasserted);
        }
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    pub fn is_asserted(&self) -> bool {
        self.state == LineState::Asserted
    }
}

/// Pin level shared with whoever watches the line.
#[derive(Clone)]
pub struct SignalPin {
    level: Arc<AtomicBool>,
}

impl SignalPin {
    pub fn new() -> Self {
        Self {
            level: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    /// Host view of the line: data is waiting while the pin is low.
    pub fn events_pending(&self) -> bool {
        !self.is_high()
    }
}

impl Default for SignalPin {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptPin for SignalPin {
    fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::Release);
    }
}
