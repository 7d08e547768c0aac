use log::{trace, warn};

use crate::error::{MkbpError, Result};
use crate::keystate::KeyState;

// The depth field on the wire is a single byte
pub const MAX_FIFO_DEPTH: usize = u8::MAX as usize;
pub const DEFAULT_FIFO_DEPTH: usize = 100;

/// Bounded queue of scan snapshots waiting for the host.
///
/// Storage is sized for `MAX_FIFO_DEPTH` up front; `depth` only limits how
/// many slots may be occupied at once.
pub struct KeyFifo {
    entries: [KeyState; MAX_FIFO_DEPTH],
    read_pos: usize,
    len: usize,
    depth: usize,
    last_state: KeyState,
}

impl KeyFifo {
    // Pub

    pub fn new(depth: usize) -> Result<Self> {
        validate_depth(depth)?;
        Ok(Self::with_depth(depth))
    }

    /// Appends `state` to the tail.
    ///
    /// A full queue rejects the snapshot with `MkbpError::Overflow`, but the
    /// last known state still follows it.
    pub fn push(&mut self, state: KeyState) -> Result<()> {
        self.last_state = state;

        if self.len >= self.depth {
            warn!(
                "Keyboard fifo full ({} entries), dropping {:?}",
                self.len, state
            );
            return Err(MkbpError::Overflow);
        }

        let write_pos = self.slot(self.len);
        self.entries[write_pos] = state;
        self.len += 1;
        trace!("Queued {:?} ({}/{})", state, self.len, self.depth);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<KeyState> {
        if self.len == 0 {
            return None;
        }

        let state = self.entries[self.read_pos];
        self.read_pos = self.slot(1);
        self.len -= 1;
        trace!("Dequeued {:?} ({}/{})", state, self.len, self.depth);
        Some(state)
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }

    /// Changes the logical depth, dropping the oldest entries that no longer
    /// fit. Returns how many were dropped.
    pub fn resize(&mut self, depth: usize) -> Result<usize> {
        validate_depth(depth)?;

        let excess = self.len.saturating_sub(depth);
        if excess > 0 {
            self.read_pos = self.slot(excess);
            self.len = depth;
            warn!("Fifo shrunk to {}, dropped {} oldest entries", depth, excess);
        }
        self.depth = depth;
        Ok(excess)
    }

    pub fn last_state(&self) -> KeyState {
        self.last_state
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    // Priv

    fn with_depth(depth: usize) -> Self {
        Self {
            entries: [KeyState::released(); MAX_FIFO_DEPTH],
            read_pos: 0,
            len: 0,
            depth,
            last_state: KeyState::released(),
        }
    }

    #[inline]
    fn slot(&self, offset: usize) -> usize {
        (self.read_pos + offset) % MAX_FIFO_DEPTH
    }
}

impl Default for KeyFifo {
    fn default() -> Self {
        Self::with_depth(DEFAULT_FIFO_DEPTH)
    }
}

fn validate_depth(depth: usize) -> Result<()> {
    if depth == 0 {
        Err(MkbpError::InvalidConfiguration("fifo depth must be positive"))
    } else if depth > MAX_FIFO_DEPTH {
        Err(MkbpError::InvalidConfiguration("fifo depth exceeds buffer size"))
    } else {
        Ok(())
    }
}
