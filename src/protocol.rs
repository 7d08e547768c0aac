use std::convert::TryFrom;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::config::{ConfigFlags, ConfigUpdate, MkbpConfig, ValidMask};
use crate::error::{MkbpError, Result};
use crate::keystate::{KEYBOARD_COLS, KEYBOARD_ROWS};

// Host command codes
pub const CMD_MKBP_STATE: u16 = 0x60;
pub const CMD_MKBP_INFO: u16 = 0x61;
pub const CMD_MKBP_SIMULATE_KEY: u16 = 0x62;
pub const CMD_MKBP_SET_CONFIG: u16 = 0x64;
pub const CMD_MKBP_GET_CONFIG: u16 = 0x65;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcStatus {
    Success = 0,
    InvalidCommand = 1,
    InvalidParam = 3,
    Overflow = 11,
    ResponseTooBig = 14,
}

// All multi-byte fields are little-endian on the wire

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawMkbpConfig {
    pub valid_mask: u32,
    pub flags: u8,
    pub valid_flags: u8,
    pub scan_period_us: u16,
    pub poll_timeout_us: u32,
    pub min_post_scan_delay_us: u16,
    pub output_settle_us: u16,
    pub debounce_down_us: u16,
    pub debounce_up_us: u16,
    pub fifo_max_depth: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawMkbpInfo {
    pub rows: u32,
    pub cols: u32,
    pub switches: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawSimulateKey {
    pub col: u8,
    pub row: u8,
    pub pressed: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    GetState,
    Info,
    SimulateKey { col: usize, row: usize, pressed: bool },
    SetConfig(ConfigUpdate),
    GetConfig,
}

impl HostCommand {
    pub fn decode(command: u16, params: &[u8]) -> Result<Self> {
        match command {
            CMD_MKBP_STATE => Ok(HostCommand::GetState),
            CMD_MKBP_INFO => Ok(HostCommand::Info),
            CMD_MKBP_SIMULATE_KEY => Self::decode_simulate_key(read_params(params)?),
            CMD_MKBP_SET_CONFIG => Ok(HostCommand::SetConfig(RawMkbpConfig::to_update(
                &read_params(params)?,
            )?)),
            CMD_MKBP_GET_CONFIG => Ok(HostCommand::GetConfig),
            _ => Err(MkbpError::InvalidCommand(command)),
        }
    }

    #[inline]
    fn decode_simulate_key(raw: RawSimulateKey) -> Result<Self> {
        let (col, row) = (raw.col as usize, raw.row as usize);
        if col >= KEYBOARD_COLS || row >= KEYBOARD_ROWS {
            return Err(MkbpError::InvalidParam("key outside the matrix"));
        }
        Ok(HostCommand::SimulateKey {
            col,
            row,
            pressed: raw.pressed != 0,
        })
    }
}

impl RawMkbpConfig {
    /// Reports every field as valid. Fails if the depth does not fit the
    /// one-byte wire field.
    pub fn from_config(config: &MkbpConfig) -> Result<Self> {
        let fifo_max_depth = u8::try_from(config.fifo_max_depth).map_err(|_| {
            MkbpError::InvalidConfiguration("fifo depth exceeds the wire field")
        })?;
        let flags = if config.enabled {
            ConfigFlags::ENABLE
        } else {
            ConfigFlags::empty()
        };
        let timing = &config.timing;

        Ok(Self {
            valid_mask: ValidMask::all().bits().to_le(),
            flags: flags.bits(),
            valid_flags: ConfigFlags::all().bits(),
            scan_period_us: timing.scan_period_us.to_le(),
            poll_timeout_us: timing.poll_timeout_us.to_le(),
            min_post_scan_delay_us: timing.min_post_scan_delay_us.to_le(),
            output_settle_us: timing.output_settle_us.to_le(),
            debounce_down_us: timing.debounce_down_us.to_le(),
            debounce_up_us: timing.debounce_up_us.to_le(),
            fifo_max_depth,
        })
    }

    /// Rejects any mask bit this firmware does not know about.
    pub fn to_update(&self) -> Result<ConfigUpdate> {
        let valid_mask = ValidMask::from_bits(u32::from_le(self.valid_mask))
            .ok_or(MkbpError::InvalidConfiguration("unknown valid_mask bits"))?;
        let valid_flags = ConfigFlags::from_bits(self.valid_flags)
            .ok_or(MkbpError::InvalidConfiguration("unknown valid_flags bits"))?;
        let flags = ConfigFlags::from_bits_truncate(self.flags);

        let field = |bit: ValidMask| valid_mask.contains(bit);
        Ok(ConfigUpdate {
            enabled: if valid_flags.contains(ConfigFlags::ENABLE) {
                Some(flags.contains(ConfigFlags::ENABLE))
            } else {
                None
            },
            fifo_max_depth: if field(ValidMask::FIFO_MAX_DEPTH) {
                Some(self.fifo_max_depth as usize)
            } else {
                None
            },
            scan_period_us: if field(ValidMask::SCAN_PERIOD) {
                Some(u16::from_le(self.scan_period_us))
            } else {
                None
            },
            poll_timeout_us: if field(ValidMask::POLL_TIMEOUT) {
                Some(u32::from_le(self.poll_timeout_us))
            } else {
                None
            },
            min_post_scan_delay_us: if field(ValidMask::MIN_POST_SCAN_DELAY) {
                Some(u16::from_le(self.min_post_scan_delay_us))
            } else {
                None
            },
            output_settle_us: if field(ValidMask::OUTPUT_SETTLE) {
                Some(u16::from_le(self.output_settle_us))
            } else {
                None
            },
            debounce_down_us: if field(ValidMask::DEBOUNCE_DOWN) {
                Some(u16::from_le(self.debounce_down_us))
            } else {
                None
            },
            debounce_up_us: if field(ValidMask::DEBOUNCE_UP) {
                Some(u16::from_le(self.debounce_up_us))
            } else {
                None
            },
        })
    }
}

impl RawMkbpInfo {
    pub fn matrix() -> Self {
        Self {
            rows: (KEYBOARD_ROWS as u32).to_le(),
            cols: (KEYBOARD_COLS as u32).to_le(),
            switches: 0,
        }
    }
}

/// Copies `bytes` into the front of `response`, returning the length used.
pub fn write_response(response: &mut [u8], bytes: &[u8]) -> Result<usize> {
    let max = response.len();
    let out = response
        .get_mut(..bytes.len())
        .ok_or(MkbpError::ResponseTooBig {
            needed: bytes.len(),
            max,
        })?;
    out.copy_from_slice(bytes);
    Ok(bytes.len())
}

#[inline]
fn read_params<T: Pod>(params: &[u8]) -> Result<T> {
    params
        .get(..size_of::<T>())
        .map(bytemuck::pod_read_unaligned::<T>)
        .ok_or(MkbpError::InvalidParam("short parameter block"))
}
