use std::fmt;

use crate::protocol::EcStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkbpError {
    /// Queue full at push time. Local to the producer, never sent to the host.
    Overflow,
    InvalidConfiguration(&'static str),
    InvalidCommand(u16),
    InvalidParam(&'static str),
    ResponseTooBig { needed: usize, max: usize },
}

impl fmt::Display for MkbpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MkbpError::Overflow => write!(f, "keyboard fifo overflow"),
            MkbpError::InvalidConfiguration(reason) => {
                write!(f, "invalid mkbp configuration: {}", reason)
            }
            MkbpError::InvalidCommand(code) => write!(f, "unknown host command {:#04x}", code),
            MkbpError::InvalidParam(reason) => write!(f, "invalid parameter: {}", reason),
            MkbpError::ResponseTooBig { needed, max } => write!(
                f,
                "response needs {} bytes but only {} are available",
                needed, max
            ),
        }
    }
}

impl std::error::Error for MkbpError {}

impl From<MkbpError> for EcStatus {
    fn from(err: MkbpError) -> Self {
        match err {
            MkbpError::Overflow => EcStatus::Overflow,
            MkbpError::InvalidConfiguration(_) => EcStatus::InvalidParam,
            MkbpError::InvalidCommand(_) => EcStatus::InvalidCommand,
            MkbpError::InvalidParam(_) => EcStatus::InvalidParam,
            MkbpError::ResponseTooBig { .. } => EcStatus::ResponseTooBig,
        }
    }
}

pub type Result<T> = std::result::Result<T, MkbpError>;
