pub mod config;
pub mod error;
pub mod fifo;
pub mod keystate;
pub mod line;
pub mod mkbp;
pub mod protocol;
pub mod sim;
pub mod timing;

pub use error::MkbpError;
pub use keystate::KeyState;
pub use mkbp::{Mkbp, PushOutcome};
