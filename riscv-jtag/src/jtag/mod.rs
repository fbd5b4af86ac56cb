//! JTAG: TAP state machine, line controllers and the scan engine.

pub mod bitbang;
pub mod controller;
pub mod engine;
pub mod state;

#[cfg(test)]
pub(crate) mod sim;

pub use bitbang::{BitBangAdapter, BitBangController};
pub use controller::{ClockedController, JtagController, PinDriver};
pub use engine::JtagEngine;
pub use state::{TapState, TapStateMachine};

use crate::bits::{BitSequence, BitsError};

/// Errors raised by the JTAG layer.
#[derive(thiserror::Error, Debug)]
pub enum JtagError {
    #[error("I/O error on the JTAG transport")]
    Io(#[from] std::io::Error),
    #[error("the remote closed the JTAG transport")]
    ConnectionClosed,
    #[error("unexpected TDO response byte {0:#04x}")]
    UnexpectedResponse(u8),
    #[error("unknown TAP state {0:?}")]
    UnknownState(String),
    #[error("TAP states {from} and {to} are not adjacent")]
    NotAdjacent { from: TapState, to: TapState },
    #[error("a deferred TDI bit is still waiting to be clocked out")]
    PendingBitOutstanding,
    #[error("requested {requested} captured bits, only {available} available")]
    NotEnoughCaptured { requested: usize, available: usize },
    #[error("IR capture {0} does not start with the mandatory 0b01 pattern")]
    IrCaptureMismatch(BitSequence),
    #[error("a scan needs at least one bit")]
    EmptyScan,
    #[error(transparent)]
    Bits(#[from] BitsError),
}

/// Register level access to a single TAP.
///
/// This is the seam the Debug Transport Module is built on.
pub trait JtagAccess {
    /// Shifts `ir` into the instruction register.
    fn write_ir(&mut self, ir: &BitSequence) -> Result<(), JtagError>;

    /// Shifts `dr` into the selected data register and returns the bits shifted out.
    fn write_dr(&mut self, dr: &BitSequence) -> Result<BitSequence, JtagError>;

    /// Shifts `length` zero bits through the selected data register and returns its content.
    fn read_dr(&mut self, length: usize) -> Result<BitSequence, JtagError> {
        self.write_dr(&BitSequence::zeros(length))
    }

    /// Clocks `cycles` times in Run-Test/Idle.
    fn idle(&mut self, cycles: usize) -> Result<(), JtagError>;
}
