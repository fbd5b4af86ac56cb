use crate::bits::BitsError;
use crate::dm::DebugModuleError;
use crate::dtm::DtmError;
use crate::fields::FieldError;
use crate::jtag::JtagError;

/// The overarching error type which contains all possible errors as variants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error with the bit-bang connection occurred.
    #[error("Failed to connect to the bit-bang server at {address}")]
    Connect {
        address: String,
        source: std::io::Error,
    },
    #[error("A bit sequence operation failed.")]
    Bits(#[from] BitsError),
    #[error("A register field could not be encoded or decoded.")]
    Field(#[from] FieldError),
    /// An error on the JTAG layer occurred.
    #[error("A JTAG error occurred.")]
    Jtag(#[from] JtagError),
    /// The debug transport module reported an error.
    #[error("A DTM error occurred.")]
    Dtm(#[from] DtmError),
    #[error("A debug module error occurred.")]
    DebugModule(#[from] DebugModuleError),
    #[error("The configuration could not be parsed.")]
    Config(#[from] serde_yaml::Error),
}
