//! # riscv-jtag
//!
//! Debug access to RISC-V cores implementing the RISC-V External Debug Support 0.13 over JTAG.
//!
//! The crate is layered bottom up:
//!
//! - [`bits`]: [`BitSequence`], the fixed-width bit string every scan is made of.
//! - [`jtag`]: the TAP state machine, a remote bit-bang transport and the [`JtagEngine`] issuing
//!   IR and DR scans.
//! - [`fields`]: declarative register layouts used to encode and decode register values.
//! - [`dtm`]: the Debug Transport Module and the Debug Module Interface with its sticky error.
//! - [`dm`]: the [`DebugModule`], with hart run control, abstract CSR access and System Bus
//!   Access to memory.
//!
//! # Example
//!
//! ```no_run
//! use riscv_jtag::config::Config;
//!
//! # fn main() -> Result<(), riscv_jtag::Error> {
//! let mut dm = riscv_jtag::connect(&Config::default())?;
//!
//! dm.halt(0)?;
//! let misa = dm.read_csr("misa")?;
//! println!("misa: {misa:#010x}");
//!
//! let word = dm.read32(0x8000_0000)?;
//! println!("first word of RAM: {word:#010x}");
//! dm.resume(0)?;
//! # Ok(())
//! # }
//! ```

pub mod bits;
pub mod config;
pub mod dm;
pub mod dtm;
mod error;
pub mod fields;
pub mod jtag;

use std::net::TcpStream;

pub use crate::bits::BitSequence;
pub use crate::config::Config;
pub use crate::dm::DebugModule;
pub use crate::dtm::Dtm;
pub use crate::error::Error;
pub use crate::jtag::JtagEngine;

use crate::jtag::{BitBangAdapter, BitBangController};

/// A Debug Module reached through a remote bit-bang server.
pub type RemoteDebugModule = DebugModule<Dtm<JtagEngine<BitBangController<TcpStream>>>>;

/// Connects to the bit-bang server named in `config` and initializes the Debug Module behind it.
#[tracing::instrument(skip(config), fields(address = %config.transport.address))]
pub fn connect(config: &Config) -> Result<RemoteDebugModule, Error> {
    let address = config.transport.address.as_str();
    let adapter = BitBangAdapter::connect(address).map_err(|source| Error::Connect {
        address: address.to_string(),
        source,
    })?;

    let mut engine = JtagEngine::new(BitBangController::new(adapter));
    engine.reset()?;

    let dtm = Dtm::new(engine, config.dtm.ir_width)
        .with_idle_cycles(config.dtm.idle_cycles)
        .with_decode_mode(config.fields.decode_mode);

    let mut dm = DebugModule::new(dtm)
        .with_polling(config.dm.poll_timeout(), config.dm.poll_interval())
        .with_decode_mode(config.fields.decode_mode);
    dm.initialize()?;

    Ok(dm)
}
