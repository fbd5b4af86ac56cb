//! Line-level JTAG controllers.
//!
//! A [`JtagController`] clocks TMS/TDI sequences and captures TDO. [`ClockedController`]
//! implements it on top of any [`PinDriver`], which only knows how to drive the lines.

use crate::bits::BitSequence;
use crate::jtag::JtagError;

/// Drives the physical JTAG lines of a single TAP.
pub trait JtagController {
    /// Puts the TAP into Test-Logic-Reset, optionally pulsing TRST first.
    fn tap_reset(&mut self, use_trst: bool) -> Result<(), JtagError>;

    /// Pulses the system reset line.
    fn system_reset(&mut self) -> Result<(), JtagError>;

    /// Clocks out `tms`, least significant bit first.
    ///
    /// A TDI bit deferred by [`JtagController::write`] is clocked out with the first TMS bit.
    fn write_tms(&mut self, tms: BitSequence) -> Result<(), JtagError>;

    /// Clocks out `tdi` with TMS low, least significant bit first, capturing TDO.
    ///
    /// With `use_last`, the final bit is not clocked; it is held until the next
    /// [`JtagController::write_tms`] so that it is shifted together with the TMS transition out
    /// of the shift state. At most one bit can be held at a time.
    fn write(&mut self, tdi: BitSequence, use_last: bool) -> Result<(), JtagError>;

    /// Returns the last `length` captured TDO bits and clears the capture buffer.
    fn read(&mut self, length: usize) -> Result<BitSequence, JtagError>;

    /// Current TDI level.
    fn tdi(&self) -> bool;

    /// Current TMS level.
    fn tms(&self) -> bool;
}

/// Raw access to the TCK/TMS/TDI/TDO and reset lines.
pub trait PinDriver {
    /// Drives TCK, TMS and TDI.
    fn set_lines(&mut self, tck: bool, tms: bool, tdi: bool) -> Result<(), JtagError>;

    /// Samples TDO.
    fn sample_tdo(&mut self) -> Result<bool, JtagError>;

    /// Drives TRST and SRST, `true` meaning asserted.
    fn set_reset(&mut self, trst: bool, srst: bool) -> Result<(), JtagError>;
}

/// A [`JtagController`] clocking through a [`PinDriver`].
#[derive(Debug)]
pub struct ClockedController<P> {
    driver: P,
    tms: bool,
    tdi: bool,
    /// TDI bit deferred to the next TMS transition.
    pending: Option<bool>,
    /// Captured TDO bits, oldest first.
    captured: Vec<bool>,
}

impl<P: PinDriver> ClockedController<P> {
    pub fn new(driver: P) -> Self {
        Self {
            driver,
            tms: false,
            tdi: false,
            pending: None,
            captured: Vec::new(),
        }
    }

    pub fn driver(&self) -> &P {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut P {
        &mut self.driver
    }

    pub fn into_driver(self) -> P {
        self.driver
    }

    /// One TCK cycle. Starts on a falling edge; TDO is sampled while TCK is low, TDI and TMS are
    /// sampled by the TAP on the rising edge.
    fn clock(&mut self, tms: bool, tdi: bool, capture: bool) -> Result<(), JtagError> {
        self.driver.set_lines(false, tms, tdi)?;
        if capture {
            let tdo = self.driver.sample_tdo()?;
            self.captured.push(tdo);
        }
        self.driver.set_lines(true, tms, tdi)?;

        self.tms = tms;
        self.tdi = tdi;
        Ok(())
    }
}

impl<P: PinDriver> JtagController for ClockedController<P> {
    fn tap_reset(&mut self, use_trst: bool) -> Result<(), JtagError> {
        tracing::trace!("tap_reset(use_trst = {use_trst})");

        self.pending = None;
        self.captured.clear();

        if use_trst {
            self.driver.set_reset(true, false)?;
            self.driver.set_reset(false, false)?;
        }

        // Five clocks with TMS high reach Test-Logic-Reset from any state, TRST or not.
        for _ in 0..5 {
            self.clock(true, false, false)?;
        }
        Ok(())
    }

    fn system_reset(&mut self) -> Result<(), JtagError> {
        tracing::trace!("system_reset");
        self.driver.set_reset(false, true)?;
        self.driver.set_reset(false, false)
    }

    fn write_tms(&mut self, tms: BitSequence) -> Result<(), JtagError> {
        for bit in tms.iter_lsb() {
            match self.pending.take() {
                Some(tdi) => self.clock(bit, tdi, true)?,
                None => self.clock(bit, self.tdi, false)?,
            }
        }
        Ok(())
    }

    fn write(&mut self, tdi: BitSequence, use_last: bool) -> Result<(), JtagError> {
        if self.pending.is_some() {
            return Err(JtagError::PendingBitOutstanding);
        }

        let count = tdi.len();
        for (index, bit) in tdi.iter_lsb().enumerate() {
            if use_last && index + 1 == count {
                self.pending = Some(bit);
            } else {
                self.clock(false, bit, true)?;
            }
        }
        Ok(())
    }

    fn read(&mut self, length: usize) -> Result<BitSequence, JtagError> {
        let available = self.captured.len();
        if length > available {
            return Err(JtagError::NotEnoughCaptured {
                requested: length,
                available,
            });
        }

        let captured = std::mem::take(&mut self.captured);
        Ok(BitSequence::from_lsb_bits(
            captured[available - length..].iter().copied(),
        ))
    }

    fn tdi(&self) -> bool {
        self.tdi
    }

    fn tms(&self) -> bool {
        self.tms
    }
}
