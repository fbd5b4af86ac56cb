//! A cycle level TAP model for tests.

use crate::jtag::controller::PinDriver;
use crate::jtag::state::TapState;
use crate::jtag::JtagError;

/// Instruction loaded by Test-Logic-Reset.
pub const IDCODE_INSTRUCTION: u32 = 0x01;

/// The data registers behind a simulated TAP.
pub trait DataRegisters {
    /// Length of the register selected by `ir`.
    fn width(&self, ir: u32) -> usize;

    /// Value loaded into the shift register in Capture-DR.
    fn capture(&mut self, ir: u32) -> u128;

    /// Called in Update-DR with the shifted-in value.
    fn update(&mut self, ir: u32, value: u128);
}

/// A TAP driven pin by pin, as a [`PinDriver`].
#[derive(Debug)]
pub struct SimulatedTap<R> {
    registers: R,
    state: TapState,
    ir_width: usize,
    ir: u32,
    ir_capture: u128,
    shift: u128,
    shift_width: usize,
    tck: bool,
    clocks: usize,
}

impl<R: DataRegisters> SimulatedTap<R> {
    pub fn new(ir_width: usize, registers: R) -> Self {
        Self {
            registers,
            state: TapState::TestLogicReset,
            ir_width,
            ir: IDCODE_INSTRUCTION,
            ir_capture: 0b01,
            shift: 0,
            shift_width: 1,
            tck: false,
            clocks: 0,
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn instruction(&self) -> u32 {
        self.ir
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Number of rising TCK edges seen so far.
    pub fn clocks(&self) -> usize {
        self.clocks
    }

    /// Overrides the value loaded in Capture-IR.
    pub fn set_ir_capture(&mut self, value: u128) {
        self.ir_capture = value;
    }

    fn shift_in(&mut self, tdi: bool) {
        let width = self.shift_width.max(1);
        self.shift = (self.shift >> 1) | (u128::from(tdi) << (width - 1));
    }

    fn mask(value: u128, width: usize) -> u128 {
        if width >= 128 {
            value
        } else {
            value & ((1u128 << width) - 1)
        }
    }

    fn rising_edge(&mut self, tms: bool, tdi: bool) {
        self.clocks += 1;

        match self.state {
            TapState::TestLogicReset => self.ir = IDCODE_INSTRUCTION,
            TapState::CaptureDr => {
                self.shift_width = self.registers.width(self.ir);
                self.shift = Self::mask(self.registers.capture(self.ir), self.shift_width);
            }
            TapState::CaptureIr => {
                self.shift_width = self.ir_width;
                self.shift = Self::mask(self.ir_capture, self.ir_width);
            }
            TapState::ShiftDr | TapState::ShiftIr => self.shift_in(tdi),
            TapState::UpdateDr => self.registers.update(self.ir, self.shift),
            TapState::UpdateIr => self.ir = self.shift as u32,
            _ => {}
        }

        self.state = self.state.next(tms);
    }
}

impl<R: DataRegisters> PinDriver for SimulatedTap<R> {
    fn set_lines(&mut self, tck: bool, tms: bool, tdi: bool) -> Result<(), JtagError> {
        if tck && !self.tck {
            self.rising_edge(tms, tdi);
        }
        self.tck = tck;
        Ok(())
    }

    fn sample_tdo(&mut self) -> Result<bool, JtagError> {
        Ok(match self.state {
            TapState::ShiftDr | TapState::ShiftIr => self.shift & 1 == 1,
            _ => false,
        })
    }

    fn set_reset(&mut self, trst: bool, _srst: bool) -> Result<(), JtagError> {
        if trst {
            self.state = TapState::TestLogicReset;
            self.ir = IDCODE_INSTRUCTION;
        }
        Ok(())
    }
}
