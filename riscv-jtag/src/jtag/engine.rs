//! IR/DR scans on top of a [`JtagController`].

use crate::bits::BitSequence;
use crate::jtag::controller::JtagController;
use crate::jtag::state::{TapState, TapStateMachine};
use crate::jtag::{JtagAccess, JtagError};

/// Drives a single TAP through scans, keeping a local copy of its state machine in sync with the
/// TMS sequences sent to the controller.
#[derive(Debug)]
pub struct JtagEngine<C> {
    controller: C,
    fsm: TapStateMachine,
    use_trst: bool,
}

impl<C: JtagController> JtagEngine<C> {
    /// Creates an engine. The TAP state is unknown until [`JtagEngine::reset`] runs.
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            fsm: TapStateMachine::new(),
            use_trst: true,
        }
    }

    /// Whether [`JtagEngine::reset`] pulses TRST in addition to the TMS reset sequence.
    pub fn with_trst(mut self, use_trst: bool) -> Self {
        self.use_trst = use_trst;
        self
    }

    /// The tracked TAP state.
    pub fn state(&self) -> TapState {
        self.fsm.state()
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Resets the TAP and moves to Run-Test/Idle.
    pub fn reset(&mut self) -> Result<(), JtagError> {
        self.controller.tap_reset(self.use_trst)?;
        self.fsm.reset();
        self.go_idle()
    }

    /// Pulses the system reset line. The TAP state is not affected.
    pub fn system_reset(&mut self) -> Result<(), JtagError> {
        self.controller.system_reset()
    }

    /// Moves to Run-Test/Idle.
    pub fn go_idle(&mut self) -> Result<(), JtagError> {
        self.change_state(TapState::RunTestIdle)
    }

    /// Moves the TAP to `target` along the shortest path.
    pub fn change_state(&mut self, target: TapState) -> Result<(), JtagError> {
        let path = self.fsm.find_path(target, None);
        let events = self.fsm.get_events(&path)?;
        if events.is_empty() {
            return Ok(());
        }

        tracing::trace!("{} -> {target} via {events}", self.fsm.state());

        self.controller.write_tms(events.clone())?;
        self.fsm.handle_events(&events);
        Ok(())
    }

    /// Shifts `bits` through the register selected by `shift` and returns what was shifted out.
    ///
    /// The last bit is shifted together with the transition into Exit1, then the TAP is moved
    /// through Update back to Run-Test/Idle.
    fn scan(
        &mut self,
        shift: TapState,
        update: TapState,
        bits: &BitSequence,
    ) -> Result<BitSequence, JtagError> {
        if bits.is_empty() {
            return Err(JtagError::EmptyScan);
        }

        self.change_state(shift)?;
        self.controller.write(bits.clone(), true)?;
        self.change_state(update)?;
        self.go_idle()?;

        self.controller.read(bits.len())
    }
}

impl<C: JtagController> JtagAccess for JtagEngine<C> {
    fn write_ir(&mut self, ir: &BitSequence) -> Result<(), JtagError> {
        let captured = self.scan(TapState::ShiftIr, TapState::UpdateIr, ir)?;

        // IEEE 1149.1 forces the two bits closest to TDO to capture 0b01.
        let valid = match captured.len() {
            1 => captured.get(0) == Some(true),
            len => captured.get(len - 1) == Some(true) && captured.get(len - 2) == Some(false),
        };
        if !valid {
            tracing::warn!("IR capture {captured} after writing {ir}");
            return Err(JtagError::IrCaptureMismatch(captured));
        }

        tracing::trace!("IR <- {ir}");
        Ok(())
    }

    fn write_dr(&mut self, dr: &BitSequence) -> Result<BitSequence, JtagError> {
        let captured = self.scan(TapState::ShiftDr, TapState::UpdateDr, dr)?;
        tracing::trace!("DR <- {dr}, -> {captured}");
        Ok(captured)
    }

    fn idle(&mut self, cycles: usize) -> Result<(), JtagError> {
        self.go_idle()?;
        if cycles > 0 {
            self.controller.write_tms(BitSequence::zeros(cycles))?;
        }
        Ok(())
    }
}
