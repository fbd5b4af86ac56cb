//! The IEEE 1149.1 TAP controller state machine.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::bits::BitSequence;
use crate::jtag::JtagError;

/// One of the 16 TAP controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    /// All states, in declaration order.
    pub const ALL: [TapState; 16] = [
        Self::TestLogicReset,
        Self::RunTestIdle,
        Self::SelectDrScan,
        Self::CaptureDr,
        Self::ShiftDr,
        Self::Exit1Dr,
        Self::PauseDr,
        Self::Exit2Dr,
        Self::UpdateDr,
        Self::SelectIrScan,
        Self::CaptureIr,
        Self::ShiftIr,
        Self::Exit1Ir,
        Self::PauseIr,
        Self::Exit2Ir,
        Self::UpdateIr,
    ];

    /// The state reached from `self` by clocking with the given TMS level.
    pub fn next(self, tms: bool) -> TapState {
        let (low, high) = self.exits();
        if tms {
            high
        } else {
            low
        }
    }

    /// Both exits of this state, as `(tms = 0, tms = 1)`.
    pub fn exits(self) -> (TapState, TapState) {
        use TapState as S;

        match self {
            S::TestLogicReset => (S::RunTestIdle, S::TestLogicReset),
            S::RunTestIdle => (S::RunTestIdle, S::SelectDrScan),

            S::SelectDrScan => (S::CaptureDr, S::SelectIrScan),
            S::CaptureDr => (S::ShiftDr, S::Exit1Dr),
            S::ShiftDr => (S::ShiftDr, S::Exit1Dr),
            S::Exit1Dr => (S::PauseDr, S::UpdateDr),
            S::PauseDr => (S::PauseDr, S::Exit2Dr),
            S::Exit2Dr => (S::ShiftDr, S::UpdateDr),
            S::UpdateDr => (S::RunTestIdle, S::SelectDrScan),

            S::SelectIrScan => (S::CaptureIr, S::TestLogicReset),
            S::CaptureIr => (S::ShiftIr, S::Exit1Ir),
            S::ShiftIr => (S::ShiftIr, S::Exit1Ir),
            S::Exit1Ir => (S::PauseIr, S::UpdateIr),
            S::PauseIr => (S::PauseIr, S::Exit2Ir),
            S::Exit2Ir => (S::ShiftIr, S::UpdateIr),
            S::UpdateIr => (S::RunTestIdle, S::SelectDrScan),
        }
    }

    /// The TMS level that moves from `self` to `to` in one clock, if they are adjacent.
    pub fn event_to(self, to: TapState) -> Option<bool> {
        let (low, high) = self.exits();
        if low == to {
            Some(false)
        } else if high == to {
            Some(true)
        } else {
            None
        }
    }

    /// The snake_case name of the state.
    pub fn name(self) -> &'static str {
        use TapState as S;

        match self {
            S::TestLogicReset => "test_logic_reset",
            S::RunTestIdle => "run_test_idle",
            S::SelectDrScan => "select_dr_scan",
            S::CaptureDr => "capture_dr",
            S::ShiftDr => "shift_dr",
            S::Exit1Dr => "exit1_dr",
            S::PauseDr => "pause_dr",
            S::Exit2Dr => "exit2_dr",
            S::UpdateDr => "update_dr",
            S::SelectIrScan => "select_ir_scan",
            S::CaptureIr => "capture_ir",
            S::ShiftIr => "shift_ir",
            S::Exit1Ir => "exit1_ir",
            S::PauseIr => "pause_ir",
            S::Exit2Ir => "exit2_ir",
            S::UpdateIr => "update_ir",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TapState {
    type Err = JtagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| JtagError::UnknownState(s.to_string()))
    }
}

/// Tracks the current state of a TAP controller.
///
/// The graph itself is fixed; only the current state pointer moves, and it only moves through
/// [`TapStateMachine::handle_events`] or [`TapStateMachine::reset`].
#[derive(Debug, Clone)]
pub struct TapStateMachine {
    state: TapState,
}

impl Default for TapStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TapStateMachine {
    /// Creates a state machine in Test-Logic-Reset.
    pub fn new() -> Self {
        Self {
            state: TapState::TestLogicReset,
        }
    }

    /// The current state.
    pub fn state(&self) -> TapState {
        self.state
    }

    /// Forces the tracked state to Test-Logic-Reset, e.g. after a TRST pulse.
    pub fn reset(&mut self) {
        self.state = TapState::TestLogicReset;
    }

    /// Shortest path from `source` (or the current state) to `target`, both ends included.
    ///
    /// The path never visits a state twice. `find_path(s, Some(s))` is `[s]`.
    pub fn find_path(&self, target: TapState, source: Option<TapState>) -> Vec<TapState> {
        let source = source.unwrap_or(self.state);

        let mut previous: [Option<TapState>; 16] = [None; 16];
        let mut visited = [false; 16];
        let mut queue = VecDeque::from([source]);
        visited[source.index()] = true;

        while let Some(state) = queue.pop_front() {
            if state == target {
                break;
            }

            let (low, high) = state.exits();
            for next in [low, high] {
                if !visited[next.index()] {
                    visited[next.index()] = true;
                    previous[next.index()] = Some(state);
                    queue.push_back(next);
                }
            }
        }

        // Every state is reachable from every other one, so the walk back always terminates at
        // the source.
        let mut path = vec![target];
        let mut current = target;
        while let Some(prev) = previous[current.index()] {
            path.push(prev);
            current = prev;
        }
        path.reverse();
        path
    }

    /// TMS levels that walk `path`.
    ///
    /// The first transition ends up in the least significant bit, which is the bit a controller
    /// shifts out first.
    pub fn get_events(&self, path: &[TapState]) -> Result<BitSequence, JtagError> {
        let mut events = BitSequence::new();

        for pair in path.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let tms = from
                .event_to(to)
                .ok_or(JtagError::NotAdjacent { from, to })?;
            events.push_left(&BitSequence::from(tms));
        }

        Ok(events)
    }

    /// Advances the tracked state by the TMS levels in `events`, least significant bit first.
    pub fn handle_events(&mut self, events: &BitSequence) -> TapState {
        for tms in events.iter_lsb() {
            self.state = self.state.next(tms);
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use TapState as S;

    #[test]
    fn path_to_self_is_trivial() {
        let fsm = TapStateMachine::new();
        for state in TapState::ALL {
            assert_eq!(fsm.find_path(state, Some(state)), vec![state]);
        }
    }

    #[test]
    fn idle_to_shift_dr() {
        let fsm = TapStateMachine::new();
        let path = fsm.find_path(S::ShiftDr, Some(S::RunTestIdle));
        assert_eq!(
            path,
            vec![S::RunTestIdle, S::SelectDrScan, S::CaptureDr, S::ShiftDr]
        );

        let events = fsm.get_events(&path).unwrap();
        let tms: Vec<u8> = events.iter_lsb().map(u8::from).collect();
        assert_eq!(tms, vec![1, 0, 0]);
    }

    #[test]
    fn every_path_replays_to_its_target_without_revisits() {
        let fsm = TapStateMachine::new();

        for source in TapState::ALL {
            for target in TapState::ALL {
                let path = fsm.find_path(target, Some(source));
                assert_eq!(path.first(), Some(&source));
                assert_eq!(path.last(), Some(&target));

                let mut seen = path.clone();
                seen.sort_by_key(|s| s.index());
                seen.dedup();
                assert_eq!(seen.len(), path.len(), "{source} -> {target} revisits");

                let events = fsm.get_events(&path).unwrap();
                assert_eq!(events.len(), path.len() - 1);

                let mut replay = TapStateMachine { state: source };
                assert_eq!(replay.handle_events(&events), target);
            }
        }
    }

    #[test_case(S::TestLogicReset)]
    #[test_case(S::ShiftIr)]
    #[test_case(S::PauseDr)]
    fn five_tms_ones_always_reset(start: TapState) {
        let mut fsm = TapStateMachine { state: start };
        assert_eq!(fsm.handle_events(&BitSequence::ones(5)), S::TestLogicReset);
    }

    #[test]
    fn reset_reaches_idle_in_one_step() {
        let fsm = TapStateMachine::new();
        assert_eq!(
            fsm.find_path(S::RunTestIdle, None),
            vec![S::TestLogicReset, S::RunTestIdle]
        );
    }

    #[test]
    fn non_adjacent_states_have_no_event() {
        let fsm = TapStateMachine::new();
        assert!(matches!(
            fsm.get_events(&[S::RunTestIdle, S::ShiftDr]),
            Err(JtagError::NotAdjacent {
                from: S::RunTestIdle,
                to: S::ShiftDr
            })
        ));
    }

    #[test]
    fn names_round_trip() {
        for state in TapState::ALL {
            assert_eq!(state.name().parse::<TapState>().unwrap(), state);
        }
        assert!("shift_xr".parse::<TapState>().is_err());
    }
}
