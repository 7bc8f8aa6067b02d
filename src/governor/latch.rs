//! Fault latch and escalation.
//!
//! The latch holds a confirmed fault until the condition has been absent for
//! `clear_cycles` consecutive cycles. `disable_level` rises by one on every new
//! fault episode (a transition out of `Normal`) and never falls; only
//! re-initialising the governor resets it.

use super::FaultCode;
use crate::config::MAX_DISABLE_LEVEL;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatchState {
    Normal,
    Faulted { level: u8, fault: FaultCode },
    /// The condition is gone; `count` fault-free cycles have elapsed.
    Clearing { level: u8, fault: FaultCode, count: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatchTransition {
    None,
    /// New episode from `Normal`.
    Confirmed { level: u8, fault: FaultCode },
    /// A different fault kind while already faulted.
    Reconfirmed { fault: FaultCode },
    /// Condition returned while clearing. The level is unchanged.
    Relapsed { fault: FaultCode },
    /// Fault-free window elapsed; the latch is open again.
    Cleared { fault: FaultCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultLatch {
    state: LatchState,
    disable_level: u8,
    clear_cycles: u16,
}

impl FaultLatch {
    pub fn new(clear_cycles: u16) -> Self {
        Self {
            state: LatchState::Normal,
            disable_level: 0,
            clear_cycles,
        }
    }

    /// Advance one cycle with this cycle's fault condition, if any.
    pub fn step(&mut self, condition: Option<FaultCode>) -> LatchTransition {
        let (next, transition) = match (self.state, condition) {
            (LatchState::Normal, None) => (LatchState::Normal, LatchTransition::None),
            (LatchState::Normal, Some(fault)) => {
                self.disable_level = (self.disable_level + 1).min(MAX_DISABLE_LEVEL);
                let level = self.disable_level;
                (
                    LatchState::Faulted { level, fault },
                    LatchTransition::Confirmed { level, fault },
                )
            }
            (LatchState::Faulted { level, fault }, Some(new_fault)) => {
                let transition = if new_fault == fault {
                    LatchTransition::None
                } else {
                    LatchTransition::Reconfirmed { fault: new_fault }
                };
                (LatchState::Faulted { level, fault: new_fault }, transition)
            }
            (LatchState::Faulted { level, fault }, None) => self.count_clear(level, fault, 1),
            (LatchState::Clearing { level, .. }, Some(fault)) => (
                LatchState::Faulted { level, fault },
                LatchTransition::Relapsed { fault },
            ),
            (LatchState::Clearing { level, fault, count }, None) => {
                self.count_clear(level, fault, count.saturating_add(1))
            }
        };
        self.state = next;
        transition
    }

    fn count_clear(&self, level: u8, fault: FaultCode, count: u16) -> (LatchState, LatchTransition) {
        if count >= self.clear_cycles {
            (LatchState::Normal, LatchTransition::Cleared { fault })
        } else {
            (
                LatchState::Clearing { level, fault, count },
                LatchTransition::None,
            )
        }
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    pub fn is_engaged(&self) -> bool {
        !matches!(self.state, LatchState::Normal)
    }

    /// Latched fault, `NoFault` when open.
    pub fn fault(&self) -> FaultCode {
        match self.state {
            LatchState::Normal => FaultCode::NoFault,
            LatchState::Faulted { fault, .. } | LatchState::Clearing { fault, .. } => fault,
        }
    }

    /// Level of the current episode, 0 when open.
    pub fn active_level(&self) -> u8 {
        match self.state {
            LatchState::Normal => 0,
            LatchState::Faulted { level, .. } | LatchState::Clearing { level, .. } => level,
        }
    }

    pub fn disable_level(&self) -> u8 {
        self.disable_level
    }

    pub fn clear_count(&self) -> u16 {
        match self.state {
            LatchState::Clearing { count, .. } => count,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_clean(latch: &mut FaultLatch, cycles: u16) -> LatchTransition {
        let mut last = LatchTransition::None;
        for _ in 0..cycles {
            last = latch.step(None);
        }
        last
    }

    #[test]
    fn test_first_episode_is_level_one() {
        let mut latch = FaultLatch::new(50);
        let transition = latch.step(Some(FaultCode::SensorFail));
        assert_eq!(
            transition,
            LatchTransition::Confirmed {
                level: 1,
                fault: FaultCode::SensorFail
            }
        );
        assert!(latch.is_engaged());
        assert_eq!(latch.fault(), FaultCode::SensorFail);
    }

    #[test]
    fn test_latch_opens_exactly_at_clear_cycles() {
        let mut latch = FaultLatch::new(50);
        latch.step(Some(FaultCode::Plausibility));

        assert_eq!(run_clean(&mut latch, 49), LatchTransition::None);
        assert_eq!(latch.clear_count(), 49);
        assert!(latch.is_engaged());

        assert_eq!(
            latch.step(None),
            LatchTransition::Cleared {
                fault: FaultCode::Plausibility
            }
        );
        assert!(!latch.is_engaged());
        assert_eq!(latch.fault(), FaultCode::NoFault);
    }

    #[test]
    fn test_persisting_fault_does_not_count() {
        let mut latch = FaultLatch::new(5);
        for _ in 0..20 {
            latch.step(Some(FaultCode::OutOfRange));
        }
        assert_eq!(latch.clear_count(), 0);
        assert_eq!(latch.disable_level(), 1);
    }

    #[test]
    fn test_relapse_restarts_window_without_escalation() {
        let mut latch = FaultLatch::new(50);
        latch.step(Some(FaultCode::SensorFail));
        run_clean(&mut latch, 30);
        assert_eq!(
            latch.step(Some(FaultCode::SensorFail)),
            LatchTransition::Relapsed {
                fault: FaultCode::SensorFail
            }
        );
        assert_eq!(latch.disable_level(), 1);
        assert_eq!(latch.clear_count(), 0);
        assert_eq!(run_clean(&mut latch, 49), LatchTransition::None);
        assert!(latch.is_engaged());
    }

    #[test]
    fn test_escalation_caps_at_three() {
        let mut latch = FaultLatch::new(2);
        let mut levels = [0u8; 5];
        for level in &mut levels {
            latch.step(Some(FaultCode::CmdTimeout));
            *level = latch.active_level();
            run_clean(&mut latch, 2);
        }
        assert_eq!(levels, [1, 2, 3, 3, 3]);
        assert_eq!(latch.disable_level(), 3);
    }

    #[test]
    fn test_new_kind_while_faulted_is_reconfirmed() {
        let mut latch = FaultLatch::new(50);
        latch.step(Some(FaultCode::Plausibility));
        assert_eq!(
            latch.step(Some(FaultCode::SensorFail)),
            LatchTransition::Reconfirmed {
                fault: FaultCode::SensorFail
            }
        );
        assert_eq!(latch.fault(), FaultCode::SensorFail);
        assert_eq!(latch.disable_level(), 1);
    }
}
