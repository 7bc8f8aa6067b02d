//! Cycle-tagged stimulus schedule for the simulator.
//!
//! A stimulus is anything the outside world does to the front zone: a driver
//! input, an e-stop press, a sensor fault. Scenarios are canned stimulus
//! scripts used for demos and regression runs.

use crate::fault_injection::SensorFault;
use crate::governor::VehicleState;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_SCHEDULED_STIMULI: usize = 64;
const MAX_DUE_PER_CYCLE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stimulus {
    SetSteering { deg: i32 },
    SetBrake { pct: i32 },
    EmergencyStop { active: bool },
    SetVehicleState { state: VehicleState },
    InjectSensorFault { fault: SensorFault, duration_cycles: Option<u32> },
    ClearSensorFault,
    /// Stop the driver model from refreshing commands, so they go stale.
    FreezeCommands { frozen: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledStimulus {
    pub at_cycle: u64,
    pub stimulus: Stimulus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_scheduled: u32,
    pub total_applied: u32,
    pub total_dropped: u32,
    pub currently_scheduled: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("stimulus queue full")]
    QueueFull,
    #[error("cycle {at} is already in the past (now {now})")]
    InPast { at: u64, now: u64 },
}

/// Built-in stimulus scripts, cycle offsets relative to the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario {
    /// Gentle steering sweep with light braking.
    Nominal,
    /// Steering sensor drops out for 20 cycles.
    SensorDropout,
    /// Steering sensor drifts 8 degrees off the servo.
    PlausibilityDrift,
    /// Driver commands freeze for 30 cycles.
    StaleCommands,
    /// Three separate sensor dropouts, each after the latch has cleared.
    RepeatedFaults,
    /// E-stop pressed for 50 cycles mid-manoeuvre, driver lets go of the wheel.
    EmergencyStop,
}

impl Scenario {
    pub fn stimuli(self) -> Vec<(u64, Stimulus), 16> {
        let mut script: Vec<(u64, Stimulus), 16> = Vec::new();
        let steps: &[(u64, Stimulus)] = match self {
            Scenario::Nominal => &[
                (0, Stimulus::SetSteering { deg: 10 }),
                (0, Stimulus::SetBrake { pct: 5 }),
                (200, Stimulus::SetSteering { deg: -10 }),
                (400, Stimulus::SetSteering { deg: 0 }),
                (400, Stimulus::SetBrake { pct: 0 }),
            ],
            Scenario::SensorDropout => &[(
                10,
                Stimulus::InjectSensorFault {
                    fault: SensorFault::Dropout,
                    duration_cycles: Some(20),
                },
            )],
            Scenario::PlausibilityDrift => &[
                (
                    10,
                    Stimulus::InjectSensorFault {
                        fault: SensorFault::Offset { deg: 8 },
                        duration_cycles: None,
                    },
                ),
                (60, Stimulus::ClearSensorFault),
            ],
            Scenario::StaleCommands => &[
                (10, Stimulus::FreezeCommands { frozen: true }),
                (40, Stimulus::FreezeCommands { frozen: false }),
            ],
            Scenario::RepeatedFaults => &[
                (
                    10,
                    Stimulus::InjectSensorFault {
                        fault: SensorFault::Dropout,
                        duration_cycles: Some(2),
                    },
                ),
                (
                    100,
                    Stimulus::InjectSensorFault {
                        fault: SensorFault::Dropout,
                        duration_cycles: Some(2),
                    },
                ),
                (
                    200,
                    Stimulus::InjectSensorFault {
                        fault: SensorFault::Dropout,
                        duration_cycles: Some(2),
                    },
                ),
            ],
            Scenario::EmergencyStop => &[
                (0, Stimulus::SetSteering { deg: 15 }),
                (100, Stimulus::EmergencyStop { active: true }),
                (100, Stimulus::SetSteering { deg: 0 }),
                (150, Stimulus::EmergencyStop { active: false }),
            ],
        };
        for step in steps {
            if script.push(*step).is_err() {
                break;
            }
        }
        script
    }
}

/// Time-ordered queue of pending stimuli.
#[derive(Debug, Default)]
pub struct ScenarioScheduler {
    queue: Vec<ScheduledStimulus, MAX_SCHEDULED_STIMULI>,
    stats: SchedulerStats,
}

impl ScenarioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at_cycle: u64, stimulus: Stimulus, now: u64) -> Result<(), ScheduleError> {
        if at_cycle < now {
            return Err(ScheduleError::InPast { at: at_cycle, now });
        }
        if self.queue.is_full() {
            self.stats.total_dropped += 1;
            return Err(ScheduleError::QueueFull);
        }

        let _ = self.queue.push(ScheduledStimulus { at_cycle, stimulus });
        // Stable sort keeps same-cycle stimuli in submission order
        self.queue.sort_by_key(|s| s.at_cycle);

        self.stats.total_scheduled += 1;
        self.stats.currently_scheduled = self.queue.len() as u8;
        Ok(())
    }

    /// Queue a whole scenario starting at `start_cycle`.
    pub fn load(&mut self, scenario: Scenario, start_cycle: u64) -> Result<usize, ScheduleError> {
        let script = scenario.stimuli();
        for (offset, stimulus) in &script {
            self.schedule(start_cycle + offset, *stimulus, start_cycle)?;
        }
        Ok(script.len())
    }

    /// Remove and return stimuli due at or before `now`, oldest first. Anything
    /// beyond the per-cycle limit stays queued for the next cycle.
    pub fn take_due(&mut self, now: u64) -> Vec<Stimulus, MAX_DUE_PER_CYCLE> {
        let mut due: Vec<Stimulus, MAX_DUE_PER_CYCLE> = Vec::new();
        let mut taken = 0;
        for scheduled in &self.queue {
            if scheduled.at_cycle > now || due.push(scheduled.stimulus).is_err() {
                break;
            }
            taken += 1;
        }
        for _ in 0..taken {
            self.queue.remove(0);
        }
        self.stats.total_applied += taken as u32;
        self.stats.currently_scheduled = self.queue.len() as u8;
        due
    }

    pub fn clear(&mut self) {
        self.stats.total_dropped += self.queue.len() as u32;
        self.queue.clear();
        self.stats.currently_scheduled = 0;
    }

    pub fn pending(&self) -> &[ScheduledStimulus] {
        &self.queue
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_stimuli_in_cycle_order() {
        let mut scheduler = ScenarioScheduler::new();
        scheduler.schedule(30, Stimulus::SetBrake { pct: 3 }, 0).unwrap();
        scheduler.schedule(10, Stimulus::SetBrake { pct: 1 }, 0).unwrap();
        scheduler.schedule(20, Stimulus::SetBrake { pct: 2 }, 0).unwrap();

        assert!(scheduler.take_due(9).is_empty());
        assert_eq!(scheduler.take_due(10).as_slice(), &[Stimulus::SetBrake { pct: 1 }]);
        assert_eq!(
            scheduler.take_due(35).as_slice(),
            &[Stimulus::SetBrake { pct: 2 }, Stimulus::SetBrake { pct: 3 }]
        );
        assert_eq!(scheduler.stats().total_applied, 3);
    }

    #[test]
    fn test_same_cycle_keeps_submission_order() {
        let mut scheduler = ScenarioScheduler::new();
        scheduler.schedule(5, Stimulus::EmergencyStop { active: true }, 0).unwrap();
        scheduler.schedule(5, Stimulus::EmergencyStop { active: false }, 0).unwrap();
        let due = scheduler.take_due(5);
        assert_eq!(due[0], Stimulus::EmergencyStop { active: true });
        assert_eq!(due[1], Stimulus::EmergencyStop { active: false });
    }

    #[test]
    fn test_past_cycle_rejected() {
        let mut scheduler = ScenarioScheduler::new();
        assert_eq!(
            scheduler.schedule(4, Stimulus::ClearSensorFault, 10),
            Err(ScheduleError::InPast { at: 4, now: 10 })
        );
    }

    #[test]
    fn test_queue_full() {
        let mut scheduler = ScenarioScheduler::new();
        for i in 0..MAX_SCHEDULED_STIMULI as u64 {
            scheduler.schedule(i, Stimulus::ClearSensorFault, 0).unwrap();
        }
        assert_eq!(
            scheduler.schedule(0, Stimulus::ClearSensorFault, 0),
            Err(ScheduleError::QueueFull)
        );
    }

    #[test]
    fn test_per_cycle_limit_defers_overflow() {
        let mut scheduler = ScenarioScheduler::new();
        for _ in 0..(MAX_DUE_PER_CYCLE + 2) {
            scheduler.schedule(1, Stimulus::ClearSensorFault, 0).unwrap();
        }
        assert_eq!(scheduler.take_due(1).len(), MAX_DUE_PER_CYCLE);
        assert_eq!(scheduler.take_due(1).len(), 2);
    }

    #[test]
    fn test_load_scenario_offsets() {
        let mut scheduler = ScenarioScheduler::new();
        let count = scheduler.load(Scenario::StaleCommands, 100).unwrap();
        assert_eq!(count, 2);
        assert_eq!(scheduler.pending()[0].at_cycle, 110);
        assert_eq!(scheduler.pending()[1].at_cycle, 140);
    }
}
