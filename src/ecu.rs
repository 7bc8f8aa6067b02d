//! Front-zone controller: one steering and one brake governor driven from the
//! same 10 ms cycle, sharing one e-stop snapshot and one set of ECU services.

use crate::config::{ConfigError, GovernorConfig, ZoneConfig};
use crate::governor::{CycleInputs, CycleReport, FaultCode, Governor, GovernorError, VehicleState};
use crate::hal::{ActuatorHw, Services};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const FAULT_BIT_STEERING: u8 = 0x01;
pub const FAULT_BIT_BRAKE: u8 = 0x02;
const ACTUATOR_FAULT_BITS: u8 = FAULT_BIT_STEERING | FAULT_BIT_BRAKE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actuator {
    Steering,
    Brake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyStatus {
    Ok,
    /// Only non-actuator monitors are faulted.
    Degraded,
    Fault,
}

impl SafetyStatus {
    pub fn from_fault_mask(mask: u8) -> Self {
        if mask & ACTUATOR_FAULT_BITS != 0 {
            SafetyStatus::Fault
        } else if mask != 0 {
            SafetyStatus::Degraded
        } else {
            SafetyStatus::Ok
        }
    }
}

/// Emergency-stop flag. Any thread may set it; the control cycle only takes
/// a snapshot at the start of each cycle.
#[derive(Debug, Clone, Default)]
pub struct EStopFlag(Arc<AtomicBool>);

impl EStopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }

    pub fn snapshot(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Commands for one cycle, in signal units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneCommands {
    pub steering_deg: i32,
    pub brake_pct: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneReport {
    pub cycle: u64,
    /// `None` when the governor could not run this cycle.
    pub steering: Option<CycleReport>,
    pub brake: Option<CycleReport>,
    pub fault_mask: u8,
    pub safety: SafetyStatus,
    pub vehicle_state: VehicleState,
    pub emergency_stop: bool,
}

#[derive(Debug)]
pub struct FrontZoneController {
    steering: Governor,
    brake: Governor,
    estop: EStopFlag,
    vehicle_state: VehicleState,
    external_faults: u8,
    unavailable: u8,
    cycle: u64,
}

impl FrontZoneController {
    pub fn new(config: &ZoneConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            steering: Governor::new(config.steering.clone())?,
            brake: Governor::new(config.brake.clone())?,
            estop: EStopFlag::new(),
            vehicle_state: VehicleState::Run,
            external_faults: 0,
            unavailable: 0,
            cycle: 0,
        })
    }

    /// Handle for whoever raises the emergency stop.
    pub fn estop_handle(&self) -> EStopFlag {
        self.estop.clone()
    }

    pub fn set_vehicle_state(&mut self, state: VehicleState) {
        if state != self.vehicle_state {
            info!("vehicle state {:?} -> {:?}", self.vehicle_state, state);
            self.vehicle_state = state;
        }
    }

    pub fn vehicle_state(&self) -> VehicleState {
        self.vehicle_state
    }

    /// Raise or drop a fault bit owned by another front-zone monitor.
    pub fn set_external_fault(&mut self, bit: u8, active: bool) {
        let bit = bit & !ACTUATOR_FAULT_BITS;
        if active {
            self.external_faults |= bit;
        } else {
            self.external_faults &= !bit;
        }
    }

    pub fn governor(&self, actuator: Actuator) -> &Governor {
        match actuator {
            Actuator::Steering => &self.steering,
            Actuator::Brake => &self.brake,
        }
    }

    /// Re-initialise one governor, resetting its escalation level.
    pub fn reinit(&mut self, actuator: Actuator, config: Option<GovernorConfig>) -> Result<(), ConfigError> {
        warn!("re-initialising {:?} governor", actuator);
        match actuator {
            Actuator::Steering => self.steering.reinit(config),
            Actuator::Brake => self.brake.reinit(config),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Run both governors for one cycle.
    ///
    /// Both governors are stepped every cycle. One that fails is reported as
    /// `None` and sets its fault bit; the other still drives its actuator.
    pub fn step<HS, HB, S>(
        &mut self,
        commands: ZoneCommands,
        steering_hw: &mut HS,
        brake_hw: &mut HB,
        services: &mut S,
    ) -> ZoneReport
    where
        HS: ActuatorHw,
        HB: ActuatorHw,
        S: Services,
    {
        let emergency_stop = self.estop.snapshot();
        let vehicle_state = self.vehicle_state;
        let inputs = |command| {
            CycleInputs::command(command)
                .with_emergency_stop(emergency_stop)
                .with_vehicle_state(vehicle_state)
        };

        let steering = self
            .steering
            .update(&inputs(commands.steering_deg), steering_hw, services);
        let brake = self.brake.update(&inputs(commands.brake_pct), brake_hw, services);
        self.track_availability(Actuator::Steering, FAULT_BIT_STEERING, &steering);
        self.track_availability(Actuator::Brake, FAULT_BIT_BRAKE, &brake);

        let fault_mask = self.external_faults
            | fault_bit(&steering, FAULT_BIT_STEERING)
            | fault_bit(&brake, FAULT_BIT_BRAKE);

        self.cycle = self.cycle.wrapping_add(1);
        ZoneReport {
            cycle: self.cycle,
            steering: steering.ok(),
            brake: brake.ok(),
            fault_mask,
            safety: SafetyStatus::from_fault_mask(fault_mask),
            vehicle_state,
            emergency_stop,
        }
    }

    /// Log when a governor stops or resumes running.
    fn track_availability(&mut self, actuator: Actuator, bit: u8, result: &Result<CycleReport, GovernorError>) {
        let was_unavailable = self.unavailable & bit != 0;
        match result {
            Err(e) if !was_unavailable => {
                error!("{:?} governor not running: {}", actuator, e);
                self.unavailable |= bit;
            }
            Ok(_) if was_unavailable => {
                info!("{:?} governor running again", actuator);
                self.unavailable &= !bit;
            }
            _ => {}
        }
    }
}

fn fault_bit(result: &Result<CycleReport, GovernorError>, bit: u8) -> u8 {
    match result {
        Ok(report) if report.fault == FaultCode::NoFault => 0,
        _ => bit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_status_from_mask() {
        assert_eq!(SafetyStatus::from_fault_mask(0), SafetyStatus::Ok);
        assert_eq!(SafetyStatus::from_fault_mask(0x04), SafetyStatus::Degraded);
        assert_eq!(SafetyStatus::from_fault_mask(0x05), SafetyStatus::Fault);
        assert_eq!(SafetyStatus::from_fault_mask(FAULT_BIT_BRAKE), SafetyStatus::Fault);
    }

    #[test]
    fn test_estop_flag_shared_between_clones() {
        let flag = EStopFlag::new();
        let handle = flag.clone();
        handle.set(true);
        assert!(flag.snapshot());
        handle.set(false);
        assert!(!flag.snapshot());
    }

    #[test]
    fn test_external_fault_cannot_mask_actuator_bits() {
        let mut controller = FrontZoneController::new(&ZoneConfig::default()).unwrap();
        controller.set_external_fault(0xFF, true);
        assert_eq!(controller.external_faults, 0xFC);
        controller.set_external_fault(0x04, false);
        assert_eq!(controller.external_faults, 0xF8);
    }
}
