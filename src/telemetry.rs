//! Decimated telemetry frames built from zone reports.

use crate::diagnostics::DtcCode;
use crate::ecu::{SafetyStatus, ZoneReport};
use crate::fault_injection::ActiveSensorFault;
use crate::governor::latch::LatchState;
use crate::governor::{CycleReport, FaultCode, VehicleState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorTelemetry {
    /// Governed position in signal units.
    pub position: i32,
    pub duty: u16,
    pub fault: FaultCode,
    pub disable_level: u8,
    pub latch: LatchState,
    pub cutoff_active: bool,
    pub override_active: bool,
}

impl ActuatorTelemetry {
    pub fn from_report(report: &CycleReport, signal_scale: i32) -> Self {
        Self {
            position: report.position / signal_scale.max(1),
            duty: report.duty,
            fault: report.fault,
            disable_level: report.disable_level,
            latch: report.latch,
            cutoff_active: report.cutoff_active,
            override_active: report.override_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub sequence: u32,
    pub cycle: u64,
    /// `None` while the governor is not running.
    pub steering: Option<ActuatorTelemetry>,
    pub brake: Option<ActuatorTelemetry>,
    /// Last steering sensor reading, `None` if the plant is not simulated.
    pub steering_feedback_deg: Option<i32>,
    pub fault_mask: u8,
    pub safety: SafetyStatus,
    pub vehicle_state: VehicleState,
    pub emergency_stop: bool,
    pub active_dtcs: Vec<DtcCode>,
    pub cutoff_frames_sent: u32,
    pub injected_fault: Option<ActiveSensorFault>,
}

/// Side information gathered by the runtime for a frame.
#[derive(Debug, Clone, Default)]
pub struct TelemetryContext {
    pub steering_scale: i32,
    pub brake_scale: i32,
    pub steering_feedback_deg: Option<i32>,
    pub active_dtcs: Vec<DtcCode>,
    pub cutoff_frames_sent: u32,
    pub injected_fault: Option<ActiveSensorFault>,
}

/// Emits one frame every `every_cycles` cycles, plus an extra frame on any
/// change of the zone fault mask.
#[derive(Debug)]
pub struct TelemetryBuilder {
    every_cycles: u32,
    since_last: u32,
    sequence: u32,
    last_fault_mask: u8,
}

impl TelemetryBuilder {
    pub fn new(every_cycles: u32) -> Self {
        Self {
            every_cycles: every_cycles.max(1),
            since_last: 0,
            sequence: 0,
            last_fault_mask: 0,
        }
    }

    pub fn is_due(&mut self, report: &ZoneReport) -> bool {
        self.since_last += 1;
        let mask_changed = report.fault_mask != self.last_fault_mask;
        self.last_fault_mask = report.fault_mask;
        if self.since_last >= self.every_cycles || mask_changed {
            self.since_last = 0;
            true
        } else {
            false
        }
    }

    pub fn build(&mut self, report: &ZoneReport, context: TelemetryContext) -> TelemetryFrame {
        self.sequence = self.sequence.wrapping_add(1);
        TelemetryFrame {
            sequence: self.sequence,
            cycle: report.cycle,
            steering: report
                .steering
                .map(|r| ActuatorTelemetry::from_report(&r, context.steering_scale)),
            brake: report
                .brake
                .map(|r| ActuatorTelemetry::from_report(&r, context.brake_scale)),
            steering_feedback_deg: context.steering_feedback_deg,
            fault_mask: report.fault_mask,
            safety: report.safety,
            vehicle_state: report.vehicle_state,
            emergency_stop: report.emergency_stop,
            active_dtcs: context.active_dtcs,
            cutoff_frames_sent: context.cutoff_frames_sent,
            injected_fault: context.injected_fault,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}
