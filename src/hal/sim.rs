//! Simulated actuator hardware and ECU services.
//!
//! Used both by the simulator runtime and by tests: every write is recorded
//! and every read can be scripted or made to fail.

use super::{DiagnosticSink, DisableLine, DriveSink, FeedbackSensor, HalError, MessageBus};
use crate::config::{GovernorConfig, OutputDomain, Range};
use crate::cutoff::CanFrame;
use crate::diagnostics::{DtcCode, EventStatus, EventStore};
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_LINE_WRITES: usize = 32;
const MAX_LOGGED_FRAMES: usize = 32;

/// First-order servo model: the physical position follows the drive signal
/// at a bounded slew rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoPlant {
    range: Range,
    output: OutputDomain,
    scale: i32,
    slew_per_cycle: i32,
    actual: i32,
}

impl ServoPlant {
    pub fn new(config: &GovernorConfig, slew_per_cycle: i32) -> Self {
        Self {
            range: config.range,
            output: config.output,
            scale: config.signal_scale,
            slew_per_cycle: slew_per_cycle.max(1),
            actual: config.initial_position,
        }
    }

    /// Physical position in internal units.
    pub fn actual(&self) -> i32 {
        self.actual
    }

    /// Physical position in signal units, rounded to nearest.
    pub fn measured(&self) -> i32 {
        let actual = i64::from(self.actual);
        let scale = i64::from(self.scale);
        let half = scale / 2;
        let rounded = if actual >= 0 {
            (actual + half) / scale
        } else {
            (actual - half) / scale
        };
        rounded as i32
    }

    /// Advance one cycle toward the position the drive signal asks for.
    pub fn advance(&mut self, duty: u16) {
        let target = i64::from(self.duty_to_position(duty));
        let actual = i64::from(self.actual);
        let slew = i64::from(self.slew_per_cycle);
        let step = (target - actual).clamp(-slew, slew);
        // Lies between two i32 values
        self.actual = self.range.clamp((actual + step) as i32);
    }

    fn duty_to_position(&self, duty: u16) -> i32 {
        let duty = i64::from(duty);
        let center = i64::from(self.output.center);
        let max = i64::from(self.output.max);
        let min = i64::from(self.output.min);

        let position = if duty >= center {
            if max == center {
                0
            } else {
                (duty - center) * i64::from(self.range.max.max(0)) / (max - center)
            }
        } else if center == min {
            0
        } else {
            (duty - center) * -i64::from(self.range.min.min(0)) / (center - min)
        };
        position.clamp(i64::from(self.range.min), i64::from(self.range.max)) as i32
    }
}

#[derive(Debug, Clone)]
enum FeedbackModel {
    Scripted(i32),
    Plant(ServoPlant),
}

/// Recording actuator hardware with injectable sensor faults.
#[derive(Debug, Clone)]
pub struct SimHardware {
    feedback: FeedbackModel,
    fail_reads: bool,
    pending_read_failures: u32,
    offset: i32,
    stuck_at: Option<i32>,
    reads: u32,
    last_duty: Option<u16>,
    duty_writes: u32,
    lines: [bool; 2],
    line_writes: Vec<(DisableLine, bool), MAX_LINE_WRITES>,
}

impl SimHardware {
    /// Hardware whose sensor reports a fixed value until changed.
    pub fn scripted(feedback: i32) -> Self {
        Self::with_model(FeedbackModel::Scripted(feedback))
    }

    /// Hardware whose sensor measures a simulated servo.
    pub fn with_plant(plant: ServoPlant) -> Self {
        Self::with_model(FeedbackModel::Plant(plant))
    }

    fn with_model(feedback: FeedbackModel) -> Self {
        Self {
            feedback,
            fail_reads: false,
            pending_read_failures: 0,
            offset: 0,
            stuck_at: None,
            reads: 0,
            last_duty: None,
            duty_writes: 0,
            lines: [false; 2],
            line_writes: Vec::new(),
        }
    }

    /// Replace the sensor value. Switches a plant-backed sensor to scripted.
    pub fn set_feedback(&mut self, value: i32) {
        self.feedback = FeedbackModel::Scripted(value);
    }

    pub fn set_read_failure(&mut self, failing: bool) {
        self.fail_reads = failing;
    }

    pub fn fail_next_reads(&mut self, count: u32) {
        self.pending_read_failures = count;
    }

    pub fn set_offset(&mut self, offset: i32) {
        self.offset = offset;
    }

    pub fn set_stuck(&mut self, stuck_at: Option<i32>) {
        self.stuck_at = stuck_at;
    }

    pub fn clear_injected_faults(&mut self) {
        self.fail_reads = false;
        self.pending_read_failures = 0;
        self.offset = 0;
        self.stuck_at = None;
    }

    /// Move the simulated servo one cycle toward the last written duty.
    pub fn advance(&mut self) {
        if let (FeedbackModel::Plant(plant), Some(duty)) = (&mut self.feedback, self.last_duty) {
            plant.advance(duty);
        }
    }

    pub fn plant(&self) -> Option<&ServoPlant> {
        match &self.feedback {
            FeedbackModel::Plant(plant) => Some(plant),
            FeedbackModel::Scripted(_) => None,
        }
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }

    pub fn last_duty(&self) -> Option<u16> {
        self.last_duty
    }

    pub fn duty_writes(&self) -> u32 {
        self.duty_writes
    }

    pub fn line_asserted(&self, line: DisableLine) -> bool {
        self.lines[line_index(line)]
    }

    pub fn line_writes(&self) -> &[(DisableLine, bool)] {
        &self.line_writes
    }
}

fn line_index(line: DisableLine) -> usize {
    match line {
        DisableLine::Primary => 0,
        DisableLine::Secondary => 1,
    }
}

impl FeedbackSensor for SimHardware {
    fn read_feedback(&mut self) -> Result<i32, HalError> {
        self.reads = self.reads.saturating_add(1);
        if self.pending_read_failures > 0 {
            self.pending_read_failures -= 1;
            return Err(HalError::ReadFailed);
        }
        if self.fail_reads {
            return Err(HalError::ReadFailed);
        }
        let raw = self.stuck_at.unwrap_or(match &self.feedback {
            FeedbackModel::Scripted(value) => *value,
            FeedbackModel::Plant(plant) => plant.measured(),
        });
        Ok(raw.saturating_add(self.offset))
    }
}

impl DriveSink for SimHardware {
    fn write_duty(&mut self, duty: u16) {
        self.last_duty = Some(duty);
        self.duty_writes = self.duty_writes.saturating_add(1);
    }

    fn write_disable_line(&mut self, line: DisableLine, asserted: bool) {
        self.lines[line_index(line)] = asserted;
        if self.line_writes.is_full() {
            self.line_writes.remove(0);
        }
        let _ = self.line_writes.push((line, asserted));
    }
}

/// Message bus recorder with an injectable transmit failure.
#[derive(Debug, Default)]
pub struct FrameLog {
    frames: Vec<CanFrame, MAX_LOGGED_FRAMES>,
    total: u32,
    cutoff_frames: u32,
    reject: bool,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&mut self, reject: bool) {
        self.reject = reject;
    }

    pub fn frames(&self) -> &[CanFrame] {
        &self.frames
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn cutoff_frames(&self) -> u32 {
        self.cutoff_frames
    }
}

impl MessageBus for FrameLog {
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), HalError> {
        if self.reject {
            return Err(HalError::TransmitFailed);
        }
        if self.frames.is_full() {
            self.frames.remove(0);
        }
        let _ = self.frames.push(frame.clone());
        self.total = self.total.saturating_add(1);
        if frame.is_cutoff_request() {
            self.cutoff_frames = self.cutoff_frames.saturating_add(1);
        }
        Ok(())
    }
}

/// Event store plus message bus, the services one ECU offers its governors.
#[derive(Debug, Default)]
pub struct SimServices {
    pub events: EventStore,
    pub bus: FrameLog,
}

impl SimServices {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticSink for SimServices {
    fn report_event(&mut self, code: DtcCode, status: EventStatus) {
        self.events.record(code, status);
    }
}

impl MessageBus for SimServices {
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), HalError> {
        self.bus.transmit(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plant_tracks_drive_at_slew_rate() {
        let config = GovernorConfig::steering();
        let mut plant = ServoPlant::new(&config, 3);
        // 1600 us is +9 degrees
        for _ in 0..10 {
            plant.advance(1600);
        }
        assert_eq!(plant.actual(), 30);
        for _ in 0..100 {
            plant.advance(1600);
        }
        assert_eq!(plant.actual(), 90);
        assert_eq!(plant.measured(), 9);
    }

    #[test]
    fn test_plant_handles_full_i32_range() {
        let mut config = GovernorConfig::steering();
        config.range = Range {
            min: -2_000_000_000,
            max: 2_000_000_000,
        };
        config.signal_scale = 1;
        let mut plant = ServoPlant::new(&config, i32::MAX);
        plant.advance(2000);
        assert_eq!(plant.actual(), 2_000_000_000);
        plant.advance(1000);
        assert_eq!(plant.actual(), -147_483_647);
        assert_eq!(plant.measured(), -147_483_647);
    }

    #[test]
    fn test_plant_negative_mapping() {
        let config = GovernorConfig::steering();
        let mut plant = ServoPlant::new(&config, 1000);
        plant.advance(1000);
        assert_eq!(plant.actual(), -450);
        assert_eq!(plant.measured(), -45);
    }

    #[test]
    fn test_one_shot_read_failures() {
        let mut hw = SimHardware::scripted(12);
        hw.fail_next_reads(2);
        assert_eq!(hw.read_feedback(), Err(HalError::ReadFailed));
        assert_eq!(hw.read_feedback(), Err(HalError::ReadFailed));
        assert_eq!(hw.read_feedback(), Ok(12));
        assert_eq!(hw.reads(), 3);
    }

    #[test]
    fn test_offset_and_stuck_sensor() {
        let mut hw = SimHardware::scripted(10);
        hw.set_offset(-3);
        assert_eq!(hw.read_feedback(), Ok(7));
        hw.set_stuck(Some(0));
        assert_eq!(hw.read_feedback(), Ok(-3));
        hw.clear_injected_faults();
        assert_eq!(hw.read_feedback(), Ok(10));
    }

    #[test]
    fn test_line_writes_recorded() {
        let mut hw = SimHardware::scripted(0);
        hw.write_disable_line(DisableLine::Primary, true);
        assert!(hw.line_asserted(DisableLine::Primary));
        assert!(!hw.line_asserted(DisableLine::Secondary));
        assert_eq!(hw.line_writes(), &[(DisableLine::Primary, true)]);
    }
}
