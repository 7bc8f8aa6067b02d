//! Hardware and basic-software seams of a governor.
//!
//! A governor talks to two collaborators per cycle: the actuator hardware
//! (feedback sensor, drive output, disable lines) and the shared services of
//! the ECU (diagnostic event store, message bus). Both are traits so the same
//! governor runs against real drivers, the simulator and test recorders.

use crate::cutoff::CanFrame;
use crate::diagnostics::{DtcCode, EventStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod sim;

pub use sim::{FrameLog, ServoPlant, SimHardware, SimServices};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("feedback sensor read failed")]
    ReadFailed,
    #[error("bus transmit rejected")]
    TransmitFailed,
}

/// Hardware disable lines, driven only at escalation levels 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisableLine {
    Primary,
    Secondary,
}

pub trait FeedbackSensor {
    /// Current position in signal units (degrees, percent).
    fn read_feedback(&mut self) -> Result<i32, HalError>;
}

pub trait DriveSink {
    fn write_duty(&mut self, duty: u16);
    fn write_disable_line(&mut self, line: DisableLine, asserted: bool);
}

pub trait DiagnosticSink {
    fn report_event(&mut self, code: DtcCode, status: EventStatus);
}

pub trait MessageBus {
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), HalError>;
}

/// Everything a governor needs from its own actuator.
pub trait ActuatorHw: FeedbackSensor + DriveSink {}

impl<T: FeedbackSensor + DriveSink> ActuatorHw for T {}

/// Everything a governor needs from the ECU it runs on.
pub trait Services: DiagnosticSink + MessageBus {}

impl<T: DiagnosticSink + MessageBus> Services for T {}
