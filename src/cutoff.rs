//! Motor-cutoff broadcast.
//!
//! When the brake governor confirms a fault it tells the rear zone to cut
//! motor torque. The frame is repeated once per cycle for a configured number
//! of cycles.

use crate::hal::{HalError, MessageBus};
use arrayvec::ArrayVec;

pub const MOTOR_CUTOFF_CAN_ID: u16 = 0x211;
pub const CAN_MAX_DLC: usize = 8;
const CUTOFF_FLAG_BYTE: usize = 2;
const CUTOFF_REQUEST: u8 = 0x01;

pub type CanPayload = ArrayVec<u8, CAN_MAX_DLC>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    pub data: CanPayload,
}

impl CanFrame {
    pub fn new(id: u16, bytes: &[u8]) -> Option<Self> {
        let mut data = CanPayload::new();
        data.try_extend_from_slice(bytes).ok()?;
        Some(Self { id, data })
    }

    /// Classic CAN 8-byte motor-cutoff request.
    pub fn motor_cutoff() -> Self {
        let mut data = CanPayload::from([0u8; CAN_MAX_DLC]);
        data[CUTOFF_FLAG_BYTE] = CUTOFF_REQUEST;
        Self {
            id: MOTOR_CUTOFF_CAN_ID,
            data,
        }
    }

    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    pub fn is_cutoff_request(&self) -> bool {
        self.id == MOTOR_CUTOFF_CAN_ID && self.data.get(CUTOFF_FLAG_BYTE) == Some(&CUTOFF_REQUEST)
    }
}

/// Sends the cutoff frame for `repeat_count` consecutive cycles after being armed.
#[derive(Debug, Clone, Default)]
pub struct CutoffNotifier {
    repeat_count: u8,
    remaining: u8,
    failed_sends: u32,
}

impl CutoffNotifier {
    pub fn new(repeat_count: u8) -> Self {
        Self {
            repeat_count,
            remaining: 0,
            failed_sends: 0,
        }
    }

    /// Start (or restart) a full repeat sequence.
    pub fn arm(&mut self) {
        self.remaining = self.repeat_count;
    }

    pub fn is_sending(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    pub fn failed_sends(&self) -> u32 {
        self.failed_sends
    }

    /// Send this cycle's frame if a sequence is running. A rejected frame
    /// still counts toward the sequence; the error is handed back for logging.
    pub fn tick<B: MessageBus>(&mut self, bus: &mut B) -> Result<bool, HalError> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.remaining -= 1;
        match bus.transmit(&CanFrame::motor_cutoff()) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.failed_sends = self.failed_sends.saturating_add(1);
                Err(e)
            }
        }
    }
}
