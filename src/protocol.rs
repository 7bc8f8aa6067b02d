//! JSON-lines command protocol between the simulator and its clients.

use crate::ecu::Actuator;
use crate::fault_injection::SensorFault;
use crate::governor::VehicleState;
use crate::scenario::Scenario;
use crate::telemetry::TelemetryFrame;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_COMMAND_SIZE: usize = 512;
pub const MAX_RESPONSE_SIZE: usize = 2048;
pub const MAX_TELEMETRY_SIZE: usize = 2048;

pub type CommandBuffer = ArrayString<MAX_COMMAND_SIZE>;
pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;
pub type TelemetryBuffer = ArrayString<MAX_TELEMETRY_SIZE>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    Status,
    /// Driver steering target in degrees.
    SetSteering { deg: i32 },
    /// Driver brake target in percent.
    SetBrake { pct: i32 },
    EmergencyStop { active: bool },
    SetVehicleState { state: VehicleState },
    InjectSensorFault { fault: SensorFault, duration_cycles: Option<u32> },
    ClearSensorFault,
    SetFaultInjection { enabled: bool },
    FreezeCommands { frozen: bool },
    RunScenario { scenario: Scenario },
    Reinitialize { actuator: Actuator },
    GetDtcs,
    ClearDtcs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub cycle: u64,
    pub status: ResponseStatus,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
    /// Accepted by the parser but refused in the current state.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message exceeds {0} bytes")]
    MessageTooLarge(usize),
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Parses commands and serialises responses and telemetry into fixed buffers.
#[derive(Debug)]
pub struct ProtocolHandler {
    command_counter: u32,
    command_buffer: CommandBuffer,
    response_buffer: ResponseBuffer,
    telemetry_buffer: TelemetryBuffer,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            command_counter: 0,
            command_buffer: ArrayString::new(),
            response_buffer: ArrayString::new(),
            telemetry_buffer: ArrayString::new(),
        }
    }

    pub fn parse_command(&mut self, json_str: &str) -> Result<Command, ProtocolError> {
        self.command_buffer.clear();
        self.command_buffer
            .try_push_str(json_str)
            .map_err(|_| ProtocolError::MessageTooLarge(MAX_COMMAND_SIZE))?;
        serde_json::from_str::<Command>(self.command_buffer.as_str())
            .map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    pub fn serialize_response(&mut self, response: &CommandResponse) -> Result<&str, ProtocolError> {
        Self::fill(&mut self.response_buffer, response)?;
        Ok(self.response_buffer.as_str())
    }

    pub fn serialize_telemetry(&mut self, frame: &TelemetryFrame) -> Result<&str, ProtocolError> {
        Self::fill(&mut self.telemetry_buffer, frame)?;
        Ok(self.telemetry_buffer.as_str())
    }

    fn fill<T: Serialize, const N: usize>(buffer: &mut ArrayString<N>, value: &T) -> Result<(), ProtocolError> {
        buffer.clear();
        let json = serde_json::to_string(value).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        buffer
            .try_push_str(&json)
            .map_err(|_| ProtocolError::MessageTooLarge(N))
    }

    pub fn create_response(
        id: u32,
        cycle: u64,
        status: ResponseStatus,
        message: Option<&str>,
    ) -> CommandResponse {
        CommandResponse {
            id,
            cycle,
            status,
            message: message.map(ToString::to_string),
            data: None,
        }
    }

    pub fn next_command_id(&mut self) -> u32 {
        self.command_counter = self.command_counter.wrapping_add(1);
        self.command_counter
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
