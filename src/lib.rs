//! # Actuator Safety Governor
//!
//! Safety governor for the steering and brake actuators of a front-zone
//! controller, plus a cycle-accurate simulator to drive it.
//!
//! ## Features
//!
//! - **Command validation**: range check, debounced plausibility against feedback
//! - **Asymmetric rate limiting**: slow away from the safe value, instant back to it
//! - **Stale-command fail-safe**: ramp (steering) or snap-and-latch (brake)
//! - **Fault latch with sticky escalation**: neutral drive, disable lines, motor cutoff
//! - **Deterministic**: every timer counts control cycles, never wall-clock time
//! - **Embedded-friendly**: bounded memory, no allocation in the control path
//!
//! ## Quick Start
//!
//! ```rust
//! use actgov::config::GovernorConfig;
//! use actgov::governor::{CycleInputs, FaultCode, Governor};
//! use actgov::hal::{SimHardware, SimServices};
//!
//! let mut governor = Governor::new(GovernorConfig::steering()).unwrap();
//! let mut hw = SimHardware::scripted(0);
//! let mut services = SimServices::new();
//!
//! let report = governor.update(&CycleInputs::command(0), &mut hw, &mut services).unwrap();
//! assert_eq!(report.duty, 1500);
//! assert_eq!(report.fault, FaultCode::NoFault);
//! ```
//!
//! ## Architecture
//!
//! - [`governor`] - Per-actuator governor: monitors, fault latch, output mapping
//! - [`config`] - Calibration presets and JSON configuration
//! - [`hal`] - Hardware and service traits, simulated implementations
//! - [`diagnostics`] - DTC event store
//! - [`cutoff`] - Motor-cutoff broadcast
//! - [`ecu`] - Front-zone controller aggregating both governors
//! - [`runtime`] - Simulation runtime with scenarios and fault injection
//! - [`protocol`] - JSON command protocol of the simulator
//! - [`telemetry`] - Telemetry frames

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

extern crate alloc;

pub mod config;
pub mod cutoff;
pub mod diagnostics;
pub mod ecu;
pub mod fault_injection;
pub mod governor;
pub mod hal;
pub mod protocol;
pub mod runtime;
pub mod scenario;
pub mod telemetry;

// Re-export main public types for convenience
pub use config::{GovernorConfig, ZoneConfig};
pub use ecu::FrontZoneController;
pub use governor::{CycleInputs, CycleReport, FaultCode, Governor};
pub use runtime::ZoneRuntime;
