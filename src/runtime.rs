//! Simulation runtime around one front-zone controller.
//!
//! `ZoneRuntime` plays the part of everything outside the governors: the
//! driver producing commands, the steering servo, the ECU's diagnostic store
//! and message bus, fault injection and scripted scenarios. Each call to
//! [`ZoneRuntime::tick`] is one 10 ms control cycle.

use crate::config::{ConfigError, ZoneConfig};
use crate::diagnostics::DtcEntry;
use crate::ecu::{Actuator, EStopFlag, FrontZoneController, ZoneCommands, ZoneReport};
use crate::fault_injection::{FaultInjectionStats, FaultInjector};
use crate::hal::{ServoPlant, SimHardware, SimServices};
use crate::protocol::{Command, CommandResponse, CommandType, ProtocolHandler, ResponseStatus};
use crate::scenario::{ScenarioScheduler, ScheduleError, SchedulerStats, Stimulus};
use crate::telemetry::{TelemetryBuilder, TelemetryContext, TelemetryFrame};
use heapless::{spsc::Queue, HistoryBuffer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const MAX_COMMAND_QUEUE_SIZE: usize = 16;
const MAX_PENDING_RESPONSES: usize = 16;
// Servo slew of the simulated steering plant, 30 deg/s at 100 Hz
const PLANT_SLEW_PER_CYCLE: i32 = 3;
// Driver moves the steering command one degree every this many cycles
const DRIVER_STEER_INTERVAL_CYCLES: u32 = 4;

type CommandQueue = Queue<Command, MAX_COMMAND_QUEUE_SIZE>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("command queue full")]
    CommandQueueFull,
}

/// Driver model.
///
/// Steering follows the operator's target at one degree per
/// `DRIVER_STEER_INTERVAL_CYCLES`, slower than the governor's rate limit, so
/// feedback keeps up with the command. Every other cycle the least
/// significant unit is toggled toward neutral so an attentive driver never
/// looks stale. Freezing repeats the last commands verbatim.
#[derive(Debug, Clone, Default)]
pub struct DriverModel {
    steering_target: i32,
    steering: i32,
    brake: i32,
    frozen: bool,
    toggle: bool,
    steer_counter: u32,
    last: ZoneCommands,
}

impl DriverModel {
    pub fn set_steering(&mut self, deg: i32) {
        self.steering_target = deg;
    }

    pub fn set_brake(&mut self, pct: i32) {
        self.brake = pct;
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn next(&mut self) -> ZoneCommands {
        if self.frozen {
            return self.last;
        }

        self.steer_counter += 1;
        if self.steer_counter >= DRIVER_STEER_INTERVAL_CYCLES {
            self.steer_counter = 0;
            self.steering += (self.steering_target - self.steering).signum();
        }

        self.toggle = !self.toggle;
        let nudge = i32::from(self.toggle);
        self.last = ZoneCommands {
            steering_deg: toward_zero(self.steering, nudge),
            brake_pct: toward_zero(self.brake, nudge),
        };
        self.last
    }
}

fn toward_zero(value: i32, nudge: i32) -> i32 {
    if value > 0 {
        value - nudge
    } else {
        value + nudge
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub cycle: u64,
    pub last_report: Option<ZoneReport>,
    pub commands_frozen: bool,
    pub fault_injection: FaultInjectionStats,
    pub scheduler: SchedulerStats,
    pub cutoff_frames_sent: u32,
}

pub struct ZoneRuntime {
    config: ZoneConfig,
    controller: FrontZoneController,
    estop: EStopFlag,
    steering_hw: SimHardware,
    brake_hw: SimHardware,
    services: SimServices,
    injector: FaultInjector,
    scheduler: ScenarioScheduler,
    driver: DriverModel,
    telemetry: TelemetryBuilder,
    command_queue: CommandQueue,
    // Oldest unread response is overwritten when full
    responses: HistoryBuffer<CommandResponse, MAX_PENDING_RESPONSES>,
    last_report: Option<ZoneReport>,
}

impl ZoneRuntime {
    pub fn new(config: ZoneConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let controller = FrontZoneController::new(&config)?;
        let plant = ServoPlant::new(&config.steering, PLANT_SLEW_PER_CYCLE);
        Ok(Self {
            estop: controller.estop_handle(),
            controller,
            steering_hw: SimHardware::with_plant(plant),
            brake_hw: SimHardware::scripted(config.brake.initial_position),
            services: SimServices::new(),
            injector: FaultInjector::new(),
            scheduler: ScenarioScheduler::new(),
            driver: DriverModel::default(),
            telemetry: TelemetryBuilder::new(config.telemetry_every_cycles),
            command_queue: Queue::new(),
            responses: HistoryBuffer::new(),
            last_report: None,
            config,
        })
    }

    /// Run one control cycle. Returns a telemetry frame when one is due.
    pub fn tick(&mut self) -> Option<TelemetryFrame> {
        // Age running faults first so a fault injected this cycle counts it
        self.injector.update(&mut self.steering_hw);

        let now = self.controller.cycle();
        for stimulus in self.scheduler.take_due(now) {
            self.apply(stimulus);
        }

        let commands = self.driver.next();
        let report = self.controller.step(
            commands,
            &mut self.steering_hw,
            &mut self.brake_hw,
            &mut self.services,
        );
        self.steering_hw.advance();
        self.last_report = Some(report);

        if !self.telemetry.is_due(&report) {
            return None;
        }
        let context = self.telemetry_context();
        Some(self.telemetry.build(&report, context))
    }

    fn telemetry_context(&self) -> TelemetryContext {
        TelemetryContext {
            steering_scale: self.config.steering.signal_scale,
            brake_scale: self.config.brake.signal_scale,
            steering_feedback_deg: self.steering_hw.plant().map(ServoPlant::measured),
            active_dtcs: self.services.events.active_codes().collect(),
            cutoff_frames_sent: self.services.bus.cutoff_frames(),
            injected_fault: self.injector.active().copied(),
        }
    }

    /// Apply one external stimulus immediately.
    pub fn apply(&mut self, stimulus: Stimulus) {
        match stimulus {
            Stimulus::SetSteering { deg } => self.driver.set_steering(deg),
            Stimulus::SetBrake { pct } => self.driver.set_brake(pct),
            Stimulus::EmergencyStop { active } => {
                if active {
                    warn!("emergency stop asserted");
                } else {
                    info!("emergency stop released");
                }
                self.estop.set(active);
            }
            Stimulus::SetVehicleState { state } => self.controller.set_vehicle_state(state),
            Stimulus::InjectSensorFault { fault, duration_cycles } => {
                self.injector.inject(fault, duration_cycles, &mut self.steering_hw);
            }
            Stimulus::ClearSensorFault => self.injector.clear(&mut self.steering_hw),
            Stimulus::FreezeCommands { frozen } => self.driver.set_frozen(frozen),
        }
    }

    pub fn queue_command(&mut self, command: Command) -> Result<(), RuntimeError> {
        self.command_queue
            .enqueue(command)
            .map_err(|_| RuntimeError::CommandQueueFull)
    }

    /// Execute everything queued, collecting responses for `take_responses`.
    pub fn process_commands(&mut self) {
        while let Some(command) = self.command_queue.dequeue() {
            let response = self.execute_command(&command);
            self.responses.write(response);
        }
    }

    /// Drain pending responses, oldest first.
    pub fn take_responses(&mut self) -> alloc::vec::Vec<CommandResponse> {
        let pending = self.responses.oldest_ordered().cloned().collect();
        self.responses.clear();
        pending
    }

    pub fn execute_command(&mut self, command: &Command) -> CommandResponse {
        let cycle = self.controller.cycle();
        let respond = |status, message: &str| ProtocolHandler::create_response(command.id, cycle, status, Some(message));

        match &command.command_type {
            CommandType::Ping => respond(ResponseStatus::Success, "pong"),
            CommandType::Status => {
                let mut response = respond(ResponseStatus::Success, "status");
                match serde_json::to_value(self.status()) {
                    Ok(value) => response.data = Some(value),
                    Err(e) => return respond(ResponseStatus::Error, &e.to_string()),
                }
                response
            }
            CommandType::SetSteering { deg } => {
                self.apply(Stimulus::SetSteering { deg: *deg });
                respond(ResponseStatus::Success, "steering target set")
            }
            CommandType::SetBrake { pct } => {
                self.apply(Stimulus::SetBrake { pct: *pct });
                respond(ResponseStatus::Success, "brake target set")
            }
            CommandType::EmergencyStop { active } => {
                self.apply(Stimulus::EmergencyStop { active: *active });
                respond(ResponseStatus::Success, if *active { "e-stop asserted" } else { "e-stop released" })
            }
            CommandType::SetVehicleState { state } => {
                self.apply(Stimulus::SetVehicleState { state: *state });
                respond(ResponseStatus::Success, "vehicle state set")
            }
            CommandType::InjectSensorFault { fault, duration_cycles } => {
                let stimulus = Stimulus::InjectSensorFault {
                    fault: *fault,
                    duration_cycles: *duration_cycles,
                };
                // Applied at the start of the next cycle
                match self.scheduler.schedule(cycle, stimulus, cycle) {
                    Ok(()) => respond(ResponseStatus::Success, "sensor fault scheduled"),
                    Err(e) => respond(ResponseStatus::Rejected, &e.to_string()),
                }
            }
            CommandType::ClearSensorFault => {
                self.apply(Stimulus::ClearSensorFault);
                respond(ResponseStatus::Success, "sensor fault cleared")
            }
            CommandType::SetFaultInjection { enabled } => {
                self.injector.set_enabled(*enabled);
                respond(ResponseStatus::Success, "fault injection updated")
            }
            CommandType::FreezeCommands { frozen } => {
                self.apply(Stimulus::FreezeCommands { frozen: *frozen });
                respond(ResponseStatus::Success, "driver commands updated")
            }
            CommandType::RunScenario { scenario } => match self.scheduler.load(*scenario, cycle) {
                Ok(count) => {
                    info!("scenario {:?} loaded with {} stimuli", scenario, count);
                    respond(ResponseStatus::Success, &format!("{count} stimuli scheduled"))
                }
                Err(e) => respond(ResponseStatus::Rejected, &e.to_string()),
            },
            CommandType::Reinitialize { actuator } => {
                let config = match actuator {
                    Actuator::Steering => self.config.steering.clone(),
                    Actuator::Brake => self.config.brake.clone(),
                };
                match self.controller.reinit(*actuator, Some(config)) {
                    Ok(()) => respond(ResponseStatus::Success, "governor re-initialised"),
                    Err(e) => respond(ResponseStatus::Error, &e.to_string()),
                }
            }
            CommandType::GetDtcs => {
                let entries: alloc::vec::Vec<DtcEntry> = self.services.events.entries().to_vec();
                let mut response = respond(ResponseStatus::Success, "dtcs");
                match serde_json::to_value(entries) {
                    Ok(value) => response.data = Some(value),
                    Err(e) => return respond(ResponseStatus::Error, &e.to_string()),
                }
                response
            }
            CommandType::ClearDtcs => {
                self.services.events.clear();
                respond(ResponseStatus::Success, "dtcs cleared")
            }
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            cycle: self.controller.cycle(),
            last_report: self.last_report,
            commands_frozen: self.driver.is_frozen(),
            fault_injection: self.injector.stats().clone(),
            scheduler: self.scheduler.stats().clone(),
            cutoff_frames_sent: self.services.bus.cutoff_frames(),
        }
    }

    pub fn estop_handle(&self) -> EStopFlag {
        self.estop.clone()
    }

    pub fn controller(&self) -> &FrontZoneController {
        &self.controller
    }

    pub fn services(&self) -> &SimServices {
        &self.services
    }

    pub fn steering_hw(&self) -> &SimHardware {
        &self.steering_hw
    }

    pub fn injector(&self) -> &FaultInjector {
        &self.injector
    }

    pub fn last_report(&self) -> Option<&ZoneReport> {
        self.last_report.as_ref()
    }
}
