//! Actuator safety governor.
//!
//! One [`Governor`] owns the state of one actuator. Once per control cycle the
//! caller hands it the cycle's inputs together with the actuator hardware and
//! the ECU services; the governor runs
//!
//! feedback read -> range check -> plausibility -> rate limit -> staleness ->
//! fault latch -> output mapping -> hardware write
//!
//! and returns a [`CycleReport`]. Diagnostic events and the motor-cutoff
//! broadcast are emitted as side effects of latch transitions.

pub mod latch;
pub mod monitors;
pub mod output;

use crate::config::{
    ConfigError, EscalationAction, FailSafePolicy, FeedbackSource, GovernorConfig, MAX_DISABLE_LEVEL,
};
use crate::cutoff::CutoffNotifier;
use crate::diagnostics::{DtcCode, EventStatus};
use crate::hal::{ActuatorHw, DisableLine, Services};
use latch::{FaultLatch, LatchState, LatchTransition};
use monitors::{PlausibilityMonitor, StalenessMonitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FaultCode {
    #[default]
    NoFault,
    OutOfRange,
    Plausibility,
    /// Never latched: the rate limiter clamps instead of failing.
    RateExceeded,
    CmdTimeout,
    SensorFail,
}

impl FaultCode {
    fn bit(self) -> u8 {
        match self {
            FaultCode::NoFault => 0,
            FaultCode::OutOfRange => 0x01,
            FaultCode::Plausibility => 0x02,
            FaultCode::RateExceeded => 0x04,
            FaultCode::CmdTimeout => 0x08,
            FaultCode::SensorFail => 0x10,
        }
    }

    const LATCHABLE: [FaultCode; 4] = [
        FaultCode::OutOfRange,
        FaultCode::Plausibility,
        FaultCode::CmdTimeout,
        FaultCode::SensorFail,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VehicleState {
    Init,
    #[default]
    Run,
    Degraded,
    Limp,
    SafeStop,
    Shutdown,
}

impl VehicleState {
    /// Vehicle states in which every actuator is held at its safe value.
    pub fn demands_safe_output(self) -> bool {
        matches!(self, VehicleState::SafeStop | VehicleState::Shutdown)
    }
}

/// Everything read from outside the governor for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleInputs {
    /// Commanded value in signal units.
    pub command: i32,
    /// Snapshot of the emergency-stop flag for this cycle.
    pub emergency_stop: bool,
    pub vehicle_state: VehicleState,
}

impl CycleInputs {
    pub fn command(command: i32) -> Self {
        Self {
            command,
            emergency_stop: false,
            vehicle_state: VehicleState::Run,
        }
    }

    pub fn with_emergency_stop(mut self, active: bool) -> Self {
        self.emergency_stop = active;
        self
    }

    pub fn with_vehicle_state(mut self, state: VehicleState) -> Self {
        self.vehicle_state = state;
        self
    }
}

/// Observable outputs of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Governed position in internal units.
    pub position: i32,
    /// Value written to the drive sink.
    pub duty: u16,
    pub fault: FaultCode,
    pub disable_level: u8,
    pub latch: LatchState,
    pub transition: LatchTransition,
    /// Motor-cutoff signal: sequence running or fault present.
    pub cutoff_active: bool,
    /// E-stop or vehicle state forced the safe value this cycle.
    pub override_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GovernorError {
    #[error("governor is not initialised")]
    Uninitialized,
}

/// Mutable state of one governor instance.
#[derive(Debug, Clone)]
pub struct GovernorState {
    position: i32,
    plausibility: PlausibilityMonitor,
    staleness: StalenessMonitor,
    latch: FaultLatch,
    timeout_active: bool,
    lines: [bool; 2],
    episode_faults: u8,
    cutoff: Option<CutoffNotifier>,
}

impl GovernorState {
    fn new(config: &GovernorConfig) -> Self {
        let cutoff = match config.escalation {
            EscalationAction::CutoffBroadcast { repeat_count } => Some(CutoffNotifier::new(repeat_count)),
            EscalationAction::DisableLines => None,
        };
        Self {
            position: config.initial_position,
            plausibility: PlausibilityMonitor::default(),
            staleness: StalenessMonitor::default(),
            latch: FaultLatch::new(config.latch_clear_cycles),
            timeout_active: false,
            lines: [false; 2],
            episode_faults: 0,
            cutoff,
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn last_command(&self) -> Option<i32> {
        self.staleness.last_command()
    }

    pub fn plaus_debounce_count(&self) -> u16 {
        self.plausibility.count()
    }

    pub fn stale_count(&self) -> u16 {
        self.staleness.count()
    }

    /// Fault code as reported: the latched fault, otherwise a non-latching
    /// command timeout, otherwise `NoFault`.
    pub fn fault(&self) -> FaultCode {
        if self.latch.is_engaged() {
            self.latch.fault()
        } else if self.timeout_active {
            FaultCode::CmdTimeout
        } else {
            FaultCode::NoFault
        }
    }

    pub fn disable_level(&self) -> u8 {
        self.latch.disable_level()
    }

    pub fn latch_clear_count(&self) -> u16 {
        self.latch.clear_count()
    }

    pub fn latch(&self) -> LatchState {
        self.latch.state()
    }

    pub fn cutoff_remaining(&self) -> u8 {
        self.cutoff.as_ref().map_or(0, CutoffNotifier::remaining)
    }
}

#[derive(Debug, Clone)]
struct Active {
    config: GovernorConfig,
    state: GovernorState,
}

/// Safety governor for one actuator. `Default` yields an uninitialised
/// instance whose operations fail without side effects.
#[derive(Debug, Clone, Default)]
pub struct Governor {
    active: Option<Active>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Result<Self, ConfigError> {
        Self::init(Some(config))
    }

    /// `None` leaves the governor uninitialised.
    pub fn init(config: Option<GovernorConfig>) -> Result<Self, ConfigError> {
        let mut governor = Self::default();
        governor.reinit(config)?;
        Ok(governor)
    }

    /// Discard all state, including the disable level. An invalid config
    /// leaves the governor untouched.
    pub fn reinit(&mut self, config: Option<GovernorConfig>) -> Result<(), ConfigError> {
        self.active = match config {
            Some(config) => {
                config.validate()?;
                let state = GovernorState::new(&config);
                Some(Active { config, state })
            }
            None => None,
        };
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn config(&self) -> Option<&GovernorConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    pub fn state(&self) -> Option<&GovernorState> {
        self.active.as_ref().map(|a| &a.state)
    }

    /// Current position in signal units.
    pub fn position_signal(&self) -> Result<i32, GovernorError> {
        let active = self.active.as_ref().ok_or(GovernorError::Uninitialized)?;
        Ok(active.config.to_signal(active.state.position))
    }

    /// Run one control cycle.
    pub fn update<H, S>(
        &mut self,
        inputs: &CycleInputs,
        hw: &mut H,
        services: &mut S,
    ) -> Result<CycleReport, GovernorError>
    where
        H: ActuatorHw,
        S: Services,
    {
        let active = self.active.as_mut().ok_or(GovernorError::Uninitialized)?;
        Ok(active.step(inputs, hw, services))
    }
}

impl Active {
    fn step<H: ActuatorHw, S: Services>(
        &mut self,
        inputs: &CycleInputs,
        hw: &mut H,
        services: &mut S,
    ) -> CycleReport {
        if inputs.emergency_stop || inputs.vehicle_state.demands_safe_output() {
            self.state.position = self.config.safe_value;
            return self.finish(hw, services, LatchTransition::None, true);
        }

        let config = &self.config;
        let state = &mut self.state;
        let command = config.to_internal(inputs.command);

        let feedback = match config.feedback {
            FeedbackSource::Sensor => hw.read_feedback().map(|v| config.to_internal(v)),
            FeedbackSource::LoopBack => Ok(state.staleness.last_command().unwrap_or(state.position)),
        };
        let accepted = monitors::validate_range(&config.range, command);

        let plausibility_fault = match (feedback, accepted) {
            (Ok(reference), Some(command)) => state.plausibility.check(
                command,
                reference,
                config.plausibility_threshold,
                config.plausibility_debounce_cycles,
            ),
            _ => false,
        };

        if let Some(command) = accepted {
            state.staleness.observe(command);
        }
        let stale = state.staleness.is_stale(config.cmd_timeout_cycles);

        let target = accepted.unwrap_or(state.position);
        state.position = match config.fail_safe {
            FailSafePolicy::Ramp { rate_per_cycle } if stale => {
                monitors::ramp_toward(state.position, config.safe_value, rate_per_cycle)
            }
            _ => monitors::rate_limit(state.position, target, config.safe_value, config.rate_limit),
        };

        let condition = if feedback.is_err() {
            Some(FaultCode::SensorFail)
        } else if accepted.is_none() {
            Some(FaultCode::OutOfRange)
        } else if plausibility_fault {
            Some(FaultCode::Plausibility)
        } else if stale && config.fail_safe.latches_timeout() {
            Some(FaultCode::CmdTimeout)
        } else {
            None
        };

        if !config.fail_safe.latches_timeout() {
            self.track_soft_timeout(stale, services);
        }

        let transition = self.state.latch.step(condition);
        self.handle_transition(transition, services);

        if self.state.latch.is_engaged() {
            self.state.position = self.config.safe_value;
        }
        self.finish(hw, services, transition, false)
    }

    /// Ramp-policy timeouts do not latch but are still reported on their edges.
    fn track_soft_timeout<S: Services>(&mut self, stale: bool, services: &mut S) {
        if stale == self.state.timeout_active {
            return;
        }
        self.state.timeout_active = stale;
        if stale {
            warn!("{}: command stale, returning to safe value", self.config.name);
        } else {
            debug!("{}: command stream resumed", self.config.name);
        }
        if let Some(code) = self.config.dtc.cmd_timeout {
            let status = if stale { EventStatus::Failed } else { EventStatus::Passed };
            services.report_event(code, status);
        }
    }

    fn handle_transition<S: Services>(&mut self, transition: LatchTransition, services: &mut S) {
        let name = &self.config.name;
        match transition {
            LatchTransition::None => {}
            LatchTransition::Confirmed { level, fault } => {
                warn!("{}: {:?} confirmed, disable level {}", name, fault, level);
                if level == MAX_DISABLE_LEVEL {
                    error!("{}: escalation at maximum level {}", name, level);
                }
                self.report_failed(fault, true, services);
                self.arm_cutoff();
            }
            LatchTransition::Reconfirmed { fault } => {
                warn!("{}: {:?} confirmed while latched", name, fault);
                self.report_failed(fault, false, services);
            }
            LatchTransition::Relapsed { fault } => {
                warn!("{}: {:?} returned before latch cleared", name, fault);
                self.report_failed(fault, true, services);
                self.arm_cutoff();
            }
            LatchTransition::Cleared { fault } => {
                info!("{}: latch cleared after {:?}", name, fault);
                for kind in FaultCode::LATCHABLE {
                    if self.state.episode_faults & kind.bit() != 0 {
                        if let Some(code) = self.dtc_for(kind) {
                            services.report_event(code, EventStatus::Passed);
                        }
                    }
                }
                if let Some(code) = self.config.dtc.summary {
                    services.report_event(code, EventStatus::Passed);
                }
                self.state.episode_faults = 0;
            }
        }
    }

    fn report_failed<S: Services>(&mut self, fault: FaultCode, with_summary: bool, services: &mut S) {
        self.state.episode_faults |= fault.bit();
        if let Some(code) = self.dtc_for(fault) {
            services.report_event(code, EventStatus::Failed);
        }
        if with_summary {
            if let Some(code) = self.config.dtc.summary {
                services.report_event(code, EventStatus::Failed);
            }
        }
    }

    fn arm_cutoff(&mut self) {
        if let Some(notifier) = self.state.cutoff.as_mut() {
            notifier.arm();
        }
    }

    fn dtc_for(&self, fault: FaultCode) -> Option<DtcCode> {
        let dtc = &self.config.dtc;
        match fault {
            FaultCode::OutOfRange => dtc.out_of_range,
            FaultCode::Plausibility => dtc.plausibility,
            FaultCode::CmdTimeout => dtc.cmd_timeout,
            FaultCode::SensorFail => dtc.sensor_fail,
            FaultCode::NoFault | FaultCode::RateExceeded => None,
        }
    }

    /// Escalation outputs, drive write and report assembly.
    fn finish<H: ActuatorHw, S: Services>(
        &mut self,
        hw: &mut H,
        services: &mut S,
        transition: LatchTransition,
        override_active: bool,
    ) -> CycleReport {
        let config = &self.config;
        let state = &mut self.state;

        if config.escalation == EscalationAction::DisableLines {
            let wanted = if state.latch.is_engaged() {
                output::disable_lines_for_level(state.latch.active_level())
            } else {
                [false, false]
            };
            for (i, line) in [DisableLine::Primary, DisableLine::Secondary].into_iter().enumerate() {
                if wanted[i] != state.lines[i] {
                    hw.write_disable_line(line, wanted[i]);
                    state.lines[i] = wanted[i];
                }
            }
        }

        let duty = output::map_to_drive(state.position, &config.range, &config.output);
        hw.write_duty(duty);

        let mut sending = false;
        if let Some(notifier) = state.cutoff.as_mut() {
            sending = notifier.is_sending();
            if let Err(e) = notifier.tick(services) {
                warn!("{}: motor cutoff broadcast failed: {}", config.name, e);
            }
        }

        let fault = state.fault();
        CycleReport {
            position: state.position,
            duty,
            fault,
            disable_level: state.latch.disable_level(),
            latch: state.latch.state(),
            transition,
            cutoff_active: state.cutoff.is_some() && (sending || fault != FaultCode::NoFault),
            override_active,
        }
    }
}
