use actgov::config::ZoneConfig;
use actgov::diagnostics::DtcCode;
use actgov::ecu::{Actuator, SafetyStatus, FAULT_BIT_BRAKE, FAULT_BIT_STEERING};
use actgov::fault_injection::SensorFault;
use actgov::governor::FaultCode;
use actgov::hal::DisableLine;
use actgov::protocol::{Command, CommandType, ProtocolHandler, ResponseStatus};
use actgov::runtime::{RuntimeError, ZoneRuntime};
use actgov::scenario::Scenario;

fn runtime() -> ZoneRuntime {
    ZoneRuntime::new(ZoneConfig::default()).unwrap()
}

fn run(runtime: &mut ZoneRuntime, cycles: u32) {
    for _ in 0..cycles {
        runtime.tick();
    }
}

fn execute(runtime: &mut ZoneRuntime, command_type: CommandType) -> actgov::protocol::CommandResponse {
    runtime.execute_command(&Command { id: 42, command_type })
}

fn start(runtime: &mut ZoneRuntime, scenario: Scenario) {
    let response = execute(runtime, CommandType::RunScenario { scenario });
    assert_eq!(response.status, ResponseStatus::Success);
}

#[test]
fn test_runtime_rejects_invalid_config() {
    let mut config = ZoneConfig::default();
    config.brake.latch_clear_cycles = 0;
    assert!(matches!(ZoneRuntime::new(config), Err(RuntimeError::Config(_))));
}

#[test]
fn test_idle_zone_stays_healthy() {
    let mut runtime = runtime();
    run(&mut runtime, 500);
    let report = runtime.last_report().unwrap();
    assert_eq!(report.cycle, 500);
    assert_eq!(report.fault_mask, 0);
    assert_eq!(report.safety, SafetyStatus::Ok);
}

#[test]
fn test_telemetry_decimated_to_every_tenth_cycle() {
    let mut runtime = runtime();
    for _ in 0..9 {
        assert!(runtime.tick().is_none());
    }
    let frame = runtime.tick().expect("frame on tenth cycle");
    assert_eq!(frame.sequence, 1);
    assert_eq!(frame.cycle, 10);
    assert_eq!(frame.steering.unwrap().duty, 1500);
    assert!(frame.active_dtcs.is_empty());
    assert!(frame.injected_fault.is_none());
}

#[test]
fn test_nominal_scenario_tracks_driver_without_faults() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::Nominal);
    run(&mut runtime, 150);

    let report = *runtime.last_report().unwrap();
    assert_eq!(report.fault_mask, 0);
    let steering_deg = runtime
        .controller()
        .governor(Actuator::Steering)
        .position_signal()
        .unwrap();
    assert!((9..=10).contains(&steering_deg), "steering at {steering_deg}");
    assert!(runtime.services().events.history().next().is_none());
}

#[test]
fn test_sensor_dropout_latches_then_clears() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::SensorDropout);

    run(&mut runtime, 10);
    assert_eq!(runtime.last_report().unwrap().fault_mask, 0);

    // Fault telemetry is sent immediately on the mask change
    let frame = runtime.tick().expect("frame on fault");
    assert_eq!(frame.steering.unwrap().fault, FaultCode::SensorFail);
    assert_eq!(frame.fault_mask, FAULT_BIT_STEERING);
    assert_eq!(frame.active_dtcs, vec![DtcCode::STEER_SENSOR]);
    assert!(frame.injected_fault.is_some());

    // Twenty cycles of dropout, then fifty clean cycles to open the latch
    run(&mut runtime, 68);
    assert_eq!(runtime.last_report().unwrap().steering.unwrap().fault, FaultCode::SensorFail);
    run(&mut runtime, 1);
    let report = runtime.last_report().unwrap();
    assert_eq!(report.steering.unwrap().fault, FaultCode::NoFault);
    assert_eq!(report.steering.unwrap().disable_level, 1);
    assert!(runtime.injector().active().is_none());

    let entry = runtime.services().events.entry(DtcCode::STEER_SENSOR).unwrap();
    assert!(entry.confirmed);
    assert!(!entry.test_failed);
}

#[test]
fn test_plausibility_drift_confirms_after_debounce() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::PlausibilityDrift);

    run(&mut runtime, 14);
    assert_eq!(runtime.last_report().unwrap().steering.unwrap().fault, FaultCode::NoFault);
    run(&mut runtime, 1);
    assert_eq!(runtime.last_report().unwrap().steering.unwrap().fault, FaultCode::Plausibility);
    assert!(runtime.services().events.is_failed(DtcCode::STEER_PLAUSIBILITY));

    run(&mut runtime, 150);
    assert_eq!(runtime.last_report().unwrap().fault_mask, 0);
}

#[test]
fn test_frozen_commands_trip_brake_cutoff() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::StaleCommands);

    run(&mut runtime, 30);
    let report = *runtime.last_report().unwrap();
    assert_eq!(report.brake.unwrap().fault, FaultCode::CmdTimeout);
    assert_eq!(report.brake.unwrap().duty, 100);
    assert_eq!(report.steering.unwrap().fault, FaultCode::CmdTimeout);
    assert_eq!(report.fault_mask, FAULT_BIT_STEERING | FAULT_BIT_BRAKE);
    assert!(runtime.services().events.is_failed(DtcCode::BRAKE_FAULT));

    run(&mut runtime, 100);
    let report = runtime.last_report().unwrap();
    assert_eq!(report.fault_mask, 0);
    assert_eq!(runtime.services().bus.cutoff_frames(), 10);
    assert_eq!(runtime.status().cutoff_frames_sent, 10);
}

#[test]
fn test_repeated_faults_escalate_to_both_lines() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::RepeatedFaults);

    run(&mut runtime, 205);
    let report = runtime.last_report().unwrap();
    assert_eq!(report.steering.unwrap().disable_level, 3);
    assert_eq!(report.steering.unwrap().fault, FaultCode::SensorFail);
    assert!(runtime.steering_hw().line_asserted(DisableLine::Primary));
    assert!(runtime.steering_hw().line_asserted(DisableLine::Secondary));
    assert_eq!(
        runtime
            .services()
            .events
            .entry(DtcCode::STEER_SENSOR)
            .unwrap()
            .occurrences,
        3
    );
}

#[test]
fn test_emergency_stop_scenario_recovers_cleanly() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::EmergencyStop);

    run(&mut runtime, 120);
    let report = *runtime.last_report().unwrap();
    assert!(report.emergency_stop);
    assert_eq!(report.steering.unwrap().duty, 1500);
    assert_eq!(report.brake.unwrap().duty, 100);
    assert_eq!(report.fault_mask, 0);

    run(&mut runtime, 100);
    let report = runtime.last_report().unwrap();
    assert!(!report.emergency_stop);
    assert_eq!(report.fault_mask, 0);
}

#[test]
fn test_ping_and_status_commands() {
    let mut runtime = runtime();
    run(&mut runtime, 3);

    let response = execute(&mut runtime, CommandType::Ping);
    assert_eq!(response.id, 42);
    assert_eq!(response.cycle, 3);
    assert_eq!(response.status, ResponseStatus::Success);

    let response = execute(&mut runtime, CommandType::Status);
    let data = response.data.expect("status payload");
    assert_eq!(data["cycle"], 3);
    assert_eq!(data["commands_frozen"], false);
}

#[test]
fn test_brake_command_reaches_actuator() {
    let mut runtime = runtime();
    execute(&mut runtime, CommandType::SetBrake { pct: 30 });
    run(&mut runtime, 20);
    let report = runtime.last_report().unwrap();
    assert!((29..=30).contains(&report.brake.unwrap().duty));
    assert_eq!(report.brake.unwrap().fault, FaultCode::NoFault);
}

#[test]
fn test_injected_fault_applies_next_cycle() {
    let mut runtime = runtime();
    run(&mut runtime, 5);
    let response = execute(
        &mut runtime,
        CommandType::InjectSensorFault {
            fault: SensorFault::Dropout,
            duration_cycles: Some(1),
        },
    );
    assert_eq!(response.status, ResponseStatus::Success);

    run(&mut runtime, 1);
    assert_eq!(runtime.last_report().unwrap().steering.unwrap().fault, FaultCode::SensorFail);
    run(&mut runtime, 1);
    assert!(runtime.injector().active().is_none());
    assert_eq!(runtime.injector().stats().dropouts, 1);
}

#[test]
fn test_dtc_commands_list_and_clear() {
    let mut runtime = runtime();
    execute(
        &mut runtime,
        CommandType::InjectSensorFault {
            fault: SensorFault::Dropout,
            duration_cycles: Some(2),
        },
    );
    run(&mut runtime, 3);

    let response = execute(&mut runtime, CommandType::GetDtcs);
    let data = response.data.expect("dtc payload");
    let entries = data.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["code"], DtcCode::STEER_SENSOR.0);
    assert_eq!(entries[0]["test_failed"], true);

    execute(&mut runtime, CommandType::ClearDtcs);
    assert!(runtime.services().events.entries().is_empty());
}

#[test]
fn test_reinitialize_command_resets_escalation() {
    let mut runtime = runtime();
    start(&mut runtime, Scenario::SensorDropout);
    run(&mut runtime, 12);
    let governor = runtime.controller().governor(Actuator::Steering);
    assert_eq!(governor.state().unwrap().disable_level(), 1);

    let response = execute(
        &mut runtime,
        CommandType::Reinitialize {
            actuator: Actuator::Steering,
        },
    );
    assert_eq!(response.status, ResponseStatus::Success);
    let governor = runtime.controller().governor(Actuator::Steering);
    assert_eq!(governor.state().unwrap().disable_level(), 0);
}

#[test]
fn test_queued_commands_answer_in_order() {
    let mut runtime = runtime();
    for id in 1..=3 {
        runtime
            .queue_command(Command {
                id,
                command_type: CommandType::Ping,
            })
            .unwrap();
    }
    runtime.process_commands();
    let ids: Vec<u32> = runtime.take_responses().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(runtime.take_responses().is_empty());
}

#[test]
fn test_unread_responses_keep_the_newest() {
    let mut runtime = runtime();
    for batch in 0..2 {
        for id in batch * 10..(batch + 1) * 10 {
            runtime
                .queue_command(Command {
                    id,
                    command_type: CommandType::Ping,
                })
                .unwrap();
        }
        runtime.process_commands();
    }
    let ids: Vec<u32> = runtime.take_responses().iter().map(|r| r.id).collect();
    assert_eq!(ids, (4..20).collect::<Vec<u32>>());
}

#[test]
fn test_command_queue_overflow() {
    let mut runtime = runtime();
    let mut result = Ok(());
    for id in 0..64 {
        result = runtime.queue_command(Command {
            id,
            command_type: CommandType::Ping,
        });
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(RuntimeError::CommandQueueFull)));
}

#[test]
fn test_json_command_end_to_end() {
    let mut runtime = runtime();
    let mut handler = ProtocolHandler::new();
    let command = handler
        .parse_command(r#"{"id":9,"command_type":{"EmergencyStop":{"active":true}}}"#)
        .unwrap();
    let response = runtime.execute_command(&command);
    assert_eq!(response.status, ResponseStatus::Success);

    runtime.tick();
    assert!(runtime.last_report().unwrap().emergency_stop);
    assert!(runtime.estop_handle().snapshot());

    let json = handler.serialize_response(&response).unwrap();
    assert!(json.contains("\"id\":9"));
}
