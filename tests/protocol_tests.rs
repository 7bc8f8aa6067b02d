use actgov::config::ZoneConfig;
use actgov::ecu::Actuator;
use actgov::fault_injection::SensorFault;
use actgov::governor::VehicleState;
use actgov::protocol::*;
use actgov::runtime::ZoneRuntime;
use actgov::scenario::Scenario;

#[test]
fn test_parse_every_command_shape() {
    let mut handler = ProtocolHandler::new();
    let cases = [
        (r#"{"id":1,"command_type":"Status"}"#, CommandType::Status),
        (
            r#"{"id":2,"command_type":{"SetBrake":{"pct":35}}}"#,
            CommandType::SetBrake { pct: 35 },
        ),
        (
            r#"{"id":3,"command_type":{"SetVehicleState":{"state":"SafeStop"}}}"#,
            CommandType::SetVehicleState {
                state: VehicleState::SafeStop,
            },
        ),
        (
            r#"{"id":4,"command_type":{"InjectSensorFault":{"fault":{"Offset":{"deg":-3}},"duration_cycles":null}}}"#,
            CommandType::InjectSensorFault {
                fault: SensorFault::Offset { deg: -3 },
                duration_cycles: None,
            },
        ),
        (
            r#"{"id":5,"command_type":{"InjectSensorFault":{"fault":"Stuck","duration_cycles":40}}}"#,
            CommandType::InjectSensorFault {
                fault: SensorFault::Stuck,
                duration_cycles: Some(40),
            },
        ),
        (
            r#"{"id":6,"command_type":{"RunScenario":{"scenario":"RepeatedFaults"}}}"#,
            CommandType::RunScenario {
                scenario: Scenario::RepeatedFaults,
            },
        ),
        (
            r#"{"id":7,"command_type":{"Reinitialize":{"actuator":"Brake"}}}"#,
            CommandType::Reinitialize {
                actuator: Actuator::Brake,
            },
        ),
        (r#"{"id":8,"command_type":"ClearDtcs"}"#, CommandType::ClearDtcs),
    ];

    for (json, expected) in cases {
        let command = handler.parse_command(json).unwrap();
        assert_eq!(command.command_type, expected, "{json}");
    }
}

#[test]
fn test_missing_id_rejected() {
    let mut handler = ProtocolHandler::new();
    assert!(matches!(
        handler.parse_command(r#"{"command_type":"Ping"}"#),
        Err(ProtocolError::InvalidJson(_))
    ));
}

#[test]
fn test_wrong_field_type_rejected() {
    let mut handler = ProtocolHandler::new();
    assert!(matches!(
        handler.parse_command(r#"{"id":1,"command_type":{"SetSteering":{"deg":"left"}}}"#),
        Err(ProtocolError::InvalidJson(_))
    ));
}

#[test]
fn test_status_response_fits_buffer() {
    let mut runtime = ZoneRuntime::new(ZoneConfig::default()).unwrap();
    for _ in 0..20 {
        runtime.tick();
    }
    let response = runtime.execute_command(&Command {
        id: 11,
        command_type: CommandType::Status,
    });

    let mut handler = ProtocolHandler::new();
    let json = handler.serialize_response(&response).unwrap();
    assert!(json.len() <= MAX_RESPONSE_SIZE);
    let parsed: CommandResponse = serde_json::from_str(json).unwrap();
    assert_eq!(parsed.id, 11);
    assert_eq!(parsed.status, ResponseStatus::Success);
    assert!(parsed.data.is_some());
}

#[test]
fn test_telemetry_frame_serialises() {
    let mut runtime = ZoneRuntime::new(ZoneConfig::default()).unwrap();
    runtime.execute_command(&Command {
        id: 1,
        command_type: CommandType::RunScenario {
            scenario: Scenario::SensorDropout,
        },
    });

    let mut handler = ProtocolHandler::new();
    let mut frames = 0;
    for _ in 0..40 {
        if let Some(frame) = runtime.tick() {
            let json = handler.serialize_telemetry(&frame).unwrap();
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(value["sequence"], frame.sequence);
            assert!(value["steering"]["duty"].is_u64());
            frames += 1;
        }
    }
    // Decimated frames at cycles 10, 21 and 31, plus one when the fault appears at 11
    assert_eq!(frames, 4);
}

#[test]
fn test_rejected_response_carries_message() {
    let response = ProtocolHandler::create_response(4, 100, ResponseStatus::Rejected, Some("stimulus queue full"));
    let mut handler = ProtocolHandler::new();
    let json = handler.serialize_response(&response).unwrap();
    assert!(json.contains("\"Rejected\""));
    assert!(json.contains("stimulus queue full"));
    assert!(json.contains("\"data\":null"));
}
