use actgov::ecu::Actuator;
use actgov::fault_injection::SensorFault;
use actgov::governor::VehicleState;
use actgov::protocol::{Command, CommandType};
use actgov::scenario::Scenario;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn on_off_arg() -> Arg<'static, 'static> {
    Arg::with_name("state")
        .help("on or off")
        .required(true)
        .possible_values(&["on", "off"])
}

fn build_cli() -> App<'static, 'static> {
    App::new("actgov")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Front-zone actuator safety governor client")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("Check the simulator is responsive"))
        .subcommand(SubCommand::with_name("status").about("Show governor and runtime status"))
        .subcommand(
            SubCommand::with_name("steer")
                .about("Set the driver steering target")
                .arg(
                    Arg::with_name("deg")
                        .help("Target angle in degrees")
                        .required(true)
                        .allow_hyphen_values(true)
                        .validator(|v| v.parse::<i32>().map(|_| ()).map_err(|e| e.to_string())),
                ),
        )
        .subcommand(
            SubCommand::with_name("brake")
                .about("Set the driver brake target")
                .arg(
                    Arg::with_name("pct")
                        .help("Brake pressure in percent")
                        .required(true)
                        .allow_hyphen_values(true)
                        .validator(|v| v.parse::<i32>().map(|_| ()).map_err(|e| e.to_string())),
                ),
        )
        .subcommand(
            SubCommand::with_name("estop")
                .about("Assert or release the emergency stop")
                .arg(on_off_arg()),
        )
        .subcommand(
            SubCommand::with_name("vehicle-state")
                .about("Set the vehicle operating state")
                .arg(
                    Arg::with_name("state")
                        .required(true)
                        .possible_values(&["init", "run", "degraded", "limp", "safe-stop", "shutdown"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("fault")
                .about("Steering sensor fault injection")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("inject")
                        .about("Inject a sensor fault")
                        .arg(
                            Arg::with_name("type")
                                .required(true)
                                .possible_values(&["dropout", "offset", "stuck"]),
                        )
                        .arg(
                            Arg::with_name("deg")
                                .long("deg")
                                .takes_value(true)
                                .allow_hyphen_values(true)
                                .default_value("8")
                                .help("Offset in degrees (offset faults only)"),
                        )
                        .arg(
                            Arg::with_name("cycles")
                                .long("cycles")
                                .takes_value(true)
                                .help("Clear automatically after this many cycles"),
                        ),
                )
                .subcommand(SubCommand::with_name("clear").about("Clear the injected sensor fault")),
        )
        .subcommand(
            SubCommand::with_name("fault-injection")
                .about("Enable or disable random fault injection")
                .arg(on_off_arg()),
        )
        .subcommand(
            SubCommand::with_name("freeze")
                .about("Freeze driver commands so they go stale")
                .arg(on_off_arg()),
        )
        .subcommand(
            SubCommand::with_name("scenario").about("Run a scripted scenario").arg(
                Arg::with_name("name").required(true).possible_values(&[
                    "nominal",
                    "sensor-dropout",
                    "plausibility-drift",
                    "stale-commands",
                    "repeated-faults",
                    "emergency-stop",
                ]),
            ),
        )
        .subcommand(
            SubCommand::with_name("reinit")
                .about("Re-initialise one governor, resetting its escalation")
                .arg(
                    Arg::with_name("actuator")
                        .required(true)
                        .possible_values(&["steering", "brake"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("dtc")
                .about("Diagnostic trouble codes")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("list").about("List stored DTCs"))
                .subcommand(SubCommand::with_name("clear").about("Clear stored DTCs")),
        )
        .subcommand(SubCommand::with_name("monitor").about("Stream telemetry"))
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = build_cli().get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table").to_string();
    let verbose = matches.is_present("verbose");

    if let ("monitor", _) = matches.subcommand() {
        return monitor(&host, port, &format).await;
    }

    let (label, command_type) = command_for(&matches)?;
    if verbose {
        println!("{} {} on {}:{}", "Sending".dimmed(), label.dimmed(), host, port);
    }

    let command = Command {
        id: command_id(),
        command_type,
    };
    let response = send_command(&host, port, &command).await?;
    print_response(&label, &response, &format);
    Ok(())
}

fn command_for(matches: &ArgMatches<'_>) -> CliResult<(String, CommandType)> {
    let on = |m: &ArgMatches<'_>| m.value_of("state") == Some("on");

    let result = match matches.subcommand() {
        ("ping", _) => ("Ping".to_string(), CommandType::Ping),
        ("status", _) => ("Status".to_string(), CommandType::Status),
        ("steer", Some(m)) => {
            let deg: i32 = m.value_of("deg").unwrap_or("0").parse()?;
            (format!("Steering target {deg} deg"), CommandType::SetSteering { deg })
        }
        ("brake", Some(m)) => {
            let pct: i32 = m.value_of("pct").unwrap_or("0").parse()?;
            (format!("Brake target {pct} %"), CommandType::SetBrake { pct })
        }
        ("estop", Some(m)) => {
            let active = on(m);
            ("Emergency stop".to_string(), CommandType::EmergencyStop { active })
        }
        ("vehicle-state", Some(m)) => {
            let state = parse_vehicle_state(m.value_of("state").unwrap_or("run"))?;
            (format!("Vehicle state {state:?}"), CommandType::SetVehicleState { state })
        }
        ("fault", Some(m)) => match m.subcommand() {
            ("inject", Some(inject)) => {
                let fault = match inject.value_of("type").unwrap_or("dropout") {
                    "offset" => SensorFault::Offset {
                        deg: inject.value_of("deg").unwrap_or("8").parse()?,
                    },
                    "stuck" => SensorFault::Stuck,
                    _ => SensorFault::Dropout,
                };
                let duration_cycles = inject.value_of("cycles").map(str::parse::<u32>).transpose()?;
                (
                    format!("Sensor fault {fault:?}"),
                    CommandType::InjectSensorFault { fault, duration_cycles },
                )
            }
            _ => ("Clear sensor fault".to_string(), CommandType::ClearSensorFault),
        },
        ("fault-injection", Some(m)) => (
            "Random fault injection".to_string(),
            CommandType::SetFaultInjection { enabled: on(m) },
        ),
        ("freeze", Some(m)) => (
            "Freeze driver commands".to_string(),
            CommandType::FreezeCommands { frozen: on(m) },
        ),
        ("scenario", Some(m)) => {
            let scenario = parse_scenario(m.value_of("name").unwrap_or("nominal"))?;
            (format!("Scenario {scenario:?}"), CommandType::RunScenario { scenario })
        }
        ("reinit", Some(m)) => {
            let actuator = match m.value_of("actuator") {
                Some("brake") => Actuator::Brake,
                _ => Actuator::Steering,
            };
            (format!("Reinitialise {actuator:?}"), CommandType::Reinitialize { actuator })
        }
        ("dtc", Some(m)) => match m.subcommand() {
            ("clear", _) => ("Clear DTCs".to_string(), CommandType::ClearDtcs),
            _ => ("DTCs".to_string(), CommandType::GetDtcs),
        },
        (other, _) => return Err(format!("unknown command '{other}'").into()),
    };
    Ok(result)
}

fn parse_vehicle_state(name: &str) -> CliResult<VehicleState> {
    Ok(match name {
        "init" => VehicleState::Init,
        "run" => VehicleState::Run,
        "degraded" => VehicleState::Degraded,
        "limp" => VehicleState::Limp,
        "safe-stop" => VehicleState::SafeStop,
        "shutdown" => VehicleState::Shutdown,
        other => return Err(format!("unknown vehicle state '{other}'").into()),
    })
}

fn parse_scenario(name: &str) -> CliResult<Scenario> {
    Ok(match name {
        "nominal" => Scenario::Nominal,
        "sensor-dropout" => Scenario::SensorDropout,
        "plausibility-drift" => Scenario::PlausibilityDrift,
        "stale-commands" => Scenario::StaleCommands,
        "repeated-faults" => Scenario::RepeatedFaults,
        "emergency-stop" => Scenario::EmergencyStop,
        other => return Err(format!("unknown scenario '{other}'").into()),
    })
}

fn command_id() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(1)
}

async fn send_command(host: &str, port: u16, command: &Command) -> CliResult<serde_json::Value> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin actgov-simulator".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let json = serde_json::to_string(command)?;

    let exchange = async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        // Telemetry frames share the connection; skip until our response arrives
        while let Some(line) = lines.next_line().await? {
            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if value.get("status").is_some() && value["id"] == serde_json::json!(command.id) {
                return Ok(value);
            }
        }
        Err::<serde_json::Value, Box<dyn std::error::Error>>("server closed connection".into())
    };

    match tokio::time::timeout(RESPONSE_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} Command timed out after {} seconds", "⏰".yellow(), RESPONSE_TIMEOUT.as_secs());
            Err("command timeout".into())
        }
    }
}

fn print_response(label: &str, response: &serde_json::Value, format: &str) {
    let status = response["status"].as_str().unwrap_or("Unknown");
    let message = response["message"].as_str().unwrap_or("");

    match format {
        "json" => println!("{}", response),
        "compact" => {
            if status == "Success" {
                println!("{}", "OK".bright_green());
            } else {
                println!("{} {}", status.bright_red(), message);
            }
        }
        _ => {
            match status {
                "Success" => println!("{} {}: {}", "✅".green(), label.bright_white(), message.bright_cyan()),
                "Rejected" => println!("{} {} rejected: {}", "⚠️".yellow(), label.bright_white(), message.bright_red()),
                _ => println!("{} {} failed ({}): {}", "❌".red(), label.bright_white(), status, message.bright_red()),
            }
            if let Some(data) = response.get("data").filter(|d| !d.is_null()) {
                print_data(data);
            }
        }
    }
}

fn print_data(data: &serde_json::Value) {
    if let Some(entries) = data.as_array() {
        if entries.is_empty() {
            println!("   {}", "no stored DTCs".dimmed());
        }
        for entry in entries {
            let code = entry["code"].as_u64().unwrap_or(0);
            let failed = entry["test_failed"].as_bool().unwrap_or(false);
            let occurrences = entry["occurrences"].as_u64().unwrap_or(0);
            let state = if failed { "FAILED".bright_red() } else { "passed".green() };
            println!("   0x{:06X}  {:<8} occurrences {}", code, state, occurrences);
        }
        return;
    }

    println!("   {} {}", "cycle".bright_white(), data["cycle"]);
    if let Some(report) = data.get("last_report").filter(|r| !r.is_null()) {
        print_actuator("steering", &report["steering"]);
        print_actuator("brake", &report["brake"]);
        println!(
            "   {} {}  {} {}",
            "safety".bright_white(),
            report["safety"],
            "vehicle".bright_white(),
            report["vehicle_state"]
        );
    }
    println!("   {} {}", "cutoff frames".bright_white(), data["cutoff_frames_sent"]);
}

fn print_actuator(name: &str, report: &serde_json::Value) {
    if report.is_null() {
        println!("   {:<9} {}", name.bright_white(), "not running".bright_red());
        return;
    }
    let fault = report["fault"].as_str().unwrap_or("NoFault");
    let fault = if fault == "NoFault" { fault.green() } else { fault.bright_red() };
    println!(
        "   {:<9} duty {:>5}  fault {}  level {}",
        name.bright_white(),
        report["duty"],
        fault,
        report["disable_level"]
    );
}

async fn monitor(host: &str, port: u16, format: &str) -> CliResult<()> {
    println!("{}", "📡 Monitoring zone telemetry (Press Ctrl+C to stop)...".bright_blue().bold());
    let stream = TcpStream::connect((host, port)).await?;
    let mut lines = BufReader::new(stream).lines();

    if format == "table" {
        println!(
            "{}",
            "   cycle │ steer │ s.duty │ s.fault        │ s.lvl │ brake │ b.duty │ b.fault        │ safety"
                .bright_white()
        );
    }

    while let Some(line) = lines.next_line().await? {
        let telemetry: serde_json::Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => continue,
        };
        if telemetry.get("sequence").is_none() {
            continue;
        }

        match format {
            "json" => println!("{}", line),
            "compact" => {
                let safety = telemetry["safety"].as_str().unwrap_or("Ok");
                let status = match safety {
                    "Ok" => "OK".green(),
                    "Degraded" => "DEGRADED".yellow(),
                    _ => "FAULT".red(),
                };
                println!(
                    "[{}] {} | steer {} | brake {} | mask 0x{:02X}",
                    telemetry["cycle"],
                    status,
                    telemetry["steering"]["position"],
                    telemetry["brake"]["position"],
                    telemetry["fault_mask"].as_u64().unwrap_or(0)
                );
            }
            _ => {
                let fault_str = |v: &serde_json::Value| {
                    let fault = if v.is_null() {
                        "NotRunning"
                    } else {
                        v["fault"].as_str().unwrap_or("NoFault")
                    };
                    let cell = format!("{:<14}", fault);
                    if fault == "NoFault" {
                        cell.green()
                    } else {
                        cell.bright_red()
                    }
                };
                let safety = telemetry["safety"].as_str().unwrap_or("Ok");
                let safety = match safety {
                    "Ok" => safety.bright_green(),
                    "Degraded" => safety.yellow(),
                    _ => safety.bright_red(),
                };
                println!(
                    "{:>8} │ {:>5} │ {:>6} │ {} │ {:>5} │ {:>5} │ {:>6} │ {} │ {}",
                    telemetry["cycle"],
                    telemetry["steering"]["position"],
                    telemetry["steering"]["duty"],
                    fault_str(&telemetry["steering"]),
                    telemetry["steering"]["disable_level"],
                    telemetry["brake"]["position"],
                    telemetry["brake"]["duty"],
                    fault_str(&telemetry["brake"]),
                    safety
                );
            }
        }
    }

    Ok(())
}
