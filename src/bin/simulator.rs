use actgov::config::ZoneConfig;
use actgov::protocol::{Command, CommandType, ProtocolHandler, ResponseStatus};
use actgov::runtime::ZoneRuntime;
use actgov::scenario::Scenario;
use clap::{App, Arg};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: &str = "8080";
const CONTROL_CYCLE: Duration = Duration::from_millis(10);
const TELEMETRY_BROADCAST_BUFFER_SIZE: usize = 256;

type SharedRuntime = Arc<Mutex<ZoneRuntime>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("actgov-simulator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Front-zone controller simulator running both actuator governors at 100 Hz")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .help("TCP port for commands and telemetry"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("JSON zone configuration, presets are used when omitted"),
        )
        .arg(
            Arg::with_name("scenario")
                .short("s")
                .long("scenario")
                .takes_value(true)
                .possible_values(&[
                    "nominal",
                    "sensor-dropout",
                    "plausibility-drift",
                    "stale-commands",
                    "repeated-faults",
                    "emergency-stop",
                ])
                .help("Scenario to start right away"),
        )
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let config = match matches.value_of("config") {
        Some(path) => ZoneConfig::load(Path::new(path))?,
        None => ZoneConfig::default(),
    };

    println!("🚗 Front-Zone Actuator Governor Simulator");
    println!("==========================================");

    let runtime: SharedRuntime = Arc::new(Mutex::new(ZoneRuntime::new(config)?));

    if let Some(name) = matches.value_of("scenario") {
        let scenario = scenario_from_name(name).ok_or("unknown scenario")?;
        let mut guard = runtime.lock().await;
        let response = guard.execute_command(&Command {
            id: 0,
            command_type: CommandType::RunScenario { scenario },
        });
        if response.status != ResponseStatus::Success {
            return Err(format!("scenario rejected: {:?}", response.message).into());
        }
        info!("scenario {:?} started", scenario);
    }

    let (telemetry_tx, _) = broadcast::channel::<String>(TELEMETRY_BROADCAST_BUFFER_SIZE);

    let tcp_runtime = Arc::clone(&runtime);
    let tcp_telemetry_tx = telemetry_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_runtime, tcp_telemetry_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(CONTROL_CYCLE);
    let mut protocol = ProtocolHandler::new();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }

        let frame = {
            let mut guard = runtime.lock().await;
            guard.process_commands();
            guard.tick()
        };

        if let Some(frame) = frame {
            match protocol.serialize_telemetry(&frame) {
                Ok(json) => {
                    debug!("telemetry: {}", json);
                    // No subscribers is not an error
                    let _ = telemetry_tx.send(json.to_string());
                }
                Err(e) => warn!("failed to serialise telemetry: {}", e),
            }
        }
    }

    tcp_server.abort();
    println!("Simulator stopped");
    Ok(())
}

fn scenario_from_name(name: &str) -> Option<Scenario> {
    match name {
        "nominal" => Some(Scenario::Nominal),
        "sensor-dropout" => Some(Scenario::SensorDropout),
        "plausibility-drift" => Some(Scenario::PlausibilityDrift),
        "stale-commands" => Some(Scenario::StaleCommands),
        "repeated-faults" => Some(Scenario::RepeatedFaults),
        "emergency-stop" => Some(Scenario::EmergencyStop),
        _ => None,
    }
}

async fn start_tcp_server(
    port: u16,
    runtime: SharedRuntime,
    telemetry_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("client connected: {}", addr);
                let client_runtime = Arc::clone(&runtime);
                let client_telemetry_rx = telemetry_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_runtime, client_telemetry_rx).await {
                        warn!("client {} error: {}", addr, e);
                    }
                    info!("client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    runtime: SharedRuntime,
    mut telemetry_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let telemetry_writer = Arc::clone(&writer);
    let telemetry_task = tokio::spawn(async move {
        loop {
            let telemetry = match telemetry_rx.recv().await {
                Ok(telemetry) => telemetry,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("client lagging, {} telemetry frames skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let mut guard = telemetry_writer.lock().await;
            if let Err(e) = guard.write_all(telemetry.as_bytes()).await {
                debug!("telemetry write failed: {}", e);
                break;
            }
            if guard.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut protocol = ProtocolHandler::new();
    let mut line = String::new();
    loop {
        line.clear();
        if buf_reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match protocol.parse_command(trimmed) {
            Ok(command) => {
                info!("received command: {:?}", command);
                let mut guard = runtime.lock().await;
                guard.execute_command(&command)
            }
            Err(e) => {
                warn!("rejected command: {}", e);
                let cycle = runtime.lock().await.status().cycle;
                ProtocolHandler::create_response(0, cycle, ResponseStatus::InvalidCommand, Some(&e.to_string()))
            }
        };

        let json = protocol.serialize_response(&response)?.to_string();
        let mut guard = writer.lock().await;
        guard.write_all(json.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        debug!("sent response: {}", json);
    }

    telemetry_task.abort();
    Ok(())
}
