use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use crossbeam_channel::select;
use log::{error, info, warn};
use tiltbridge_common::chunk::CHUNK_SIZE;
use tiltbridge_common::cmd::{parse_coordinate, Coords};
use tiltbridge_common::frame::ChecksumPolicy;
use tiltbridge_common::{IMU_BAUD, PLATFORM_BAUD};

mod config;
mod console;
mod error;
mod events;
mod imu;
mod platform;
mod record;
mod serial;
mod sync;
#[cfg(test)]
mod testutil;

use config::SerialConfig;
use console::Console;
use error::{BridgeError, Result};
use events::{emit, PlatformEvent};
use imu::ImuSession;
use platform::{wait_for, PlatformSession};

#[derive(Parser)]
#[command(name = "tiltbridge")]
#[command(about = "Read an IMU and drive a motion platform over serial", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PortArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(long)]
    port: String,

    /// Baud rate (device default when omitted)
    #[arg(long)]
    baud: Option<u32>,
}

impl PortArgs {
    fn imu(&self) -> Result<SerialConfig> {
        match self.baud {
            Some(baud) => SerialConfig::new(self.port.as_str(), baud),
            None => SerialConfig::imu(self.port.as_str()),
        }
    }

    fn platform(&self) -> Result<SerialConfig> {
        match self.baud {
            Some(baud) => SerialConfig::new(self.port.as_str(), baud),
            None => SerialConfig::platform(self.port.as_str()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print throttled IMU readings until end of input
    Monitor {
        #[command(flatten)]
        port: PortArgs,

        /// Directory to write a CSV recording into
        #[arg(long)]
        record: Option<PathBuf>,

        /// Report orientation relative to the first displayed reading
        #[arg(long)]
        relative: bool,

        /// Drop sub-records whose checksum byte does not match
        #[arg(long)]
        verify_checksum: bool,

        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Send one MOVE and wait for it to finish
    Move {
        #[command(flatten)]
        port: PortArgs,

        /// Mirror c1 into c2 and c3 into c4
        #[arg(long)]
        sync: bool,

        #[arg(allow_negative_numbers = true)]
        c1: i32,
        #[arg(allow_negative_numbers = true)]
        c2: i32,
        #[arg(allow_negative_numbers = true)]
        c3: i32,
        #[arg(allow_negative_numbers = true)]
        c4: i32,
    },

    /// Send ZERO and wait for it to finish
    Zero {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Move in bounded steps, waiting for each one
    Stage {
        #[command(flatten)]
        port: PortArgs,

        /// Largest step on any axis
        #[arg(long, default_value_t = CHUNK_SIZE)]
        chunk: u32,

        /// Current position, C1,C2,C3,C4
        #[arg(long, value_parser = parse_coords, allow_hyphen_values = true)]
        from: Coords,

        /// Target position, C1,C2,C3,C4
        #[arg(long, value_parser = parse_coords, allow_hyphen_values = true)]
        to: Coords,
    },

    /// Interactive console for both devices
    Console {
        #[arg(long)]
        imu: Option<String>,

        #[arg(long, default_value_t = IMU_BAUD)]
        imu_baud: u32,

        #[arg(long)]
        platform: Option<String>,

        #[arg(long, default_value_t = PLATFORM_BAUD)]
        platform_baud: u32,

        /// Directory to write a CSV recording into
        #[arg(long)]
        record: Option<PathBuf>,
    },
}

fn parse_coords(text: &str) -> std::result::Result<Coords, String> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected four comma separated values, got `{}`", text));
    }
    let mut coords: Coords = [0; 4];
    for (slot, part) in coords.iter_mut().zip(parts) {
        *slot = parse_coordinate(part).map_err(|e| e.to_string())?;
    }
    Ok(coords)
}

fn monitor(
    config: &SerialConfig,
    record: Option<PathBuf>,
    relative: bool,
    policy: ChecksumPolicy,
    json: bool,
) -> Result<()> {
    let session = ImuSession::connect(config, record.as_deref(), policy)?;
    let lines = console::stdin_lines();
    let display = session.display().clone();
    let mut waiting_for_reference = relative;

    loop {
        select! {
            recv(lines) -> line => match line {
                Ok(_) => {}
                Err(_) => break,
            },
            recv(display) -> sample => match sample {
                Ok(sample) => {
                    if waiting_for_reference {
                        session.set_relative();
                        waiting_for_reference = false;
                    }
                    emit("imu", &sample, json);
                }
                Err(_) => {
                    warn!("IMU stream ended");
                    break;
                }
            },
        }
    }

    let stats = session.stop()?;
    emit("stats", &stats, json);
    Ok(())
}

fn move_to(config: &SerialConfig, sync: bool, coords: Coords) -> Result<()> {
    let mut session = PlatformSession::connect(config)?;
    let events = session.subscribe();
    session.inputs_mut().set_sync(sync);
    session.inputs_mut().set(coords);
    let sent = session.go()?;
    info!("Waiting for {} to finish", sent);
    wait_for(&events, PlatformEvent::MoveDone)?;
    println!("{}", PlatformEvent::MoveDone);
    session.close()?;
    Ok(())
}

fn zero(config: &SerialConfig) -> Result<()> {
    let mut session = PlatformSession::connect(config)?;
    let events = session.subscribe();
    session.zero()?;
    wait_for(&events, PlatformEvent::ZeroDone)?;
    println!("{}", PlatformEvent::ZeroDone);
    session.close()?;
    Ok(())
}

fn stage(config: &SerialConfig, chunk: u32, from: Coords, to: Coords) -> Result<()> {
    if chunk == 0 {
        return Err(BridgeError::validation("chunk size must be positive"));
    }
    let mut session = PlatformSession::connect(config)?;
    let steps = session.staged_move(from, to, chunk)?;
    println!("{} steps, at {:?}", steps, to);
    session.close()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Monitor {
            port,
            record,
            relative,
            verify_checksum,
            json,
        } => {
            let policy = if verify_checksum {
                ChecksumPolicy::Verify
            } else {
                ChecksumPolicy::Ignore
            };
            monitor(&port.imu()?, record, relative, policy, json)
        }
        Commands::Move {
            port,
            sync,
            c1,
            c2,
            c3,
            c4,
        } => move_to(&port.platform()?, sync, [c1, c2, c3, c4]),
        Commands::Zero { port } => zero(&port.platform()?),
        Commands::Stage {
            port,
            chunk,
            from,
            to,
        } => stage(&port.platform()?, chunk, from, to),
        Commands::Console {
            imu,
            imu_baud,
            platform,
            platform_baud,
            record,
        } => {
            let imu = imu.map(|p| SerialConfig::new(p, imu_baud)).transpose()?;
            let platform = platform
                .map(|p| SerialConfig::new(p, platform_baud))
                .transpose()?;
            let mut console = Console::open(imu.as_ref(), platform.as_ref(), record.as_deref())?;
            let outcome = console.run(console::stdin_lines());
            console.shutdown()?;
            outcome
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn coordinate_lists() {
        assert_eq!(parse_coords("-1000,100,10,400"), Ok([-1000, 100, 10, 400]));
        assert!(parse_coords("1,2,3").is_err());
        assert!(parse_coords("1,2,x,4").is_err());
    }

    #[test]
    fn negative_positionals() {
        let cli = Cli::try_parse_from([
            "tiltbridge", "move", "--port", "COM3", "--sync", "50", "-1", "-20", "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Move { sync, c1, c3, .. } => {
                assert!(sync);
                assert_eq!((c1, c3), (50, -20));
            }
            _ => panic!("expected move"),
        }
    }

    #[test]
    fn stage_defaults_and_hyphen_values() {
        let cli = Cli::try_parse_from([
            "tiltbridge",
            "stage",
            "--port",
            "COM3",
            "--from",
            "-1000,100,10,400",
            "--to",
            "-1240,1234,456,450",
        ])
        .unwrap();
        match cli.command {
            Commands::Stage {
                chunk, from, to, ..
            } => {
                assert_eq!(chunk, CHUNK_SIZE);
                assert_eq!(from, [-1000, 100, 10, 400]);
                assert_eq!(to, [-1240, 1234, 456, 450]);
            }
            _ => panic!("expected stage"),
        }
    }

    #[test]
    fn bad_baud_is_rejected_before_opening() {
        let args = PortArgs {
            port: "COM3".into(),
            baud: Some(12345),
        };
        assert!(matches!(args.platform(), Err(BridgeError::Protocol(_))));

        let defaults = PortArgs {
            port: "COM3".into(),
            baud: None,
        };
        assert_eq!(defaults.imu().unwrap().baud, IMU_BAUD);
        assert_eq!(defaults.platform().unwrap().baud, PLATFORM_BAUD);
    }
}
