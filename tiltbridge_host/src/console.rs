//! Line-oriented operator console driving both devices at once.

use std::io::{self, BufRead, Stdout, Write};
use std::path::Path;
use std::str::FromStr;
use std::thread;

use crossbeam_channel::{never, select, unbounded, Receiver};
use log::{debug, info, warn};
use serialport::SerialPort;
use tiltbridge_common::cmd::{parse_coordinate, Coords, DEFAULT_STEPS_PER_MM};
use tiltbridge_common::display::DisplaySample;
use tiltbridge_common::frame::ChecksumPolicy;

use crate::config::SerialConfig;
use crate::error::{BridgeError, Result};
use crate::events::PlatformEvent;
use crate::imu::ImuSession;
use crate::platform::{LinkState, PlatformSession};

pub const HELP: &str = "commands: rel | abs | sync on|off | set C1 C2 C3 C4 | go | zero | mm N | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Relative,
    Absolute,
    Sync(bool),
    Set(Coords),
    Go,
    Zero,
    StepsPerMm(i32),
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = BridgeError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| BridgeError::validation("empty command"))?;
        let args: Vec<&str> = words.collect();

        let command = match (verb, args.as_slice()) {
            ("rel", []) => ConsoleCommand::Relative,
            ("abs", []) => ConsoleCommand::Absolute,
            ("sync", ["on"]) => ConsoleCommand::Sync(true),
            ("sync", ["off"]) => ConsoleCommand::Sync(false),
            ("set", [a, b, c, d]) => ConsoleCommand::Set([
                parse_coordinate(a)?,
                parse_coordinate(b)?,
                parse_coordinate(c)?,
                parse_coordinate(d)?,
            ]),
            ("go", []) => ConsoleCommand::Go,
            ("zero", []) => ConsoleCommand::Zero,
            ("mm", [n]) => ConsoleCommand::StepsPerMm(
                n.parse()
                    .map_err(|_| BridgeError::validation(format!("bad steps per mm: {}", n)))?,
            ),
            ("help" | "?", []) => ConsoleCommand::Help,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            _ => {
                return Err(BridgeError::validation(format!(
                    "unknown command `{}`",
                    line.trim()
                )))
            }
        };
        Ok(command)
    }
}

/// Forward stdin lines on a channel. The channel closes at end of input.
pub fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
        debug!("stdin closed");
    });
    rx
}

enum Input {
    Line(Option<String>),
    Display(Option<DisplaySample>),
    Event(Option<PlatformEvent>),
}

pub struct Console<W: Write, O: Write> {
    imu: Option<ImuSession>,
    platform: Option<PlatformSession<W>>,
    display: Receiver<DisplaySample>,
    events: Receiver<PlatformEvent>,
    steps_per_mm: i32,
    out: O,
}

impl Console<Box<dyn SerialPort>, Stdout> {
    /// Connect whichever devices are configured. At least one is required.
    pub fn open(
        imu: Option<&SerialConfig>,
        platform: Option<&SerialConfig>,
        record_dir: Option<&Path>,
    ) -> Result<Self> {
        if imu.is_none() && platform.is_none() {
            return Err(BridgeError::validation(
                "console needs an IMU port, a platform port, or both",
            ));
        }
        let imu = match imu {
            Some(config) => Some(ImuSession::connect(
                config,
                record_dir,
                ChecksumPolicy::default(),
            )?),
            None => None,
        };
        let platform = match platform {
            Some(config) => Some(PlatformSession::connect(config)?),
            None => None,
        };
        Ok(Self::new(imu, platform, io::stdout()))
    }
}

impl<W: Write, O: Write> Console<W, O> {
    pub fn new(imu: Option<ImuSession>, platform: Option<PlatformSession<W>>, out: O) -> Self {
        let display = imu
            .as_ref()
            .map(|imu| imu.display().clone())
            .unwrap_or_else(never);
        let events = platform
            .as_ref()
            .map(|platform| platform.subscribe())
            .unwrap_or_else(never);
        Self {
            imu,
            platform,
            display,
            events,
            steps_per_mm: DEFAULT_STEPS_PER_MM,
            out,
        }
    }

    fn imu(&self) -> Result<&ImuSession> {
        self.imu
            .as_ref()
            .filter(|imu| imu.is_running())
            .ok_or_else(|| BridgeError::validation("IMU is not connected"))
    }

    fn platform(&mut self) -> Result<&mut PlatformSession<W>> {
        self.platform.as_mut().ok_or(BridgeError::Disconnected)
    }

    fn print_readout(&mut self) -> Result<()> {
        let steps_per_mm = self.steps_per_mm;
        let inputs = *self.platform()?.inputs();
        let values = inputs.values();
        let mm = inputs.mm_readout(steps_per_mm);
        let mut line = String::new();
        for (i, text) in mm.iter().enumerate() {
            if text.is_empty() {
                line.push_str(&format!("c{}: (mirrored)  ", i + 1));
            } else {
                line.push_str(&format!("c{}: {} = {} mm  ", i + 1, values[i], text));
            }
        }
        writeln!(self.out, "{}", line.trim_end())?;
        Ok(())
    }

    /// Run one command. Returns `false` when the console should exit.
    pub fn execute(&mut self, command: ConsoleCommand) -> Result<bool> {
        match command {
            ConsoleCommand::Relative => self.imu()?.set_relative(),
            ConsoleCommand::Absolute => self.imu()?.set_absolute(),
            ConsoleCommand::Sync(on) => {
                self.platform()?.inputs_mut().set_sync(on);
                self.print_readout()?;
            }
            ConsoleCommand::Set(values) => {
                self.platform()?.inputs_mut().set(values);
                self.print_readout()?;
            }
            ConsoleCommand::Go => {
                if self.platform()?.state() == LinkState::AwaitingMoveAck {
                    writeln!(self.out, "go is disabled until the platform reports move done")?;
                    return Ok(true);
                }
                let sent = self.platform()?.go()?;
                writeln!(self.out, "sent {}", sent)?;
            }
            ConsoleCommand::Zero => {
                self.platform()?.zero()?;
                writeln!(self.out, "sent ^ZERO$")?;
            }
            ConsoleCommand::StepsPerMm(n) => {
                self.steps_per_mm = n;
                if self.platform.is_some() {
                    self.print_readout()?;
                }
            }
            ConsoleCommand::Help => writeln!(self.out, "{}", HELP)?,
            ConsoleCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Parse and run one input line, reporting rejected commands instead of
    /// failing.
    pub fn handle_line(&mut self, line: &str) -> Result<bool> {
        if line.trim().is_empty() {
            return Ok(true);
        }
        let outcome = line
            .parse::<ConsoleCommand>()
            .and_then(|command| self.execute(command));
        match outcome {
            Ok(keep_going) => Ok(keep_going),
            Err(BridgeError::Io(e)) => Err(BridgeError::Io(e)),
            Err(e) => {
                writeln!(self.out, "error: {}", e)?;
                Ok(true)
            }
        }
    }

    /// Multiplex operator input, display samples and platform events until
    /// `quit` or end of input.
    pub fn run(&mut self, lines: Receiver<String>) -> Result<()> {
        writeln!(self.out, "{}", HELP)?;
        loop {
            let input = select! {
                recv(lines) -> msg => Input::Line(msg.ok()),
                recv(self.display) -> msg => Input::Display(msg.ok()),
                recv(self.events) -> msg => Input::Event(msg.ok()),
            };
            match input {
                Input::Line(Some(line)) => {
                    if !self.handle_line(&line)? {
                        break;
                    }
                }
                Input::Line(None) => break,
                Input::Display(Some(sample)) => writeln!(self.out, "{}", sample)?,
                Input::Display(None) => {
                    writeln!(self.out, "{}", DisplaySample::zeroed())?;
                    writeln!(self.out, "IMU disconnected")?;
                    self.display = never();
                }
                Input::Event(Some(PlatformEvent::Disconnected)) | Input::Event(None) => {
                    writeln!(self.out, "{}", PlatformEvent::Disconnected)?;
                    self.events = never();
                }
                Input::Event(Some(event)) => writeln!(self.out, "{}", event)?,
            }
        }
        Ok(())
    }

    /// Stop both workers.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(imu) = self.imu.take() {
            let stats = imu.stop()?;
            info!(
                "IMU session: {} frames, {} anomalies, {} skipped bytes",
                stats.frames, stats.anomalies, stats.skipped_bytes
            );
        }
        if let Some(mut platform) = self.platform.take() {
            platform.close()?;
        }
        self.out.flush()?;
        Ok(())
    }
}
