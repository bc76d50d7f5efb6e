use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use serialport::SerialPort;
use tiltbridge_common::chunk::chunk_with_size;
use tiltbridge_common::cmd::{Coords, CoordinateInputs, PlatformAck, PlatformCommand};

use crate::config::SerialConfig;
use crate::error::{BridgeError, Result};
use crate::events::{EventBus, PlatformEvent};
use crate::serial::{self, is_cancelled, CancellableReader, StopFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Idle,
    /// A MOVE is out; another one is refused until `M` comes back.
    AwaitingMoveAck,
}

type SharedState = Arc<Mutex<LinkState>>;

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply one inbound byte to the link state.
pub fn on_ack_byte(state: &Mutex<LinkState>, byte: u8) -> Option<PlatformEvent> {
    let ack = match PlatformAck::from_byte(byte) {
        Some(ack) => ack,
        None => {
            debug!("Ignoring platform byte {:#04x}", byte);
            return None;
        }
    };
    if ack == PlatformAck::MoveDone {
        let mut state = lock(state);
        if *state == LinkState::AwaitingMoveAck {
            *state = LinkState::Idle;
        }
    }
    debug!("Platform ack {}", ack);
    Some(ack.into())
}

fn listen<R: Read>(reader: &mut R, state: &Mutex<LinkState>, bus: &EventBus) -> Result<u64> {
    let mut acks = 0;
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                info!("Platform stream closed");
                return Ok(acks);
            }
            Ok(_) => {
                if let Some(event) = on_ack_byte(state, byte[0]) {
                    acks += 1;
                    bus.publish(event);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_cancelled(&e) => {
                debug!("Platform read cancelled");
                return Ok(acks);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Block until `expected` arrives on `events`. Fails if the link drops first.
pub fn wait_for(events: &Receiver<PlatformEvent>, expected: PlatformEvent) -> Result<()> {
    loop {
        match events.recv() {
            Ok(event) if event == expected => return Ok(()),
            Ok(PlatformEvent::Disconnected) | Err(_) => return Err(BridgeError::Disconnected),
            Ok(other) => debug!("Waiting for {:?}, got {:?}", expected, other),
        }
    }
}

/// An open platform connection: the caller writes commands, a worker reads
/// acks and fans them out to subscribers.
pub struct PlatformSession<W: Write> {
    writer: W,
    state: SharedState,
    bus: EventBus,
    inputs: CoordinateInputs,
    stop: StopFlag,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl PlatformSession<Box<dyn SerialPort>> {
    pub fn connect(config: &SerialConfig) -> Result<Self> {
        let port = serial::open(config)?;
        let reader = port
            .try_clone()
            .map_err(|e| BridgeError::connection(&config.port, e))?;
        Ok(Self::spawn(reader, port))
    }
}

impl<W: Write> PlatformSession<W> {
    pub fn spawn<R>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
    {
        let state: SharedState = Arc::new(Mutex::new(LinkState::Idle));
        let bus = EventBus::default();
        let stop = StopFlag::default();

        let worker_state = state.clone();
        let worker_bus = bus.clone();
        let worker_stop = stop.clone();
        let handle = thread::spawn(move || {
            let mut reader = CancellableReader::new(reader, worker_stop);
            let outcome = listen(&mut reader, &worker_state, &worker_bus);
            *lock(&worker_state) = LinkState::Disconnected;
            worker_bus.publish(PlatformEvent::Disconnected);
            match &outcome {
                Ok(acks) => info!("Platform worker done: {} acks", acks),
                Err(e) => error!("Platform worker stopped: {}", e),
            }
            outcome
        });

        Self {
            writer,
            state,
            bus,
            inputs: CoordinateInputs::default(),
            stop,
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> Receiver<PlatformEvent> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.state)
    }

    pub fn inputs(&self) -> &CoordinateInputs {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut CoordinateInputs {
        &mut self.inputs
    }

    /// Write one command. The state lock is held across the write so an ack
    /// cannot be processed before the state reflects the command.
    pub fn send(&mut self, command: PlatformCommand) -> Result<()> {
        let mut state = lock(&self.state);
        match (*state, command) {
            (LinkState::Disconnected, _) => return Err(BridgeError::Disconnected),
            (LinkState::AwaitingMoveAck, PlatformCommand::Move(_)) => {
                warn!("Refusing {}: previous move not acknowledged", command);
                return Err(BridgeError::Busy);
            }
            _ => {}
        }

        self.writer.write_all(&command.to_wire())?;
        self.writer.flush()?;
        info!("Sent {}", command);

        if let PlatformCommand::Move(_) = command {
            *state = LinkState::AwaitingMoveAck;
        }
        Ok(())
    }

    pub fn send_move(&mut self, coords: Coords) -> Result<()> {
        self.send(PlatformCommand::Move(coords))
    }

    /// Send a MOVE built from the coordinate inputs.
    pub fn go(&mut self) -> Result<PlatformCommand> {
        let command = self.inputs.move_command();
        self.send(command)?;
        Ok(command)
    }

    /// Send ZERO and clear the coordinate inputs once it is written.
    pub fn zero(&mut self) -> Result<()> {
        let mut cleared = self.inputs;
        let command = cleared.zero_command();
        self.send(command)?;
        self.inputs = cleared;
        Ok(())
    }

    /// Move from `from` to `to` in steps no longer than `chunk_size` on any
    /// axis, waiting for each step to finish. Returns the number of MOVEs sent.
    pub fn staged_move(&mut self, from: Coords, to: Coords, chunk_size: u32) -> Result<usize> {
        let pairs: Vec<(i32, i32)> = from.iter().copied().zip(to.iter().copied()).collect();
        let plan = chunk_with_size(&pairs, chunk_size)?;
        let total = plan.len().saturating_sub(1);
        info!("Staging move {:?} -> {:?} in {} steps", from, to, total);

        let events = self.subscribe();
        let mut sent = 0;
        // the first tuple is the starting position
        for step in plan.skip(1) {
            let mut coords: Coords = [0; 4];
            coords.copy_from_slice(&step);
            self.send_move(coords)?;
            wait_for(&events, PlatformEvent::MoveDone)?;
            sent += 1;
            debug!("Step {}/{} done", sent, total);
        }
        Ok(sent)
    }

    /// Stop the ack reader. Later sends fail with `Disconnected`.
    pub fn close(&mut self) -> Result<u64> {
        self.stop.raise();
        let joined = match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| BridgeError::WorkerPanicked)
                .and_then(|outcome| outcome),
            None => Ok(0),
        };
        // the port is flushed even when the reader died with an error
        *lock(&self.state) = LinkState::Disconnected;
        if let Err(e) = self.writer.flush() {
            warn!("Error flushing platform port: {}", e);
        }
        joined
    }
}

impl<W: Write> Drop for PlatformSession<W> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.close() {
                warn!("Platform session ended with error: {}", e);
            }
        }
    }
}
