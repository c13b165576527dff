//! Typed control commands consumed by the scheduler between cycles.
//!
//! In-process callers send [`Command`]s through a bounded channel. Other
//! processes keep using the marker files; [`MarkerBridge`] turns those into the
//! same commands once per tick. Termination signals arrive as [`Command::Stop`]
//! through [`stop_on_termination_signals`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::exit_codes;

use crate::io::markers::{Markers, StartTrigger};

/// Commands queued beyond this block the sender until the scheduler drains them.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End the loop after the current cycle.
    Stop,
    Pause,
    Resume,
    /// Run a cycle at the next tick, even while paused.
    Start(StartTrigger),
    SubmitIdea {
        text: String,
        priority: i64,
        start_now: bool,
    },
    ApproveIdea(String),
    RejectIdea(String),
    SetPriority {
        id: String,
        priority: i64,
    },
}

impl Command {
    /// Commands that should cut the inter-cycle wait short.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Command::Stop | Command::Start(_))
    }
}

/// The scheduler is gone; the command was not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlClosed(pub Command);

impl std::fmt::Display for ControlClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scheduler is no longer accepting commands ({:?})", self.0)
    }
}

impl std::error::Error for ControlClosed {}

/// Cheap, cloneable handle for sending commands to the scheduler.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: SyncSender<Command>,
}

impl CommandSender {
    /// Send, blocking while the queue is full.
    pub fn send(&self, command: Command) -> Result<(), ControlClosed> {
        self.tx.send(command).map_err(|err| ControlClosed(err.0))
    }

    /// Send without blocking. Returns `Ok(false)` when the queue is full.
    pub fn try_send(&self, command: Command) -> Result<bool, ControlClosed> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(command)) => Err(ControlClosed(command)),
        }
    }
}

/// Receiving side, owned by the scheduler.
#[derive(Debug)]
pub struct CommandQueue {
    rx: Receiver<Command>,
    // Keeps the channel open so waits never observe a disconnect.
    _keepalive: SyncSender<Command>,
}

pub fn command_channel() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::sync_channel(COMMAND_QUEUE_CAPACITY);
    let sender = CommandSender { tx: tx.clone() };
    (
        sender,
        CommandQueue {
            rx,
            _keepalive: tx,
        },
    )
}

impl CommandQueue {
    /// Everything queued right now, in send order.
    pub fn drain(&self) -> Vec<Command> {
        self.rx.try_iter().collect()
    }

    /// Block up to `timeout` for the next command.
    pub fn wait(&self, timeout: Duration) -> Option<Command> {
        match self.rx.recv_timeout(timeout) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Translates the presence-based marker files into commands.
///
/// The pause marker is not translated: it is the pause state itself, read
/// directly through [`Markers::is_paused`].
#[derive(Debug, Clone)]
pub struct MarkerBridge {
    markers: Markers,
}

impl MarkerBridge {
    pub fn new(markers: Markers) -> Self {
        Self { markers }
    }

    /// Consume the stop and start markers, if present.
    pub fn poll(&self) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        if self.markers.take_stop()? {
            debug!("stop marker observed");
            commands.push(Command::Stop);
        }
        if let Some(trigger) = self.markers.take_start()? {
            debug!(trigger = trigger.as_marker(), "start marker observed");
            commands.push(Command::Start(trigger));
        }
        Ok(commands)
    }
}

/// What the signal handler does with a received signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Stop was queued; the loop exits after the current cycle.
    StopQueued,
    /// A repeated signal; the process exits without waiting.
    ExitNow,
}

/// Turns SIGINT/SIGTERM into a graceful [`Command::Stop`].
#[derive(Debug)]
pub struct TerminationHandler {
    sender: CommandSender,
    received: u32,
}

impl TerminationHandler {
    pub fn new(sender: CommandSender) -> Self {
        Self {
            sender,
            received: 0,
        }
    }

    pub fn on_signal(&mut self) -> SignalAction {
        self.received += 1;
        if self.received > 1 {
            warn!("second termination signal; exiting without waiting for the cycle");
            return SignalAction::ExitNow;
        }
        info!("termination signal received; stopping after the current cycle");
        match self.sender.try_send(Command::Stop) {
            Ok(true) => {}
            Ok(false) => warn!("command queue full; stop not queued"),
            Err(err) => warn!(err = %err, "stop not delivered"),
        }
        SignalAction::StopQueued
    }
}

/// Route SIGINT and SIGTERM to the scheduler as [`Command::Stop`].
///
/// May be installed once per process.
pub fn stop_on_termination_signals(sender: CommandSender) -> Result<()> {
    let mut handler = TerminationHandler::new(sender);
    ctrlc::set_handler(move || {
        if handler.on_signal() == SignalAction::ExitNow {
            std::process::exit(exit_codes::INTERRUPTED);
        }
    })
    .context("install termination signal handler")
}
