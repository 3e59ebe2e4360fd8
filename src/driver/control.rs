//! Keyboard control of a running simulation.
//!
//! Keys: `r` toggles step-by-step mode, `s` saves the scene, `d` saves the
//! keyframe graph, ESC or `q` ends the run. While step-by-step mode is on,
//! the driver pauses after every batch until a key arrives.

use crossbeam_channel::{Receiver, bounded};
use std::collections::VecDeque;
use std::io::BufRead;
use tracing::{debug, warn};

const ESC: char = '\u{1b}';
const KEY_CHANNEL_CAPACITY: usize = 16;

/// Command decoded from one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePause,
    SaveScene,
    SaveGraph,
    Quit,
    Other(char),
}

impl Command {
    pub fn from_key(key: char) -> Self {
        match key {
            'r' => Command::TogglePause,
            's' => Command::SaveScene,
            'd' => Command::SaveGraph,
            'q' | ESC => Command::Quit,
            other => Command::Other(other),
        }
    }

    /// Decode a terminal line: its first character is the key, `esc` means ESC
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().eq_ignore_ascii_case("esc") {
            return Command::Quit;
        }
        match trimmed.chars().next() {
            Some(key) => Command::from_key(key),
            None => Command::Other('\n'),
        }
    }
}

/// Source of user commands
pub trait KeySource {
    /// Next pending command, without blocking
    fn poll_key(&mut self) -> Option<Command>;

    /// Block until a command arrives; `None` once the source is closed
    fn wait_for_key(&mut self) -> Option<Command>;
}

/// Commands typed on the terminal, one per line.
///
/// A reader thread owns stdin and forwards lines over a channel, so polling
/// from the control thread never blocks.
pub struct TerminalKeys {
    lines: Receiver<String>,
}

impl TerminalKeys {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = bounded(KEY_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("terminal-keys".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                debug!("Terminal key reader finished");
            })?;
        Ok(Self { lines: rx })
    }
}

impl KeySource for TerminalKeys {
    fn poll_key(&mut self) -> Option<Command> {
        self.lines.try_recv().ok().map(|l| Command::from_line(&l))
    }

    fn wait_for_key(&mut self) -> Option<Command> {
        self.lines.recv().ok().map(|l| Command::from_line(&l))
    }
}

/// Key source that never produces a command
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeys;

impl KeySource for NoKeys {
    fn poll_key(&mut self) -> Option<Command> {
        None
    }

    fn wait_for_key(&mut self) -> Option<Command> {
        None
    }
}

/// Replays a fixed list of commands
#[derive(Debug, Clone, Default)]
pub struct ScriptedKeys {
    commands: VecDeque<Command>,
}

impl ScriptedKeys {
    pub fn new(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.commands.len()
    }
}

impl KeySource for ScriptedKeys {
    fn poll_key(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    fn wait_for_key(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Paused,
    Done,
}

/// Action the driver must carry out after a control check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    SaveScene,
    SaveGraph,
    Quit,
}

/// Control state machine, checked once per batch
pub struct Controller {
    keys: Box<dyn KeySource>,
    interactive: bool,
    step_by_step: bool,
    state: DriverState,
}

impl Controller {
    /// With `interactive` unset keys are only polled and step-by-step mode is ignored
    pub fn new(keys: Box<dyn KeySource>, interactive: bool, step_by_step: bool) -> Self {
        Self {
            keys,
            interactive,
            step_by_step,
            state: DriverState::Running,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn step_by_step(&self) -> bool {
        self.step_by_step
    }

    pub fn finish(&mut self) {
        self.state = DriverState::Done;
    }

    /// Read at most one command and return what the driver must do about it
    pub fn check(&mut self) -> Option<ControlAction> {
        if self.state == DriverState::Done {
            return None;
        }

        let command = if self.interactive && self.step_by_step {
            self.state = DriverState::Paused;
            let command = self.keys.wait_for_key();
            if command.is_none() {
                warn!("Key source closed, leaving step-by-step mode");
                self.step_by_step = false;
            }
            self.state = DriverState::Running;
            command
        } else {
            self.keys.poll_key()
        }?;

        match command {
            Command::TogglePause => {
                self.step_by_step = !self.step_by_step;
                debug!("Step-by-step mode: {}", self.step_by_step);
                None
            }
            Command::SaveScene => Some(ControlAction::SaveScene),
            Command::SaveGraph => Some(ControlAction::SaveGraph),
            Command::Quit => {
                self.state = DriverState::Done;
                Some(ControlAction::Quit)
            }
            Command::Other(_) => None,
        }
    }
}
