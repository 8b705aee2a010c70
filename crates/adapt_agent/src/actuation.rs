//! Local actuation surface: the knowledge files shared with the
//! inference loop.
//!
//! Both files are single-writer / single-reader across process
//! boundaries and are replaced atomically, so the inference loop never
//! reads a half-written model name. The command file carries the most
//! recent delivery for polling pickup and is consumed once read.

use adapt_common::atomic_file::{read_token, take_token, write_atomic};
use adapt_common::{DeliveredTactic, TacticKind};
use std::io;
use std::path::{Path, PathBuf};

/// How often the command-driven loop polls the command file, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

const MODEL_FILE: &str = "model";
const COMMAND_FILE: &str = "command";

/// A command parsed back out of the command file.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub event_id: String,
    pub tactic: DeliveredTactic,
}

impl Command {
    /// Single-line encoding: `<event_id> <kind> [target]`.
    fn encode(&self) -> String {
        let kind = match self.tactic.kind {
            TacticKind::Switch => "switch",
            TacticKind::Retrain => "retrain",
        };
        match &self.tactic.target {
            Some(target) => format!("{} {} {}\n", self.event_id, kind, target),
            None => format!("{} {}\n", self.event_id, kind),
        }
    }

    fn decode(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let event_id = parts.next()?.to_string();
        let kind = match parts.next()? {
            "switch" => TacticKind::Switch,
            "retrain" => TacticKind::Retrain,
            _ => return None,
        };
        let target = parts.next().map(str::to_string);
        Some(Self {
            event_id,
            tactic: DeliveredTactic { kind, target },
        })
    }
}

/// The pair of knowledge files under one directory.
#[derive(Debug, Clone)]
pub struct ActuationSurface {
    model_file: PathBuf,
    command_file: PathBuf,
}

impl ActuationSurface {
    pub fn new(knowledge_dir: &Path) -> Self {
        Self {
            model_file: knowledge_dir.join(MODEL_FILE),
            command_file: knowledge_dir.join(COMMAND_FILE),
        }
    }

    /// Atomically point the inference loop at a new model.
    pub fn write_active_model(&self, model: &str) -> io::Result<()> {
        write_atomic(&self.model_file, &format!("{}\n", model))
    }

    pub fn read_active_model(&self) -> io::Result<Option<String>> {
        read_token(&self.model_file)
    }

    /// Leave a command for the polling loop to pick up. A newer command
    /// replaces an unconsumed older one; the loop only ever acts on the
    /// most recent delivery.
    pub fn write_command(&self, command: &Command) -> io::Result<()> {
        write_atomic(&self.command_file, &command.encode())
    }

    /// Consume the pending command, if any.
    pub fn take_command(&self) -> io::Result<Option<Command>> {
        Ok(take_token(&self.command_file)?.and_then(|line| Command::decode(&line)))
    }

    pub fn model_file(&self) -> &Path {
        &self.model_file
    }
}
