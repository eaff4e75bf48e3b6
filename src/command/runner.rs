//! Verb registry and uniform command execution
//!
//! Named task verbs map to command factories. Whatever a command does, the
//! caller gets back the same result triple: exit code, standard output,
//! standard error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::runner::ProcessRunner;

/// Uniform result of one task command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Ambient context a command executes against
#[derive(Clone)]
pub struct CommandContext {
    /// Runner the command launches processes through
    pub runner: Arc<dyn ProcessRunner>,

    /// Working directory for launched processes
    pub working_directory: PathBuf,

    /// Baseline environment for launched processes
    pub environment: HashMap<String, String>,
}

/// Arguments handed to a command
#[derive(Clone)]
pub struct TaskCommandArgs {
    /// Positional arguments for the verb
    pub arguments: Vec<String>,

    /// Ambient execution context
    pub context: CommandContext,
}

/// One executable task command
#[async_trait]
pub trait TaskCommand: Send + Sync {
    async fn execute(&self, args: TaskCommandArgs) -> Result<TaskCommandResult>;
}

/// Factory producing command instances for a verb
pub type CommandFactory = Arc<dyn Fn() -> Box<dyn TaskCommand> + Send + Sync>;

/// Registry dispatching verbs to commands
pub struct CommandRunner {
    commands: RwLock<HashMap<String, CommandFactory>>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Install or replace the factory for a verb.
    ///
    /// Verbs are matched case-sensitively.
    pub fn register(&self, verb: impl Into<String>, factory: CommandFactory) {
        let verb = verb.into();
        debug!("Registering command verb {:?}", verb);
        self.commands.write().insert(verb, factory);
    }

    /// Registered verbs, sorted
    pub fn verbs(&self) -> Vec<String> {
        let mut verbs: Vec<String> = self.commands.read().keys().cloned().collect();
        verbs.sort();
        verbs
    }

    /// Resolve a verb and execute its command.
    ///
    /// An unknown verb is an invalid-input failure. A command failure
    /// propagates; a non-zero exit code does not.
    pub async fn run(&self, verb: &str, args: TaskCommandArgs) -> Result<TaskCommandResult> {
        let factory = self
            .commands
            .read()
            .get(verb)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("unknown command verb {:?}", verb)))?;

        let command = factory();
        command.execute(args).await
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}
