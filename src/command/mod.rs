//! Task command plane

pub mod builtin;
pub mod runner;

pub use builtin::RunCommand;
pub use runner::{
    CommandContext, CommandFactory, CommandRunner, TaskCommand, TaskCommandArgs, TaskCommandResult,
};
