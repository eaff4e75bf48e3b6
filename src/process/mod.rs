//! Process execution plane

pub mod constrained;
pub mod environment;
pub mod escape;
pub mod runner;

pub use constrained::ConstrainedProcessRunner;
pub use environment::EnvironmentBlock;
pub use escape::escape_arguments;
pub use runner::{
    ExitCallback, LocalProcessRunner, OutputCallback, ProcessHandle, ProcessRunSpec, ProcessRunner,
};
