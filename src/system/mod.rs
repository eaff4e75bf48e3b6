//! Shared system primitives

pub mod locker;
pub mod undo;

pub use locker::{Locker, LockerError};
pub use undo::UndoStack;
