//! The player side of the core
//!
//! A command-driven control surface plus the thread that owns transport
//! state, sequences songs and orchestrates cross-fades.

mod control;
mod thread;

pub use control::{PlayerControl, PlayerState, PlayerStatus};

pub(crate) use control::{CoreState, CoreSync};
