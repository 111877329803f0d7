//! The decoder side of the core
//!
//! One decoder thread, driven by the player through a shared-mutex command
//! protocol, pulls raw samples from a [`DecoderPlugin`] and produces
//! uniformly formatted PCM chunks into the current song's pipe.

mod bridge;
mod control;
mod plugin;
mod thread;

pub use bridge::DecoderBridge;
pub use control::{DecoderCommand, DecoderControl, DecoderState};
pub use plugin::{default_decoder_plugins, DecoderPlugin, ToneDecoder};

pub(crate) use control::DecoderInner;
