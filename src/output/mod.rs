//! The output side of the core
//!
//! N output threads, each with its own cursor over the shared pipe and its
//! own filter chain, draining at their own rate into black-box sinks.

mod control;
mod multiple;
mod sink;
mod source;

pub use multiple::{AudioOutputClient, MultipleOutputs, OutputSummary};
pub use sink::{default_output_plugins, NullOutputPlugin, OutputPlugin, Sink};
