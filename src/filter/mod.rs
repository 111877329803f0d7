//! Per-output filter chain
//!
//! Every output owns its own filter instances; the pipe is the only shared
//! data path. A [`PreparedFilter`] is the closed, configuration-time form;
//! opening it for a concrete [`AudioFormat`] yields a stateful [`Filter`]
//! bound to that output's stream.

mod normalize;
mod replay_gain;

pub use normalize::PreparedNormalizeFilter;
pub use replay_gain::ReplayGainFilter;

use std::sync::Arc;

use crate::audio::AudioFormat;
use crate::error::Result;

/// A stateful, opened filter instance.
pub trait Filter: Send {
    /// The format this filter emits.
    fn out_audio_format(&self) -> AudioFormat;

    /// Process one buffer of PCM.
    fn filter(&mut self, src: &[u8]) -> Result<Vec<u8>>;

    /// Drop internal state, e.g. after a cancel.
    fn reset(&mut self) {}
}

/// A configured filter that can be opened per output stream.
pub trait PreparedFilter: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn Filter>>;
}

/// An ordered set of prepared filters, opened together.
#[derive(Clone, Default)]
pub struct PreparedFilterChain {
    filters: Vec<Arc<dyn PreparedFilter>>,
}

impl PreparedFilterChain {
    pub fn new() -> Self {
        PreparedFilterChain::default()
    }

    pub fn push(&mut self, filter: Arc<dyn PreparedFilter>) {
        self.filters.push(filter);
    }

    /// Open every filter for `format`, feeding each one the previous
    /// filter's output format. A failure drops the partially opened
    /// instances.
    pub fn open(&self, format: AudioFormat) -> Result<FilterChain> {
        let mut opened = Vec::with_capacity(self.filters.len());
        let mut current = format;
        for prepared in &self.filters {
            let filter = prepared.open(current)?;
            current = filter.out_audio_format();
            opened.push(filter);
        }
        Ok(FilterChain {
            filters: opened,
            out_format: current,
        })
    }
}

/// The opened main filter chain of one output.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    out_format: AudioFormat,
}

impl FilterChain {
    pub fn out_audio_format(&self) -> AudioFormat {
        self.out_format
    }

    pub fn filter(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        match self.filters.split_first_mut() {
            None => Ok(src.to_vec()),
            Some((first, rest)) => {
                let mut data = first.filter(src)?;
                for filter in rest {
                    data = filter.filter(&data)?;
                }
                Ok(data)
            }
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}
