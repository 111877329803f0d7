//! MixRamp analysis data
//!
//! MixRamp tags describe, for the head and tail of a song, at which time
//! offset the signal crosses a series of loudness thresholds. The decoder
//! publishes them; the cross-fade computation interpolates an overlap from
//! the previous song's end ramp and the next song's start ramp.
//!
//! The tag value is a list of `<dB> <seconds>` pairs separated by `;`,
//! ordered from quiet to loud.

/// The MixRamp tag pair of one song.
#[derive(Debug, Clone, Default)]
pub struct MixRampInfo {
    start: Option<String>,
    end: Option<String>,
}

impl MixRampInfo {
    pub fn is_defined(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn end(&self) -> Option<&str> {
        self.end.as_deref()
    }

    pub fn set_start(&mut self, value: impl Into<String>) {
        self.start = Some(value.into());
    }

    pub fn set_end(&mut self, value: impl Into<String>) {
        self.end = Some(value.into());
    }
}

/// Find the time offset where the ramp crosses `required_db`.
///
/// Returns `None` when the list is malformed or never reaches the
/// threshold. Between two surrounding entries the time is interpolated
/// linearly.
pub fn mixramp_interpolate(ramp_list: &str, required_db: f32) -> Option<f32> {
    let mut last: Option<(f32, f32)> = None;

    for entry in ramp_list.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut fields = entry.split_whitespace();
        let db: f32 = fields.next()?.parse().ok()?;
        let secs: f32 = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }

        if db == required_db {
            return Some(secs);
        }

        if db < required_db {
            // Still too quiet; remember and keep scanning.
            last = Some((db, secs));
            continue;
        }

        return Some(match last {
            // The threshold is below every listed value; use the first.
            None => secs,
            Some((last_db, last_secs)) => {
                last_secs + (required_db - last_db) * (secs - last_secs) / (db - last_db)
            }
        });
    }

    None
}
