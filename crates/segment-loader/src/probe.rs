//! Lightweight inspection of container bytes.
//!
//! Probing never fails. Malformed input yields empty maps, a zero start time
//! or `None`.

pub mod mp4;
pub mod ts;

use std::collections::HashMap;

pub use self::ts::TsTiming;

/// Timescale assumed for tracks the init segment does not describe.
pub const DEFAULT_TIMESCALE: u32 = 90_000;

/// Box and transport stream probe used by the pipeline.
pub trait MediaProbe: Send + Sync {
    /// track id -> timescale, read from an init segment.
    fn timescales(&self, init: &[u8]) -> HashMap<u32, u32>;

    /// Ids of the video tracks of an init segment.
    fn video_track_ids(&self, init: &[u8]) -> Vec<u32>;

    /// Earliest decode time of a media fragment, in seconds.
    fn start_time(&self, timescales: &HashMap<u32, u32>, fragment: &[u8]) -> f64;

    /// Track presence and start times of a complete transport stream segment.
    fn ts_timing(&self, bytes: &[u8]) -> Option<TsTiming>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProbe;

impl MediaProbe for DefaultProbe {
    fn timescales(&self, init: &[u8]) -> HashMap<u32, u32> {
        mp4::timescales(init)
    }

    fn video_track_ids(&self, init: &[u8]) -> Vec<u32> {
        mp4::video_track_ids(init)
    }

    fn start_time(&self, timescales: &HashMap<u32, u32>, fragment: &[u8]) -> f64 {
        mp4::start_time(timescales, fragment)
    }

    fn ts_timing(&self, bytes: &[u8]) -> Option<TsTiming> {
        ts::inspect(bytes)
    }
}
