//! Collaborators the dispatcher hands bytes to: a transmuxer for containers
//! that need remuxing and a caption parser for fragmented MP4.

use std::collections::HashMap;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;

/// Which elementary streams a segment carries. `None` means not known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrackInfo {
    pub has_audio: Option<bool>,
    pub has_video: Option<bool>,
}

impl TrackInfo {
    pub fn new(has_audio: bool, has_video: bool) -> Self {
        Self {
            has_audio: Some(has_audio),
            has_video: Some(has_video),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Presentation range of one media type, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TimingInfo {
    pub start: f64,
    pub end: Option<f64>,
}

/// Timed metadata cue, usually ID3.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataEvent {
    pub time: f64,
    #[serde(skip)]
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Caption {
    pub start_time: f64,
    pub end_time: f64,
    pub stream: String,
    pub text: String,
}

/// Remuxed output of one media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Combined,
}

/// Timing hints a transmuxer may use to align output across segments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignmentHints {
    pub base_media_decode_time: Option<f64>,
    pub keep_original_timestamps: bool,
}

#[derive(Debug, Clone)]
pub struct TransmuxRequest {
    pub bytes: Bytes,
    /// A prefix of the payload; more bytes will follow.
    pub is_partial: bool,
    pub alignment: AlignmentHints,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransmuxEvent {
    TrackInfo(TrackInfo),
    AudioTiming(TimingInfo),
    VideoTiming(TimingInfo),
    Metadata(MetadataEvent),
    Captions(Vec<Caption>),
    Data {
        media: MediaType,
        init: Option<Bytes>,
        data: Bytes,
    },
    /// Everything of the request has been emitted.
    Done,
}

/// Converts transport stream or raw audio input into playable output.
///
/// Every request is answered by a stream which ends after `Done` for
/// complete input, or when the bytes have been consumed for partial input.
pub trait Transmuxer: Send + Sync {
    fn transmux(&self, request: TransmuxRequest) -> BoxStream<'static, TransmuxEvent>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionResult {
    pub captions: Vec<Caption>,
}

/// Stateful closed caption extractor for fragmented MP4 payloads.
pub trait CaptionParser {
    fn is_initialized(&self) -> bool;

    fn init(&mut self);

    /// Returns `None` when nothing could be extracted from `bytes`.
    fn parse(
        &mut self,
        bytes: &[u8],
        video_track_ids: &[u32],
        timescales: &HashMap<u32, u32>,
    ) -> Option<CaptionResult>;
}

pub type SharedCaptionParser = std::sync::Arc<std::sync::Mutex<dyn CaptionParser + Send>>;
