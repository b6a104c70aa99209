use std::{collections::HashMap, time::Instant};

use bytes::Bytes;
use url::Url;

use crate::{
    container::{is_likely_fmp4_media_segment, ContainerType},
    error::{LoaderError, LoaderResult},
    request::RequestStats,
    util::range::ByteRange,
};

/// Whether the media payload is fragmented MP4, decided once from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fmp4State {
    #[default]
    Unknown,
    Fmp4,
    OtherContainer,
}

/// AES-128 key of a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentKey {
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
    /// Key material as big-endian words. Fetched when `None`.
    pub bytes: Option<[u32; 4]>,
    pub iv: [u32; 4],
}

impl SegmentKey {
    pub fn new(uri: Url, iv: [u32; 4]) -> Self {
        Self {
            uri,
            byte_range: None,
            bytes: None,
            iv,
        }
    }

    /// Parses a hex IV with an optional `0x` prefix.
    pub fn parse_iv(iv: &str) -> LoaderResult<[u32; 4]> {
        let hex = iv
            .strip_prefix("0x")
            .or_else(|| iv.strip_prefix("0X"))
            .unwrap_or(iv);
        u128::from_str_radix(hex, 16)
            .map(iv_from_u128)
            .map_err(|_| LoaderError::InvalidIv(iv.to_string()))
    }

    /// The IV implied by a media sequence number when none is given.
    pub fn iv_from_sequence(media_sequence: u64) -> [u32; 4] {
        iv_from_u128(media_sequence as u128)
    }
}

fn iv_from_u128(value: u128) -> [u32; 4] {
    [
        (value >> 96) as u32,
        (value >> 64) as u32,
        (value >> 32) as u32,
        value as u32,
    ]
}

/// Initialization segment of a fragmented stream.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSegment {
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
    /// Raw init bytes. Fetched when `None`.
    pub bytes: Option<Bytes>,
    /// track id -> timescale
    pub timescales: HashMap<u32, u32>,
    pub video_track_ids: Vec<u32>,
}

impl InitSegment {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            byte_range: None,
            bytes: None,
            timescales: HashMap::new(),
            video_track_ids: Vec::new(),
        }
    }
}

/// Everything known about one media segment.
///
/// Created by the caller, moved into a load and handed back, mutated, in its outcome.
#[derive(Debug, Clone)]
pub struct Segment {
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
    pub key: Option<SegmentKey>,
    pub map: Option<InitSegment>,

    pub fmp4: Fmp4State,
    /// Container sniffed from the first non-fmp4 bytes.
    pub container: Option<ContainerType>,

    /// Clear payload. Set after decryption for keyed segments.
    pub bytes: Option<Bytes>,
    /// Payload as received for keyed segments.
    pub encrypted_bytes: Option<Bytes>,

    pub stats: RequestStats,
    /// Progressive cursor: number of payload bytes already dispatched.
    pub last_reached_char: usize,
    /// Correlates decryption replies. Assigned when the segment is loaded.
    pub request_id: u64,
    pub end_of_all_requests: Option<Instant>,
}

impl Segment {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            byte_range: None,
            key: None,
            map: None,
            fmp4: Fmp4State::Unknown,
            container: None,
            bytes: None,
            encrypted_bytes: None,
            stats: RequestStats::default(),
            last_reached_char: 0,
            request_id: 0,
            end_of_all_requests: None,
        }
    }

    pub fn with_byte_range(mut self, byte_range: ByteRange) -> Self {
        self.byte_range = Some(byte_range);
        self
    }

    pub fn with_key(mut self, key: SegmentKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_map(mut self, map: InitSegment) -> Self {
        self.map = Some(map);
        self
    }

    /// Decides the fmp4 state from `first_bytes` unless it was already decided.
    pub fn lock_fmp4(&mut self, first_bytes: &[u8]) -> Fmp4State {
        if self.fmp4 == Fmp4State::Unknown {
            self.fmp4 = if is_likely_fmp4_media_segment(first_bytes) {
                Fmp4State::Fmp4
            } else {
                Fmp4State::OtherContainer
            };
        }
        self.fmp4
    }

    pub fn is_fmp4(&self) -> bool {
        self.fmp4 == Fmp4State::Fmp4
    }

    /// Whether the payload has to go through decryption before dispatch.
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}
