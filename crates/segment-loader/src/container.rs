//! Container sniffing over a byte prefix.
//!
//! Signatures are checked from the most to the least specific so that weak
//! matches (a single MPEG-TS sync byte) never shadow a stronger one.

pub mod remote;

use serde::Serialize;

/// Size of one MPEG-TS packet.
pub const TS_PACKET_SIZE: usize = 188;

const TS_SYNC_BYTE: u8 = 0x47;
const ID3_HEADER_SIZE: usize = 10;
const ID3_FOOTER_FLAG: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Webm,
    Flac,
    Ogg,
    Mp3,
    Aac,
    #[serde(rename = "3gp")]
    ThreeGp,
    Mp4,
    Ts,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::ThreeGp => "3gp",
            Self::Mp4 => "mp4",
            Self::Ts => "ts",
        }
    }

    /// Containers whose samples have to go through the remux engine.
    pub fn needs_remux(&self) -> bool {
        matches!(self, Self::Ts | Self::Aac)
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type Matcher = fn(&[u8]) -> bool;

const PRECEDENCE: [(ContainerType, Matcher); 8] = [
    (ContainerType::Webm, is_webm),
    (ContainerType::Flac, is_flac),
    (ContainerType::Ogg, is_ogg),
    (ContainerType::Mp3, is_mp3),
    (ContainerType::Aac, is_aac),
    (ContainerType::ThreeGp, is_3gp),
    (ContainerType::Mp4, is_mp4),
    (ContainerType::Ts, is_ts),
];

/// Detects the container of `bytes`, or `None` when no signature matches.
pub fn detect_container(bytes: &[u8]) -> Option<ContainerType> {
    PRECEDENCE
        .iter()
        .find(|(_, matches)| matches(bytes))
        .map(|(container, _)| *container)
}

/// Whether `bytes` start with an ID3v2 tag header.
pub fn is_id3(bytes: &[u8]) -> bool {
    bytes.len() >= ID3_HEADER_SIZE && bytes.starts_with(b"ID3")
}

/// Total size of the ID3v2 tag starting at `bytes[0]`, header and footer included.
///
/// The size field is a 28-bit synchsafe integer at bytes 6..10; `bytes` must hold
/// at least the 10 byte header.
pub fn id3_tag_size(bytes: &[u8]) -> usize {
    let size = ((bytes[6] & 0x7f) as usize) << 21
        | ((bytes[7] & 0x7f) as usize) << 14
        | ((bytes[8] & 0x7f) as usize) << 7
        | (bytes[9] & 0x7f) as usize;
    if bytes[5] & ID3_FOOTER_FLAG != 0 {
        size + 20
    } else {
        size + ID3_HEADER_SIZE
    }
}

/// Offset of the first byte following every leading ID3 tag.
pub fn id3_offset(bytes: &[u8]) -> usize {
    let mut offset = 0;
    while offset < bytes.len() && is_id3(&bytes[offset..]) {
        offset += id3_tag_size(&bytes[offset..]);
    }
    offset
}

/// Whether `bytes` contain a top-level `moof` box.
pub fn is_likely_fmp4_media_segment(bytes: &[u8]) -> bool {
    let mut offset = 0;
    while offset + 8 <= bytes.len() {
        let size = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        if &bytes[offset + 4..offset + 8] == b"moof" {
            return true;
        }
        // size 0 extends to the end, 1 is a 64-bit size we never need to skip over here
        if size < 8 {
            break;
        }
        offset += size;
    }
    false
}

fn is_webm(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3])
}

fn is_flac(bytes: &[u8]) -> bool {
    bytes.starts_with(b"fLaC")
}

fn is_ogg(bytes: &[u8]) -> bool {
    bytes.starts_with(b"OggS")
}

/// MPEG audio frame sync with layer bits set to layer III.
pub fn is_mp3_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] & 0xe0 == 0xe0 && bytes[1] & 0x06 == 0x02
}

/// ADTS sync: twelve set bits followed by a zero layer.
pub fn is_adts_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] & 0xe0 == 0xe0 && bytes[1] & 0x16 == 0x10
}

fn is_mp3(bytes: &[u8]) -> bool {
    bytes
        .get(id3_offset(bytes)..)
        .map(is_mp3_sync)
        .unwrap_or(false)
}

fn is_aac(bytes: &[u8]) -> bool {
    bytes
        .get(id3_offset(bytes)..)
        .map(is_adts_sync)
        .unwrap_or(false)
}

fn is_3gp(bytes: &[u8]) -> bool {
    bytes.len() >= 10 && &bytes[4..10] == b"ftyp3g"
}

fn is_mp4(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && matches!(&bytes[4..8], b"ftyp" | b"styp") && !is_3gp(bytes)
}

fn is_ts(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if bytes.len() <= TS_PACKET_SIZE {
        return bytes[0] == TS_SYNC_BYTE;
    }
    (0..TS_PACKET_SIZE)
        .take_while(|i| i + TS_PACKET_SIZE < bytes.len())
        .any(|i| bytes[i] == TS_SYNC_BYTE && bytes[i + TS_PACKET_SIZE] == TS_SYNC_BYTE)
}
