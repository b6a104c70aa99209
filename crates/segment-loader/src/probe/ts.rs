use std::collections::HashSet;

use serde::Serialize;

use crate::container::TS_PACKET_SIZE;

const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0;
const PTS_CLOCK: f64 = 90_000.0;

/// Timing of a transport stream segment, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TsTiming {
    pub has_audio: bool,
    pub has_video: bool,
    pub audio_start: Option<f64>,
    pub video_start: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Audio,
    Video,
}

fn stream_kind(stream_type: u8) -> Option<StreamKind> {
    match stream_type {
        // H.264, H.265
        0x1b | 0x24 => Some(StreamKind::Video),
        // MPEG audio, ADTS AAC, AC-3, E-AC-3
        0x03 | 0x04 | 0x0f | 0x81 | 0x87 => Some(StreamKind::Audio),
        _ => None,
    }
}

struct Packet<'a> {
    pid: u16,
    payload_unit_start: bool,
    payload: &'a [u8],
}

fn parse_packet(packet: &[u8]) -> Option<Packet<'_>> {
    if packet.len() < 4 || packet[0] != SYNC_BYTE {
        return None;
    }
    let payload_unit_start = packet[1] & 0x40 != 0;
    let pid = (((packet[1] & 0x1f) as u16) << 8) | packet[2] as u16;
    let adaptation_field_control = (packet[3] & 0x30) >> 4;
    if adaptation_field_control & 0x01 == 0 {
        return None;
    }

    let mut offset = 4;
    if adaptation_field_control & 0x02 != 0 {
        offset += 1 + *packet.get(4)? as usize;
    }
    Some(Packet {
        pid,
        payload_unit_start,
        payload: packet.get(offset..)?,
    })
}

/// Skips the pointer field of a section-carrying payload.
fn section(payload: &[u8]) -> Option<&[u8]> {
    let pointer = *payload.first()? as usize;
    payload.get(1 + pointer..)
}

fn section_end(section: &[u8]) -> usize {
    let section_length = section
        .get(1..3)
        .map(|b| (((b[0] & 0x0f) as usize) << 8) | b[1] as usize)
        .unwrap_or_default();
    // excludes the trailing CRC
    (3 + section_length).saturating_sub(4).min(section.len())
}

fn parse_pat(payload: &[u8]) -> Option<u16> {
    let section = section(payload)?;
    if *section.first()? != 0x00 {
        return None;
    }

    let end = section_end(section);
    let mut offset = 8;
    while offset + 4 <= end {
        let program_number = u16::from_be_bytes([section[offset], section[offset + 1]]);
        if program_number != 0 {
            return Some((((section[offset + 2] & 0x1f) as u16) << 8) | section[offset + 3] as u16);
        }
        offset += 4;
    }
    None
}

fn parse_pmt(payload: &[u8]) -> Option<Vec<(u16, StreamKind)>> {
    let section = section(payload)?;
    if *section.first()? != 0x02 || section.len() < 12 {
        return None;
    }

    let end = section_end(section);
    let program_info_length = (((section[10] & 0x0f) as usize) << 8) | section[11] as usize;
    let mut offset = 12 + program_info_length;
    let mut streams = Vec::new();
    while offset + 5 <= end {
        let stream_type = section[offset];
        let pid = (((section[offset + 1] & 0x1f) as u16) << 8) | section[offset + 2] as u16;
        let es_info_length =
            (((section[offset + 3] & 0x0f) as usize) << 8) | section[offset + 4] as usize;
        if let Some(kind) = stream_kind(stream_type) {
            streams.push((pid, kind));
        }
        offset += 5 + es_info_length;
    }
    Some(streams)
}

/// PTS of a PES header, in 90kHz ticks.
fn parse_pts(pes: &[u8]) -> Option<u64> {
    if pes.get(0..3)? != [0x00, 0x00, 0x01] {
        return None;
    }
    let pts_dts_flags = *pes.get(7)? & 0xc0;
    if pts_dts_flags & 0x80 == 0 {
        return None;
    }

    let p = pes.get(9..14)?;
    Some(
        ((p[0] as u64 & 0x0e) << 29)
            | ((p[1] as u64) << 22)
            | ((p[2] as u64 & 0xfe) << 14)
            | ((p[3] as u64) << 7)
            | ((p[4] as u64 & 0xfe) >> 1),
    )
}

/// Offset of the first packet boundary confirmed by the next sync byte.
fn sync_offset(bytes: &[u8]) -> Option<usize> {
    (0..bytes.len().min(TS_PACKET_SIZE)).find(|&i| {
        bytes[i] == SYNC_BYTE
            && bytes
                .get(i + TS_PACKET_SIZE)
                .map_or(true, |next| *next == SYNC_BYTE)
    })
}

fn min_start(current: Option<f64>, pts: u64) -> Option<f64> {
    let seconds = pts as f64 / PTS_CLOCK;
    Some(current.map_or(seconds, |current| current.min(seconds)))
}

/// Finds the program, its elementary streams and their earliest PTS.
///
/// `None` when no program map could be read or no timestamp was found.
pub fn inspect(bytes: &[u8]) -> Option<TsTiming> {
    let start = sync_offset(bytes)?;

    let mut pmt_pid = None;
    let mut audio_pids = HashSet::new();
    let mut video_pids = HashSet::new();
    let mut has_pmt = false;
    let mut timing = TsTiming::default();

    for packet in bytes[start..].chunks_exact(TS_PACKET_SIZE) {
        let Some(packet) = parse_packet(packet) else {
            continue;
        };
        if !packet.payload_unit_start {
            continue;
        }

        if packet.pid == PAT_PID {
            pmt_pid = pmt_pid.or_else(|| parse_pat(packet.payload));
        } else if Some(packet.pid) == pmt_pid {
            if has_pmt {
                continue;
            }
            if let Some(streams) = parse_pmt(packet.payload) {
                has_pmt = true;
                for (pid, kind) in streams {
                    match kind {
                        StreamKind::Audio => audio_pids.insert(pid),
                        StreamKind::Video => video_pids.insert(pid),
                    };
                }
                timing.has_audio = !audio_pids.is_empty();
                timing.has_video = !video_pids.is_empty();
            }
        } else if audio_pids.contains(&packet.pid) {
            if let Some(pts) = parse_pts(packet.payload) {
                timing.audio_start = min_start(timing.audio_start, pts);
            }
        } else if video_pids.contains(&packet.pid) {
            if let Some(pts) = parse_pts(packet.payload) {
                timing.video_start = min_start(timing.video_start, pts);
            }
        }
    }

    if !has_pmt || (timing.audio_start.is_none() && timing.video_start.is_none()) {
        return None;
    }
    Some(timing)
}
