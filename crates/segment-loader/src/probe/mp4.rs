use std::collections::HashMap;

use super::DEFAULT_TIMESCALE;

/// Reads a box header: `(total_box_size, fourcc, header_size)`.
///
/// Handles 32-bit sizes, 64-bit extended sizes (`size == 1`) and boxes
/// extending to the end of the data (`size == 0`).
fn read_box_header(data: &[u8]) -> Option<(usize, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }

    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let fourcc = [data[4], data[5], data[6], data[7]];
    match size {
        0 => Some((data.len(), fourcc, 8)),
        1 => {
            let extended = data.get(8..16)?;
            let size = u64::from_be_bytes(extended.try_into().ok()?);
            Some((usize::try_from(size).ok()?, fourcc, 16))
        }
        size => Some((size as usize, fourcc, 8)),
    }
}

/// Bodies of every box reached by following `path` from the top level of `data`.
pub fn find_boxes<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Vec<&'a [u8]> {
    let Some((first, rest)) = path.split_first() else {
        return Vec::new();
    };

    let mut results = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let Some((size, fourcc, header)) = read_box_header(&data[offset..]) else {
            break;
        };
        if size < header || size > data.len() - offset {
            break;
        }

        let body = &data[offset + header..offset + size];
        if &fourcc == *first {
            if rest.is_empty() {
                results.push(body);
            } else {
                results.extend(find_boxes(body, rest));
            }
        }
        offset += size;
    }
    results
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

/// `track_ID` of a `tkhd` body.
fn track_id(tkhd: &[u8]) -> Option<u32> {
    let version = *tkhd.first()?;
    read_u32(tkhd, if version == 0 { 12 } else { 20 })
}

fn first_track_id(trak: &[u8]) -> Option<u32> {
    find_boxes(trak, &[b"tkhd"])
        .first()
        .and_then(|tkhd| track_id(tkhd))
}

pub fn timescales(init: &[u8]) -> HashMap<u32, u32> {
    let mut result = HashMap::new();
    for trak in find_boxes(init, &[b"moov", b"trak"]) {
        let Some(id) = first_track_id(trak) else {
            continue;
        };
        let timescale = find_boxes(trak, &[b"mdia", b"mdhd"])
            .first()
            .and_then(|mdhd| {
                let version = *mdhd.first()?;
                read_u32(mdhd, if version == 0 { 12 } else { 20 })
            });
        if let Some(timescale) = timescale {
            result.insert(id, timescale);
        }
    }
    result
}

pub fn video_track_ids(init: &[u8]) -> Vec<u32> {
    find_boxes(init, &[b"moov", b"trak"])
        .into_iter()
        .filter(|trak| {
            find_boxes(trak, &[b"mdia", b"hdlr"])
                .first()
                .and_then(|hdlr| hdlr.get(8..12))
                .is_some_and(|handler| handler == b"vide")
        })
        .filter_map(first_track_id)
        .collect()
}

/// Minimum `baseMediaDecodeTime` over every `traf`, in seconds. `0.0` when none is found.
pub fn start_time(timescales: &HashMap<u32, u32>, fragment: &[u8]) -> f64 {
    find_boxes(fragment, &[b"moof", b"traf"])
        .into_iter()
        .filter_map(|traf| {
            let id = find_boxes(traf, &[b"tfhd"])
                .first()
                .and_then(|tfhd| read_u32(tfhd, 4))?;
            let scale = timescales
                .get(&id)
                .copied()
                .filter(|scale| *scale > 0)
                .unwrap_or(DEFAULT_TIMESCALE);
            let tfdt = *find_boxes(traf, &[b"tfdt"]).first()?;
            let base_media_decode_time = match tfdt.first()? {
                1 => read_u64(tfdt, 4)?,
                _ => read_u32(tfdt, 4)? as u64,
            };
            Some(base_media_decode_time as f64 / scale as f64)
        })
        .reduce(f64::min)
        .filter(|start| start.is_finite())
        .unwrap_or(0.0)
}
