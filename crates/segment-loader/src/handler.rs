use std::sync::PoisonError;

use bytes::Bytes;
use url::Url;

use crate::{
    container::{detect_container, ContainerType},
    error::SegmentError,
    probe::MediaProbe,
    request::{RequestKind, Response},
    segment::{InitSegment, Segment},
    transmux::SharedCaptionParser,
};

const KEY_LENGTH: usize = 16;

/// Collaborators needed to stage an init segment.
pub(crate) struct InitContext<'a> {
    pub probe: &'a dyn MediaProbe,
    pub captions: Option<&'a SharedCaptionParser>,
}

/// Validates a completed response and stages its payload on `segment`.
pub(crate) fn handle_response(
    kind: RequestKind,
    segment: &mut Segment,
    response: Response,
    init: &InitContext<'_>,
) -> Result<(), SegmentError> {
    match kind {
        RequestKind::Key => handle_key(segment, response),
        RequestKind::Map => handle_init(segment, response, init),
        RequestKind::Segment => handle_media(segment, response),
    }
}

/// Key material as four big-endian words.
pub(crate) fn key_words(uri: &Url, status: Option<u16>, body: &[u8]) -> Result<[u32; 4], SegmentError> {
    if body.len() != KEY_LENGTH {
        return Err(SegmentError::failure(
            uri,
            status,
            format!(
                "invalid key at URL: {uri}, expected {KEY_LENGTH} bytes but got {}",
                body.len()
            ),
        ));
    }

    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(body.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

fn handle_key(segment: &mut Segment, response: Response) -> Result<(), SegmentError> {
    let words = key_words(&response.uri, Some(response.status), &response.body)?;
    if let Some(key) = segment.key.as_mut() {
        key.bytes = Some(words);
    }
    Ok(())
}

fn handle_init(
    segment: &mut Segment,
    response: Response,
    init: &InitContext<'_>,
) -> Result<(), SegmentError> {
    let uri = &response.uri;
    if response.body.is_empty() {
        return Err(SegmentError::failure(
            uri,
            Some(response.status),
            format!("empty content for initialization segment at URL: {uri}"),
        ));
    }
    if let Some(container) = detect_container(&response.body)
        .filter(|c| !matches!(c, ContainerType::Mp4 | ContainerType::ThreeGp))
    {
        return Err(SegmentError::failure(
            uri,
            Some(response.status),
            format!("unsupported container for initialization segment ({container}) at URL: {uri}"),
        ));
    }

    if let Some(map) = segment.map.as_mut() {
        stage_init(map, response.body, init);
    }
    Ok(())
}

/// Stores init bytes along with everything probed from them.
pub(crate) fn stage_init(map: &mut InitSegment, body: Bytes, init: &InitContext<'_>) {
    map.timescales = init.probe.timescales(&body);
    map.video_track_ids = init.probe.video_track_ids(&body);
    tracing::debug!(
        uri = %map.uri,
        timescales = ?map.timescales,
        video_tracks = ?map.video_track_ids,
        "Init segment staged."
    );
    map.bytes = Some(body);

    if let Some(parser) = init.captions {
        let mut parser = parser.lock().unwrap_or_else(PoisonError::into_inner);
        if !parser.is_initialized() {
            parser.init();
        }
    }
}

fn handle_media(segment: &mut Segment, response: Response) -> Result<(), SegmentError> {
    let uri = &response.uri;
    if response.body.is_empty() {
        return Err(SegmentError::failure(
            uri,
            Some(response.status),
            format!("empty segment content at URL: {uri}"),
        ));
    }

    segment.stats = response.stats;
    if segment.is_encrypted() {
        segment.encrypted_bytes = Some(response.body);
    } else {
        segment.bytes = Some(response.body);
    }
    Ok(())
}
