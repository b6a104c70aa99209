use bytes::Bytes;

use super::{
    detect_container, id3_tag_size, is_adts_sync, is_id3, is_mp3_sync, ContainerType,
    TS_PACKET_SIZE, TS_SYNC_BYTE,
};
use crate::{
    error::SegmentError,
    request::{fetch, RequestOptions, Transport},
    util::range::ByteRange,
};

const PROBE_LENGTH: u64 = 10;

async fn fetch_range(
    transport: &dyn Transport,
    base: &RequestOptions,
    range: ByteRange,
) -> Result<Bytes, SegmentError> {
    let options = base.clone().byte_range(Some(range));
    Ok(fetch(transport, options).await?.body)
}

/// Classifies a remote resource from a few ranged requests instead of downloading it.
///
/// `base` supplies the uri, headers and timeout shared by every probe request.
/// Any range it carries is replaced.
pub async fn probe_container(
    transport: &dyn Transport,
    base: &RequestOptions,
) -> Result<Option<ContainerType>, SegmentError> {
    let head = fetch_range(transport, base, ByteRange::sized(0, PROBE_LENGTH)).await?;

    if is_id3(&head) {
        let offset = id3_tag_size(&head) as u64;
        tracing::debug!(uri = %base.uri, offset, "ID3 tag found, probing frame sync.");
        let frame = fetch_range(transport, base, ByteRange::sized(offset, 2)).await?;
        let container = if is_mp3_sync(&frame) {
            Some(ContainerType::Mp3)
        } else if is_adts_sync(&frame) {
            Some(ContainerType::Aac)
        } else {
            None
        };
        return Ok(container);
    }

    match detect_container(&head) {
        Some(ContainerType::Ts) => {
            // servers ignoring the range header already sent the next packet
            let next = if head.len() > TS_PACKET_SIZE {
                head.slice(TS_PACKET_SIZE..TS_PACKET_SIZE + 1)
            } else {
                fetch_range(transport, base, ByteRange::sized(TS_PACKET_SIZE as u64, 1)).await?
            };
            Ok((next.first() == Some(&TS_SYNC_BYTE)).then_some(ContainerType::Ts))
        }
        container => Ok(container),
    }
}
