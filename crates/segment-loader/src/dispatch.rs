use std::{
    collections::HashSet,
    sync::{Arc, PoisonError},
};

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    container::{detect_container, ContainerType},
    probe::MediaProbe,
    request::RequestStats,
    segment::{Fmp4State, Segment},
    transmux::{
        AlignmentHints, Caption, MediaType, MetadataEvent, SharedCaptionParser, TimingInfo,
        TrackInfo, TransmuxEvent, TransmuxRequest, Transmuxer,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingEdge {
    Start,
    End,
}

/// Decodable output of one append.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentData {
    pub media: MediaType,
    pub init: Option<Bytes>,
    pub data: Bytes,
    pub is_partial: bool,
}

/// Everything reported about a segment while it is being loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    Progress(RequestStats),
    TrackInfo(TrackInfo),
    Timing {
        media: MediaType,
        edge: TimingEdge,
        value: f64,
    },
    /// Estimated start of a fragmented MP4 segment, in seconds.
    StartTime(f64),
    Metadata(MetadataEvent),
    Captions(Vec<Caption>),
    Data(SegmentData),
}

/// Receives the events of one segment load.
pub trait SegmentObserver: Send + 'static {
    fn on_event(&mut self, segment: &Segment, event: SegmentEvent);
}

impl SegmentObserver for () {
    fn on_event(&mut self, _segment: &Segment, _event: SegmentEvent) {}
}

impl SegmentObserver for mpsc::UnboundedSender<SegmentEvent> {
    fn on_event(&mut self, _segment: &Segment, event: SegmentEvent) {
        _ = self.send(event);
    }
}

/// External collaborators bytes are dispatched to.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub transmuxer: Option<Arc<dyn Transmuxer>>,
    pub probe: Arc<dyn MediaProbe>,
    pub captions: Option<SharedCaptionParser>,
    pub alignment: AlignmentHints,
}

/// Per segment dispatch state.
#[derive(Debug, Default)]
pub(crate) struct DispatchState {
    started: bool,
    container_sniffed: bool,
    track_info_probed: bool,
    audio_start_reported: bool,
    video_start_reported: bool,
}

pub(crate) struct Dispatcher<'a, O> {
    pub collaborators: &'a Collaborators,
    pub state: &'a mut DispatchState,
    pub observer: &'a mut O,
}

impl<O> Dispatcher<'_, O>
where
    O: SegmentObserver,
{
    /// Routes one append of `segment` to the fmp4, remux or pass-through branch.
    pub async fn dispatch(&mut self, segment: &mut Segment, bytes: Bytes, is_partial: bool) {
        let first_bytes = !self.state.started;
        self.state.started = true;

        if segment.lock_fmp4(&bytes) == Fmp4State::Fmp4 {
            if is_partial {
                tracing::warn!(uri = %segment.uri, "Ignoring partial append of a fragmented MP4 segment.");
                return;
            }
            self.dispatch_fmp4(segment, bytes);
            return;
        }

        if !self.state.container_sniffed {
            self.state.container_sniffed = true;
            segment.container = detect_container(&bytes);
            tracing::debug!(uri = %segment.uri, container = ?segment.container, "Container detected.");
        }

        match (segment.container, self.collaborators.transmuxer.clone()) {
            (Some(container), Some(transmuxer)) if container.needs_remux() => {
                if first_bytes && !is_partial && container == ContainerType::Ts {
                    self.report_probed_timing(segment, &bytes);
                }
                self.dispatch_remux(segment, transmuxer.as_ref(), bytes, is_partial)
                    .await;
            }
            (container, _) => {
                tracing::debug!(uri = %segment.uri, ?container, "Passing segment through.");
            }
        }
    }

    fn emit(&mut self, segment: &Segment, event: SegmentEvent) {
        self.observer.on_event(segment, event);
    }

    fn dispatch_fmp4(&mut self, segment: &Segment, bytes: Bytes) {
        let collaborators = self.collaborators;
        let timescales = segment
            .map
            .as_ref()
            .map(|map| map.timescales.clone())
            .unwrap_or_default();
        let start = collaborators.probe.start_time(&timescales, &bytes);

        self.emit(segment, SegmentEvent::TrackInfo(TrackInfo::unknown()));
        self.emit(segment, SegmentEvent::StartTime(start));
        self.emit(
            segment,
            SegmentEvent::Data(SegmentData {
                media: MediaType::Combined,
                init: None,
                data: bytes.clone(),
                is_partial: false,
            }),
        );

        let video_track_ids = segment
            .map
            .as_ref()
            .map(|map| map.video_track_ids.as_slice())
            .unwrap_or_default();
        let Some(parser) = &collaborators.captions else {
            return;
        };
        if video_track_ids.is_empty() {
            return;
        }

        let result = {
            let mut parser = parser.lock().unwrap_or_else(PoisonError::into_inner);
            if !parser.is_initialized() {
                parser.init();
            }
            parser.parse(&bytes, video_track_ids, &timescales)
        };
        if let Some(result) = result.filter(|r| !r.captions.is_empty()) {
            self.emit(segment, SegmentEvent::Captions(result.captions));
        }
    }

    fn report_probed_timing(&mut self, segment: &Segment, bytes: &[u8]) {
        let Some(timing) = self.collaborators.probe.ts_timing(bytes) else {
            return;
        };
        tracing::debug!(uri = %segment.uri, ?timing, "Timing probed ahead of remux.");

        self.state.track_info_probed = true;
        self.emit(
            segment,
            SegmentEvent::TrackInfo(TrackInfo::new(timing.has_audio, timing.has_video)),
        );
        if let Some(start) = timing.audio_start {
            self.report_start(segment, MediaType::Audio, start);
        }
        if let Some(start) = timing.video_start {
            self.report_start(segment, MediaType::Video, start);
        }
        // The transmuxer reports no start of its own once the scan succeeded.
        self.state.audio_start_reported = true;
        self.state.video_start_reported = true;
    }

    /// Reports the start of `media` unless it has already been reported.
    fn report_start(&mut self, segment: &Segment, media: MediaType, value: f64) {
        let reported = match media {
            MediaType::Audio => &mut self.state.audio_start_reported,
            MediaType::Video => &mut self.state.video_start_reported,
            MediaType::Combined => return,
        };
        if *reported {
            return;
        }
        *reported = true;
        self.emit(
            segment,
            SegmentEvent::Timing {
                media,
                edge: TimingEdge::Start,
                value,
            },
        );
    }

    fn report_timing(&mut self, segment: &Segment, media: MediaType, timing: TimingInfo) {
        self.report_start(segment, media, timing.start);
        if let Some(end) = timing.end {
            self.emit(
                segment,
                SegmentEvent::Timing {
                    media,
                    edge: TimingEdge::End,
                    value: end,
                },
            );
        }
    }

    async fn dispatch_remux(
        &mut self,
        segment: &mut Segment,
        transmuxer: &dyn Transmuxer,
        bytes: Bytes,
        is_partial: bool,
    ) {
        let request = TransmuxRequest {
            bytes,
            is_partial,
            alignment: self.collaborators.alignment,
        };
        let mut events = transmuxer.transmux(request);
        let mut data_emitted = HashSet::new();
        let mut done = false;

        while let Some(event) = events.next().await {
            match event {
                TransmuxEvent::TrackInfo(info) => {
                    if !self.state.track_info_probed {
                        self.emit(segment, SegmentEvent::TrackInfo(info));
                    }
                }
                TransmuxEvent::AudioTiming(timing) => {
                    self.report_timing(segment, MediaType::Audio, timing)
                }
                TransmuxEvent::VideoTiming(timing) => {
                    self.report_timing(segment, MediaType::Video, timing)
                }
                TransmuxEvent::Metadata(metadata) => {
                    self.emit(segment, SegmentEvent::Metadata(metadata))
                }
                TransmuxEvent::Captions(captions) => {
                    if !captions.is_empty() {
                        self.emit(segment, SegmentEvent::Captions(captions));
                    }
                }
                TransmuxEvent::Data { media, init, data } => {
                    if !data_emitted.insert(media) {
                        tracing::warn!(uri = %segment.uri, ?media, "Dropping duplicate data event.");
                        continue;
                    }
                    self.emit(
                        segment,
                        SegmentEvent::Data(SegmentData {
                            media,
                            init,
                            data,
                            is_partial,
                        }),
                    );
                }
                TransmuxEvent::Done => {
                    if is_partial {
                        tracing::trace!(uri = %segment.uri, "Ignoring done of a partial append.");
                        continue;
                    }
                    done = true;
                    break;
                }
            }
        }

        if !is_partial && !done {
            tracing::warn!(uri = %segment.uri, "Transmuxer ended without signalling done.");
        }
    }
}
