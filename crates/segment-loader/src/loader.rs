pub mod state;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use self::state::{AggregateState, FetchOutcome, Transition};
use crate::{
    config::LoaderOptions,
    decrypt::Decrypter,
    dispatch::{Collaborators, DispatchState, Dispatcher, SegmentEvent, SegmentObserver},
    error::{LoaderResult, SegmentError},
    handler::{self, InitContext},
    probe::{DefaultProbe, MediaProbe},
    progress::ProgressiveAccumulator,
    request::{
        spawn_request, BeforeSend, FetchEvent, HttpTransport, RequestKind, RequestOptions,
        RequestSet, RequestStats, ResponseType, Transport,
    },
    segment::Segment,
    transmux::{AlignmentHints, CaptionParser, SharedCaptionParser, Transmuxer},
    util::range::ByteRange,
};

/// Correlation ids are unique per process so loaders can share a decrypter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A failed load, along with the segment as it was when the error happened.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SegmentFailure {
    pub error: SegmentError,
    pub segment: Box<Segment>,
}

pub type SegmentOutcome = Result<Segment, SegmentFailure>;

/// Loads segments: fetches their key, init segment and payload concurrently,
/// decrypts and dispatches the payload.
///
/// ```text
/// ┌─────────┐  key / map / media   ┌──────────┐
/// │         ├──────────────────────► Handlers │ validate, stage
/// │         │   (1..3 requests)    └────┬─────┘
/// │ Segment │                           │ all done
/// │ Loader  │  progress chunks     ┌────▼─────┐      ┌───────────┐
/// │         ├──────────────────────► Driver   ├──────► Decrypter │ [worker]
/// │         │                      │ [MPSC]   ◄──────┤           │
/// └─────────┘                      └────┬─────┘      └───────────┘
///                                       │ partial / full appends
///                                  ┌────▼─────┐
///                                  │ Dispatch ├──► fmp4 | remux | pass-through
///                                  └──────────┘
/// ```
pub struct SegmentLoader {
    transport: Arc<dyn Transport>,
    decrypter: Option<Decrypter>,
    collaborators: Collaborators,
    options: LoaderOptions,
    headers: HeaderMap,
    before_send: Option<BeforeSend>,
}

impl SegmentLoader {
    pub fn builder() -> SegmentLoaderBuilder {
        SegmentLoaderBuilder::new()
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    fn request_options(
        &self,
        uri: &Url,
        byte_range: Option<ByteRange>,
        response_type: ResponseType,
    ) -> RequestOptions {
        RequestOptions::new(uri.clone())
            .byte_range(byte_range)
            .response_type(response_type)
            .timeout(self.options.timeout())
            .headers(self.headers.clone())
            .before_send(self.before_send.clone())
    }

    /// Starts loading `segment`. Events are reported to `observer` while the
    /// returned request resolves to the outcome.
    ///
    /// Must be called within a tokio runtime.
    pub fn load<O>(&self, mut segment: Segment, observer: O) -> SegmentRequest
    where
        O: SegmentObserver,
    {
        segment.request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let uri = segment.uri.clone();
        let snapshot = segment.clone();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        if segment.is_encrypted() && self.decrypter.is_none() {
            let error = SegmentError::failure(
                &uri,
                None,
                format!("no decrypter configured for encrypted segment at URL: {uri}"),
            );
            _ = outcome_tx.send(Err(SegmentFailure {
                error,
                segment: Box::new(segment),
            }));
            return SegmentRequest::new(uri, RequestSet::default(), outcome_rx, snapshot);
        }

        let init = InitContext {
            probe: self.collaborators.probe.as_ref(),
            captions: self.collaborators.captions.as_ref(),
        };
        // a caller supplied init segment still needs probing
        if let Some(map) = segment.map.as_mut() {
            if map.timescales.is_empty() {
                if let Some(bytes) = map.bytes.clone() {
                    handler::stage_init(map, bytes, &init);
                }
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut requests = RequestSet::default();
        if let Some(key) = segment.key.as_ref().filter(|key| key.bytes.is_none()) {
            let options = self.request_options(&key.uri, key.byte_range, ResponseType::Binary);
            requests.push(spawn_request(
                self.transport.clone(),
                options,
                RequestKind::Key,
                events_tx.clone(),
            ));
        }
        if let Some(map) = segment.map.as_ref().filter(|map| map.bytes.is_none()) {
            let options = self.request_options(&map.uri, map.byte_range, ResponseType::Binary);
            requests.push(spawn_request(
                self.transport.clone(),
                options,
                RequestKind::Map,
                events_tx.clone(),
            ));
        }
        let response_type = if self.options.progressive {
            ResponseType::Progressive
        } else {
            ResponseType::Binary
        };
        let options = self.request_options(&segment.uri, segment.byte_range, response_type);
        requests.push(spawn_request(
            self.transport.clone(),
            options,
            RequestKind::Segment,
            events_tx,
        ));
        tracing::debug!(uri = %uri, requests = requests.len(), id = segment.request_id, "Loading segment.");

        let driver = Driver {
            state: AggregateState::new(requests.len()),
            segment,
            requests: requests.clone(),
            collaborators: self.collaborators.clone(),
            decrypter: self.decrypter.clone(),
            observer,
            accumulator: ProgressiveAccumulator::new(),
            dispatch: DispatchState::default(),
        };
        tokio::spawn(async move {
            let outcome = driver.run(events_rx).await;
            _ = outcome_tx.send(outcome);
        });

        SegmentRequest::new(uri, requests, outcome_rx, snapshot)
    }
}

/// Handle of one segment load.
pub struct SegmentRequest {
    uri: Url,
    requests: RequestSet,
    outcome: oneshot::Receiver<SegmentOutcome>,
    snapshot: Segment,
}

impl SegmentRequest {
    fn new(
        uri: Url,
        requests: RequestSet,
        outcome: oneshot::Receiver<SegmentOutcome>,
        snapshot: Segment,
    ) -> Self {
        Self {
            uri,
            requests,
            outcome,
            snapshot,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Aborts every fetch still in flight. Idempotent.
    pub fn abort(&self) {
        self.requests.abort_all();
    }

    /// Handles to abort the load from elsewhere.
    pub fn aborter(&self) -> RequestSet {
        self.requests.clone()
    }

    /// Resolves once, with the loaded segment or the first error.
    pub async fn finish(self) -> SegmentOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SegmentFailure {
                error: SegmentError::failure(
                    &self.uri,
                    None,
                    format!("segment loader stopped at URL: {}", self.uri),
                ),
                segment: Box::new(self.snapshot),
            }),
        }
    }
}

struct Driver<O> {
    state: AggregateState,
    segment: Segment,
    requests: RequestSet,
    collaborators: Collaborators,
    decrypter: Option<Decrypter>,
    observer: O,
    accumulator: ProgressiveAccumulator,
    dispatch: DispatchState,
}

impl<O> Driver<O>
where
    O: SegmentObserver,
{
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<FetchEvent>) -> SegmentOutcome {
        while let Some(event) = events.recv().await {
            let (outcome, error) = match event {
                FetchEvent::Progress {
                    kind: RequestKind::Segment,
                    chunk,
                    stats,
                } => {
                    if self.state.is_pending() {
                        self.on_progress(chunk, stats).await;
                    }
                    continue;
                }
                FetchEvent::Progress { .. } => continue,
                FetchEvent::Completed { kind, response } => {
                    if !self.state.is_pending() {
                        continue;
                    }
                    let init = InitContext {
                        probe: self.collaborators.probe.as_ref(),
                        captions: self.collaborators.captions.as_ref(),
                    };
                    tracing::debug!(uri = %response.uri, %kind, "Request completed.");
                    match handler::handle_response(kind, &mut self.segment, response, &init) {
                        Ok(()) => (FetchOutcome::Succeeded(kind), None),
                        Err(error) => (FetchOutcome::Failed(kind), Some(error)),
                    }
                }
                FetchEvent::Failed { kind, error } => (FetchOutcome::Failed(kind), Some(error)),
            };

            match self.state.on(outcome) {
                Transition::Wait | Transition::Ignored => {}
                Transition::AbortAll => {
                    let error = error.unwrap_or_else(|| {
                        SegmentError::failure(&self.segment.uri, None, "request failed")
                    });
                    return self.fail(error);
                }
                Transition::AllDone => return self.complete().await,
            }
        }

        let uri = self.segment.uri.clone();
        self.fail(SegmentError::failure(
            &uri,
            None,
            format!("requests ended without an outcome at URL: {uri}"),
        ))
    }

    async fn on_progress(&mut self, chunk: Option<Bytes>, stats: RequestStats) {
        self.segment.stats = stats;
        self.observer
            .on_event(&self.segment, SegmentEvent::Progress(stats));

        let Some(chunk) = chunk else {
            return;
        };
        if let Some(fresh) = self.accumulator.push(&mut self.segment, &chunk) {
            let mut dispatcher = Dispatcher {
                collaborators: &self.collaborators,
                state: &mut self.dispatch,
                observer: &mut self.observer,
            };
            dispatcher.dispatch(&mut self.segment, fresh, true).await;
        }
    }

    fn fail(mut self, error: SegmentError) -> SegmentOutcome {
        self.requests.abort_all();
        self.segment.end_of_all_requests = Some(Instant::now());
        tracing::debug!(uri = %self.segment.uri, code = ?error.code, "Segment failed: {error}");
        Err(SegmentFailure {
            error,
            segment: Box::new(self.segment),
        })
    }

    async fn complete(mut self) -> SegmentOutcome {
        self.segment.end_of_all_requests = Some(Instant::now());

        if let Some(encrypted) = self.segment.encrypted_bytes.take() {
            let uri = self.segment.uri.clone();
            let (Some(decrypter), Some(key)) = (&self.decrypter, self.segment.key.as_ref()) else {
                return self.fail(SegmentError::failure(
                    &uri,
                    None,
                    format!("no decrypter configured for encrypted segment at URL: {uri}"),
                ));
            };
            let Some(words) = key.bytes else {
                return self.fail(SegmentError::failure(
                    &uri,
                    None,
                    format!("missing key for encrypted segment at URL: {uri}"),
                ));
            };

            tracing::debug!(uri = %uri, id = self.segment.request_id, "Decrypting segment.");
            match decrypter
                .decrypt(self.segment.request_id, encrypted, words, key.iv)
                .await
            {
                Ok(decrypted) => self.segment.bytes = Some(decrypted),
                Err(e) => return self.fail(SegmentError::failure(&uri, None, e.to_string())),
            }
        }

        let payload = self.segment.bytes.clone().unwrap_or_default();
        let rest = ProgressiveAccumulator::finish(&mut self.segment, &payload);
        let mut dispatcher = Dispatcher {
            collaborators: &self.collaborators,
            state: &mut self.dispatch,
            observer: &mut self.observer,
        };
        dispatcher.dispatch(&mut self.segment, rest, false).await;

        self.state.complete();
        tracing::debug!(
            uri = %self.segment.uri,
            bytes = payload.len(),
            bandwidth = self.segment.stats.bandwidth,
            "Segment loaded."
        );
        Ok(self.segment)
    }
}

pub struct SegmentLoaderBuilder {
    transport: Option<Arc<dyn Transport>>,
    decrypter: Option<Decrypter>,
    transmuxer: Option<Arc<dyn Transmuxer>>,
    probe: Arc<dyn MediaProbe>,
    captions: Option<SharedCaptionParser>,
    alignment: AlignmentHints,
    options: LoaderOptions,
    before_send: Option<BeforeSend>,
}

impl SegmentLoaderBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            decrypter: None,
            transmuxer: None,
            probe: Arc::new(DefaultProbe),
            captions: None,
            alignment: AlignmentHints::default(),
            options: LoaderOptions::default(),
            before_send: None,
        }
    }

    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn decrypter(mut self, decrypter: Decrypter) -> Self {
        self.decrypter = Some(decrypter);
        self
    }

    pub fn transmuxer<T>(mut self, transmuxer: T) -> Self
    where
        T: Transmuxer + 'static,
    {
        self.transmuxer = Some(Arc::new(transmuxer));
        self
    }

    pub fn probe<P>(mut self, probe: P) -> Self
    where
        P: MediaProbe + 'static,
    {
        self.probe = Arc::new(probe);
        self
    }

    pub fn caption_parser<C>(mut self, parser: C) -> Self
    where
        C: CaptionParser + Send + 'static,
    {
        self.captions = Some(Arc::new(Mutex::new(parser)));
        self
    }

    pub fn alignment(mut self, alignment: AlignmentHints) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RequestOptions) + Send + Sync + 'static,
    {
        self.before_send = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> LoaderResult<SegmentLoader> {
        let headers = self.options.header_map()?;
        Ok(SegmentLoader {
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(HttpTransport::default())),
            decrypter: self.decrypter,
            collaborators: Collaborators {
                transmuxer: self.transmuxer,
                probe: self.probe,
                captions: self.captions,
                alignment: self.alignment,
            },
            options: self.options,
            headers,
            before_send: self.before_send,
        })
    }
}

impl Default for SegmentLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
