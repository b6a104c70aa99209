pub mod http;
pub mod stats;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{future::BoxFuture, stream::BoxStream, StreamExt};
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use self::http::HttpTransport;
pub use self::stats::RequestStats;
use self::stats::StatsTracker;
use crate::{
    error::{SegmentError, TransportError},
    util::range::ByteRange,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// The body is only looked at once it has been fully received.
    #[default]
    Binary,
    /// Every received chunk is handed to the progress listener.
    Progressive,
}

/// Hook invoked with the final options right before a request is handed to the transport.
pub type BeforeSend = Arc<dyn Fn(&mut RequestOptions) + Send + Sync>;

#[derive(Clone)]
pub struct RequestOptions {
    pub uri: Url,
    pub response_type: ResponseType,
    pub byte_range: Option<ByteRange>,
    /// Whole-request deadline. [`Duration::ZERO`] disables it.
    pub timeout: Duration,
    pub headers: HeaderMap,
    pub before_send: Option<BeforeSend>,
}

impl RequestOptions {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            response_type: ResponseType::Binary,
            byte_range: None,
            timeout: DEFAULT_TIMEOUT,
            headers: HeaderMap::new(),
            before_send: None,
        }
    }

    pub fn byte_range(mut self, byte_range: Option<ByteRange>) -> Self {
        self.byte_range = byte_range;
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn before_send(mut self, hook: Option<BeforeSend>) -> Self {
        self.before_send = hook;
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("uri", &self.uri.as_str())
            .field("response_type", &self.response_type)
            .field("byte_range", &self.byte_range)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .field("before_send", &self.before_send.is_some())
            .finish()
    }
}

pub struct TransportResponse {
    pub status: u16,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

/// Generic fetch primitive the request wrapper is built upon.
///
/// Implementations only move bytes. Timeouts, cancellation, statistics and
/// error normalization are layered on top by this module.
pub trait Transport: Send + Sync + 'static {
    fn fetch(
        &self,
        options: &RequestOptions,
    ) -> BoxFuture<'static, Result<TransportResponse, TransportError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Key,
    Map,
    Segment,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Key => "key",
            Self::Map => "init segment",
            Self::Segment => "segment",
        })
    }
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct Response {
    pub uri: Url,
    pub status: u16,
    pub body: Bytes,
    pub stats: RequestStats,
}

#[derive(Debug)]
pub(crate) enum FetchEvent {
    Progress {
        kind: RequestKind,
        /// Only present for [`ResponseType::Progressive`] requests.
        chunk: Option<Bytes>,
        stats: RequestStats,
    },
    Completed {
        kind: RequestKind,
        response: Response,
    },
    Failed {
        kind: RequestKind,
        error: SegmentError,
    },
}

/// Abort handle of one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    kind: RequestKind,
    uri: Url,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl RequestHandle {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Aborts the request. No-op once the request has resolved.
    pub fn abort(&self) {
        if !self.finished.load(Ordering::Acquire) {
            self.token.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Every request issued for one segment.
#[derive(Debug, Clone, Default)]
pub struct RequestSet {
    handles: Vec<RequestHandle>,
}

impl RequestSet {
    pub(crate) fn push(&mut self, handle: RequestHandle) {
        self.handles.push(handle);
    }

    pub fn abort_all(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestHandle> {
        self.handles.iter()
    }
}

/// Issues a request on its own task and reports its progress and outcome on `events`.
pub(crate) fn spawn_request(
    transport: Arc<dyn Transport>,
    options: RequestOptions,
    kind: RequestKind,
    events: mpsc::UnboundedSender<FetchEvent>,
) -> RequestHandle {
    let handle = RequestHandle {
        kind,
        uri: options.uri.clone(),
        token: CancellationToken::new(),
        finished: Arc::new(AtomicBool::new(false)),
    };

    let token = handle.token.clone();
    let finished = handle.finished.clone();
    tokio::spawn(async move {
        let uri = options.uri.clone();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SegmentError::aborted(&uri, None)),
            result = execute(transport.as_ref(), options, |chunk, stats| {
                _ = events.send(FetchEvent::Progress {
                    kind,
                    chunk: chunk.cloned(),
                    stats: *stats,
                });
            }) => result,
        };
        finished.store(true, Ordering::Release);

        let event = match result {
            Ok(response) => FetchEvent::Completed { kind, response },
            Err(error) => FetchEvent::Failed { kind, error },
        };
        // the receiver is gone once the segment has already been resolved
        _ = events.send(event);
    });

    handle
}

/// Performs a single request to completion on the current task.
pub async fn fetch(
    transport: &dyn Transport,
    options: RequestOptions,
) -> Result<Response, SegmentError> {
    execute(transport, options, |_, _| {}).await
}

async fn execute<F>(
    transport: &dyn Transport,
    mut options: RequestOptions,
    mut on_progress: F,
) -> Result<Response, SegmentError>
where
    F: FnMut(Option<&Bytes>, &RequestStats),
{
    if let Some(hook) = options.before_send.clone() {
        hook(&mut options);
    }

    tracing::debug!(uri = %options.uri, range = ?options.byte_range, "Issuing request.");
    if options.timeout.is_zero() {
        return receive(transport, &options, &mut on_progress).await;
    }
    match tokio::time::timeout(
        options.timeout,
        receive(transport, &options, &mut on_progress),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SegmentError::timeout(&options.uri, None)),
    }
}

async fn receive<F>(
    transport: &dyn Transport,
    options: &RequestOptions,
    on_progress: &mut F,
) -> Result<Response, SegmentError>
where
    F: FnMut(Option<&Bytes>, &RequestStats),
{
    let uri = &options.uri;
    let mut tracker = StatsTracker::start();

    let response = transport
        .fetch(options)
        .await
        .map_err(|e| e.into_segment_error(uri))?;
    let status = response.status;
    if !(200..300).contains(&status) {
        return Err(TransportError::Status(status).into_segment_error(uri));
    }

    let mut body = BytesMut::new();
    let mut stream = response.body;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            let mut error = e.into_segment_error(uri);
            error.status.get_or_insert(status);
            error
        })?;
        body.extend_from_slice(&chunk);

        let stats = tracker.progress(body.len());
        tracing::trace!(uri = %uri, received = body.len(), bandwidth = stats.bandwidth, "Progress.");
        match options.response_type {
            ResponseType::Progressive => on_progress(Some(&chunk), &stats),
            ResponseType::Binary => on_progress(None, &stats),
        }
    }

    let stats = tracker.finish(body.len());
    tracing::debug!(uri = %uri, bytes = stats.bytes_received, rtt = ?stats.round_trip_time, "Request finished.");
    Ok(Response {
        uri: uri.clone(),
        status,
        body: body.freeze(),
        stats,
    })
}
