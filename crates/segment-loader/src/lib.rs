pub mod config;
pub mod container;
pub mod decrypt;
pub mod dispatch;
pub mod error;
mod handler;
pub mod loader;
pub mod probe;
mod progress;
pub mod request;
pub mod segment;
pub mod transmux;
pub mod util;

pub use config::LoaderOptions;
pub use container::{detect_container, ContainerType};
pub use decrypt::Decrypter;
pub use dispatch::{SegmentData, SegmentEvent, SegmentObserver, TimingEdge};
pub use error::{ErrorCode, LoaderError, LoaderResult, SegmentError};
pub use loader::{SegmentFailure, SegmentLoader, SegmentLoaderBuilder, SegmentOutcome, SegmentRequest};
pub use request::{HttpTransport, RequestOptions, RequestStats, Transport};
pub use segment::{Fmp4State, InitSegment, Segment, SegmentKey};
pub use util::{http::HttpClient, range::ByteRange};
