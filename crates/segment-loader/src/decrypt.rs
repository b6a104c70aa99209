//! Message bridge to an isolated decryption worker.
//!
//! ```text
//!            DecryptMessage { source, .. }
//! Decrypter ───────────────────────────────► worker
//!     ▲                                         │
//!     │ oneshot by source                       │ DecryptReply { source, .. }
//!  pending ◄──────────── reply pump ◄───────────┘
//! ```

pub mod worker;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{LoaderError, LoaderResult};

/// Request handed to the worker. The encrypted buffer moves with it.
#[derive(Debug, Clone)]
pub struct DecryptMessage {
    pub source: u64,
    pub encrypted: Bytes,
    pub key: [u32; 4],
    pub iv: [u32; 4],
}

/// Window of a buffer holding the clear payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedView {
    pub bytes: Bytes,
    pub byte_offset: usize,
    pub byte_length: usize,
}

impl DecryptedView {
    pub fn new(bytes: Bytes) -> Self {
        let byte_length = bytes.len();
        Self {
            bytes,
            byte_offset: 0,
            byte_length,
        }
    }

    /// The viewed bytes. Out of bounds windows are clamped.
    pub fn into_bytes(self) -> Bytes {
        let start = self.byte_offset.min(self.bytes.len());
        let end = start.saturating_add(self.byte_length).min(self.bytes.len());
        self.bytes.slice(start..end)
    }
}

#[derive(Debug, Clone)]
pub struct DecryptReply {
    pub source: u64,
    pub decrypted: DecryptedView,
}

#[derive(Default)]
struct Waiters {
    by_source: HashMap<u64, oneshot::Sender<DecryptedView>>,
    /// Set once the worker stopped replying.
    closed: bool,
}

type Pending = Arc<Mutex<Waiters>>;

/// Shared handle to a decrypt worker.
///
/// Replies are matched to callers by `source`. Each outstanding call owns one
/// entry of the correlation table, removed when its reply arrives. Replies
/// nobody waits for are dropped.
#[derive(Clone)]
pub struct Decrypter {
    requests: mpsc::UnboundedSender<DecryptMessage>,
    pending: Pending,
}

impl Decrypter {
    /// Connects to a worker through its request sink and reply source.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(
        requests: mpsc::UnboundedSender<DecryptMessage>,
        mut replies: mpsc::UnboundedReceiver<DecryptReply>,
    ) -> Self {
        let pending: Pending = Default::default();

        let table = pending.clone();
        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                let waiter = table
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .by_source
                    .remove(&reply.source);
                match waiter {
                    Some(waiter) => _ = waiter.send(reply.decrypted),
                    None => tracing::trace!(source = reply.source, "Ignoring unmatched decrypt reply."),
                }
            }

            // wakes every remaining caller with a closed channel
            let mut waiters = table.lock().unwrap_or_else(PoisonError::into_inner);
            waiters.closed = true;
            waiters.by_source.clear();
        });

        Self { requests, pending }
    }

    /// Connects to a freshly spawned AES-128-CBC [`worker`].
    pub fn spawn() -> Self {
        let (requests, replies) = worker::spawn();
        Self::connect(requests, replies)
    }

    pub async fn decrypt(
        &self,
        source: u64,
        encrypted: Bytes,
        key: [u32; 4],
        iv: [u32; 4],
    ) -> LoaderResult<Bytes> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut waiters = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters.closed {
                return Err(LoaderError::DecryptWorkerClosed);
            }
            waiters.by_source.insert(source, sender);
        }

        let message = DecryptMessage {
            source,
            encrypted,
            key,
            iv,
        };
        if self.requests.send(message).is_err() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .by_source
                .remove(&source);
            return Err(LoaderError::DecryptWorkerClosed);
        }

        let view = receiver
            .await
            .map_err(|_| LoaderError::DecryptWorkerClosed)?;
        Ok(view.into_bytes())
    }

    /// Number of calls still waiting for their reply.
    pub fn outstanding(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_source
            .len()
    }
}

impl std::fmt::Debug for Decrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decrypter")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
