//! Ownership wrapper around the raw byte stream of one streaming response.
//!
//! The connection is owned exclusively by whichever delivery variant is
//! active and is closed exactly once on every exit path. The watchdog (or
//! any other task) closes it through a [`ConnectionHandle`], which is safe
//! to trigger concurrently with an in-progress read.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::Notify;

use birdwire_core::{RateLimit, StreamError};

/// A stream of body chunks from an open streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

struct Shared {
    closed: AtomicBool,
    notify: Notify,
}

/// An open, already-authenticated streaming connection.
pub struct StreamConnection {
    stream: ByteStream,
    rate_limit: Option<RateLimit>,
    shared: Arc<Shared>,
}

impl StreamConnection {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            rate_limit: None,
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Attach the rate-limit snapshot the response carried.
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimit>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// The rate-limit window reported on the response, if any.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    /// A handle that can close this connection from another task.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Read the next body chunk. `Ok(None)` is orderly end of input;
    /// a close through any [`ConnectionHandle`] fails the pending (and
    /// every subsequent) read with [`StreamError::Closed`].
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        let notified = self.shared.notify.notified();
        tokio::pin!(notified);
        // Register interest before re-checking the flag so a close landing
        // between the check and the await still wakes us.
        notified.as_mut().enable();
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        tokio::select! {
            _ = notified => Err(StreamError::Closed),
            chunk = self.stream.next() => match chunk {
                None => Ok(None),
                Some(Ok(bytes)) => Ok(Some(bytes)),
                Some(Err(e)) => Err(e),
            },
        }
    }
}

/// Closes the owning [`StreamConnection`]. Cloneable; `close` is a
/// single-fire signal — repeated calls are no-ops.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Close the connection. Idempotent and non-blocking; a read in
    /// flight fails with [`StreamError::Closed`].
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.notify.notify_waiters();
        }
    }

    /// Returns `true` once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
