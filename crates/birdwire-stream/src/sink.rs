//! The delivery seam shared by both consumption models.
//!
//! Protocol logic — read a frame, skip keep-alives, classify, decode — is
//! written once in [`pump`]; the two delivery variants differ only in the
//! [`RecordSink`] they plug into it (bounded queues vs. inline callbacks).

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use birdwire_core::records::DisconnectRecord;
use birdwire_core::{StreamError, StreamRecord, SystemMessage, TweetRecord};

use crate::classify::RecordClassifier;
use crate::frames::FrameReader;

/// Returned by a sink when its consumer is gone and nothing further can
/// be delivered.
#[derive(Debug)]
pub struct SinkClosed;

/// Where classified records go. One implementation pushes to bounded
/// queues, the other invokes caller-supplied callbacks inline.
#[async_trait]
pub trait RecordSink: Send {
    async fn tweet(&mut self, record: TweetRecord) -> Result<(), SinkClosed>;

    async fn system(&mut self, message: SystemMessage) -> Result<(), SinkClosed>;

    /// Deliver a transient error. The stream continues afterwards.
    async fn transient(&mut self, error: StreamError) -> Result<(), SinkClosed>;
}

/// Why the pump stopped.
pub(crate) enum PumpEnd {
    /// The byte stream ended without a disconnection record.
    Eof,
    /// The sink reported its consumer gone.
    SinkClosed,
    /// The server sent an in-band disconnection record.
    Disconnect(DisconnectRecord),
    /// Reading failed (transport error, forced close, oversized frame).
    Terminal(StreamError),
}

/// Drive the reader until something ends the stream, delivering every
/// record to `sink` in arrival order. Each frame read — keep-alives
/// included — reports liveness through `activity`.
pub(crate) async fn pump(
    reader: &mut FrameReader,
    classifier: &RecordClassifier,
    sink: &mut dyn RecordSink,
    activity: Option<&watch::Sender<Instant>>,
) -> PumpEnd {
    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return PumpEnd::Eof,
            Err(e) => return PumpEnd::Terminal(e),
        };
        if let Some(tx) = activity {
            let _ = tx.send(Instant::now());
        }
        if frame.is_empty() {
            trace!("keep-alive frame");
            continue;
        }
        let delivered = match classifier.classify(&frame) {
            Err(e) => sink.transient(e.into()).await,
            Ok(StreamRecord::Tweet(record)) => sink.tweet(record).await,
            Ok(StreamRecord::System(message)) => sink.system(message).await,
            Ok(StreamRecord::Disconnect(record)) => return PumpEnd::Disconnect(record),
        };
        if delivered.is_err() {
            return PumpEnd::SinkClosed;
        }
    }
}
