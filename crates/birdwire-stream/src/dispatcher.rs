//! Fan-out delivery: a background task reads, classifies and publishes
//! records onto per-kind bounded queues that the consumer drains at its
//! own pace.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use birdwire_core::{StreamError, SystemMessage, TweetRecord};

use crate::classify::{Generation, RecordClassifier};
use crate::connection::StreamConnection;
use crate::frames::FrameReader;
use crate::sink::{pump, PumpEnd, RecordSink, SinkClosed};

/// Configuration for the fan-out dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of each per-kind queue. A full queue blocks the publisher
    /// (backpressure); nothing is dropped.
    pub queue_capacity: usize,
    /// Optional per-frame size cap.
    pub max_frame_bytes: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            max_frame_bytes: None,
        }
    }
}

/// Dispatcher lifecycle. `Closed` is terminal and reached on `close()`,
/// consumer drop and natural end-of-stream alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Open,
    Running,
    Closed,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Running => write!(f, "running"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

const STATE_OPEN: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

fn state_of(raw: u8) -> DispatcherState {
    match raw {
        STATE_OPEN => DispatcherState::Open,
        STATE_RUNNING => DispatcherState::Running,
        _ => DispatcherState::Closed,
    }
}

/// Counters for records that passed through the dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherMetrics {
    pub tweets_delivered: u64,
    pub system_delivered: u64,
    pub transient_errors: u64,
}

/// The consumer's ends of the three per-kind queues. All three close when
/// the background task ends, so a multi-source wait observes closure
/// rather than blocking forever.
pub struct StreamQueues {
    pub tweets: mpsc::Receiver<TweetRecord>,
    pub system: mpsc::Receiver<SystemMessage>,
    pub errors: mpsc::Receiver<StreamError>,
}

/// Owns the connection and the background task of the fan-out variant.
///
/// Lifecycle: [`new`](Self::new) (Open) → [`start`](Self::start)
/// (Running) → Closed. `close()` is a single-fire signal, safe to call
/// repeatedly and after the task has already ended on its own.
pub struct StreamDispatcher {
    shutdown: watch::Sender<bool>,
    state: Arc<AtomicU8>,
    metrics: Arc<Mutex<DispatcherMetrics>>,
    pending: Option<Pending>,
    task: Option<JoinHandle<()>>,
}

struct Pending {
    conn: StreamConnection,
    classifier: RecordClassifier,
    config: DispatcherConfig,
    tweets_tx: mpsc::Sender<TweetRecord>,
    system_tx: mpsc::Sender<SystemMessage>,
    errors_tx: mpsc::Sender<StreamError>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StreamDispatcher {
    /// Build a dispatcher over an open connection. No task runs until
    /// [`start`](Self::start).
    pub fn new(
        conn: StreamConnection,
        generation: Generation,
        config: DispatcherConfig,
    ) -> (Self, StreamQueues) {
        let (tweets_tx, tweets_rx) = mpsc::channel(config.queue_capacity);
        let (system_tx, system_rx) = mpsc::channel(config.queue_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = Self {
            shutdown,
            state: Arc::new(AtomicU8::new(STATE_OPEN)),
            metrics: Arc::new(Mutex::new(DispatcherMetrics::default())),
            pending: Some(Pending {
                conn,
                classifier: RecordClassifier::new(generation),
                config,
                tweets_tx,
                system_tx,
                errors_tx,
                shutdown_rx,
            }),
            task: None,
        };
        let queues = StreamQueues {
            tweets: tweets_rx,
            system: system_rx,
            errors: errors_rx,
        };
        (dispatcher, queues)
    }

    /// Spawn the background task. Calling again is a no-op.
    pub fn start(&mut self) {
        let Some(pending) = self.pending.take() else {
            warn!("dispatcher already started");
            return;
        };
        self.state.store(STATE_RUNNING, Ordering::Release);
        let state = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        self.task = Some(tokio::spawn(dispatch_task(pending, state, metrics)));
    }

    /// Signal the background task to stop. Idempotent, never blocks, and a
    /// safe no-op after the task has already exited.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn state(&self) -> DispatcherState {
        state_of(self.state.load(Ordering::Acquire))
    }

    /// Snapshot of the delivery counters.
    pub fn metrics(&self) -> DispatcherMetrics {
        *self.metrics.lock().unwrap()
    }

    /// Wait for the background task to finish. Returns immediately if it
    /// never started or already ended.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

async fn dispatch_task(
    pending: Pending,
    state: Arc<AtomicU8>,
    metrics: Arc<Mutex<DispatcherMetrics>>,
) {
    let Pending {
        conn,
        classifier,
        config,
        tweets_tx,
        system_tx,
        errors_tx,
        mut shutdown_rx,
    } = pending;

    let mut reader = FrameReader::new(conn, config.max_frame_bytes);
    let handle = reader.handle();
    let mut sink = QueueSink {
        tweets_tx,
        system_tx,
        errors_tx: errors_tx.clone(),
        shutdown_rx: shutdown_rx.clone(),
        metrics,
    };

    let end = tokio::select! {
        end = pump(&mut reader, &classifier, &mut sink, None) => end,
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            debug!("close requested");
            PumpEnd::SinkClosed
        }
    };

    match end {
        PumpEnd::Eof => info!("stream ended"),
        PumpEnd::SinkClosed => {}
        PumpEnd::Disconnect(record) => {
            warn!(
                disconnects = record.disconnects.len(),
                issues = record.issues.len(),
                "server disconnected the stream"
            );
            let terminal = StreamError::Disconnected {
                disconnects: record.disconnects,
                issues: record.issues,
            };
            let _ = publish(&errors_tx, terminal, &mut shutdown_rx).await;
        }
        PumpEnd::Terminal(e) => {
            warn!(error = %e, "stream read failed");
            let _ = publish(&errors_tx, e, &mut shutdown_rx).await;
        }
    }

    // Last acts, in order: the connection, then the queues.
    handle.close();
    drop(reader);
    state.store(STATE_CLOSED, Ordering::Release);
}

struct QueueSink {
    tweets_tx: mpsc::Sender<TweetRecord>,
    system_tx: mpsc::Sender<SystemMessage>,
    errors_tx: mpsc::Sender<StreamError>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<Mutex<DispatcherMetrics>>,
}

/// Blocking publish with backpressure, interruptible by the shutdown
/// signal so `close()` also unblocks a publisher stuck on a full queue.
async fn publish<T: Send>(
    tx: &mpsc::Sender<T>,
    value: T,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), SinkClosed> {
    tokio::select! {
        sent = tx.send(value) => sent.map_err(|_| SinkClosed),
        _ = shutdown_rx.wait_for(|stop| *stop) => Err(SinkClosed),
    }
}

#[async_trait]
impl RecordSink for QueueSink {
    async fn tweet(&mut self, record: TweetRecord) -> Result<(), SinkClosed> {
        publish(&self.tweets_tx, record, &mut self.shutdown_rx).await?;
        self.metrics.lock().unwrap().tweets_delivered += 1;
        Ok(())
    }

    async fn system(&mut self, message: SystemMessage) -> Result<(), SinkClosed> {
        publish(&self.system_tx, message, &mut self.shutdown_rx).await?;
        self.metrics.lock().unwrap().system_delivered += 1;
        Ok(())
    }

    async fn transient(&mut self, error: StreamError) -> Result<(), SinkClosed> {
        publish(&self.errors_tx, error, &mut self.shutdown_rx).await?;
        self.metrics.lock().unwrap().transient_errors += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn connection_of(chunks: &[&str]) -> StreamConnection {
        let items: Vec<Result<Bytes, StreamError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        StreamConnection::new(Box::pin(futures::stream::iter(items)))
    }

    #[tokio::test]
    async fn delivers_tweets_in_order_then_closes_queues() {
        let conn = connection_of(&[
            "{\"data\":{\"id\":\"1\",\"text\":\"a\"}}\r\n",
            "{\"data\":{\"id\":\"2\",\"text\":\"b\"}}\r\n",
            "{\"data\":{\"id\":\"3\",\"text\":\"c\"}}\r\n",
        ]);
        let (mut dispatcher, mut queues) =
            StreamDispatcher::new(conn, Generation::V2, DispatcherConfig::default());
        dispatcher.start();

        for expected in ["1", "2", "3"] {
            let record = queues.tweets.recv().await.expect("tweet expected");
            assert_eq!(record.data.id, expected);
        }
        assert!(queues.tweets.recv().await.is_none());
        assert!(queues.system.recv().await.is_none());
        assert!(queues.errors.recv().await.is_none());

        dispatcher.join().await;
        assert_eq!(dispatcher.state(), DispatcherState::Closed);
        assert_eq!(dispatcher.metrics().tweets_delivered, 3);
    }

    #[tokio::test]
    async fn keepalives_only_yield_nothing() {
        let conn = connection_of(&["\r\n\r\n\r\n"]);
        let (mut dispatcher, mut queues) =
            StreamDispatcher::new(conn, Generation::V2, DispatcherConfig::default());
        dispatcher.start();

        assert!(queues.tweets.recv().await.is_none());
        assert!(queues.errors.recv().await.is_none());
        dispatcher.join().await;
        let metrics = dispatcher.metrics();
        assert_eq!(metrics.tweets_delivered, 0);
        assert_eq!(metrics.transient_errors, 0);
    }

    #[tokio::test]
    async fn decode_error_is_published_and_stream_continues() {
        let conn = connection_of(&[
            "{broken\r\n",
            "{\"data\":{\"id\":\"1\",\"text\":\"after\"}}\r\n",
        ]);
        let (mut dispatcher, mut queues) =
            StreamDispatcher::new(conn, Generation::V2, DispatcherConfig::default());
        dispatcher.start();

        let err = queues.errors.recv().await.expect("error expected");
        assert!(err.is_transient());
        let record = queues.tweets.recv().await.expect("tweet expected");
        assert_eq!(record.data.id, "1");
        dispatcher.join().await;
        assert_eq!(dispatcher.metrics().transient_errors, 1);
    }

    #[tokio::test]
    async fn system_messages_use_their_own_queue() {
        let conn = connection_of(&[
            "{\"data\":{\"id\":\"1\",\"text\":\"a\"}}\r\n",
            "{\"info\":{\"message\":\"stall warning cleared\"}}\r\n",
        ]);
        let (mut dispatcher, mut queues) =
            StreamDispatcher::new(conn, Generation::V1, DispatcherConfig::default());
        dispatcher.start();

        assert_eq!(queues.tweets.recv().await.unwrap().data.id, "1");
        let message = queues.system.recv().await.expect("system message expected");
        assert_eq!(message.message, "stall warning cleared");
        dispatcher.join().await;
    }

    #[tokio::test]
    async fn disconnect_record_publishes_terminal_error_and_ends() {
        let conn = connection_of(&[
            "{\"errors\":[{\"title\":\"operational-disconnect\",\"disconnect_type\":\"UpstreamOperationalDisconnect\"}]}\r\n",
            "{\"data\":{\"id\":\"never\",\"text\":\"delivered\"}}\r\n",
        ]);
        let (mut dispatcher, mut queues) =
            StreamDispatcher::new(conn, Generation::V2, DispatcherConfig::default());
        dispatcher.start();

        let err = queues.errors.recv().await.expect("terminal error expected");
        assert!(matches!(err, StreamError::Disconnected { .. }));
        // Nothing after the disconnection reaches the tweet queue.
        assert!(queues.tweets.recv().await.is_none());
        dispatcher.join().await;
        assert_eq!(dispatcher.state(), DispatcherState::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_unblocks_pending_read() {
        let conn = StreamConnection::new(Box::pin(futures::stream::pending::<Result<Bytes, StreamError>>()));
        let (mut dispatcher, _queues) =
            StreamDispatcher::new(conn, Generation::V2, DispatcherConfig::default());
        dispatcher.start();

        dispatcher.close();
        dispatcher.close();
        tokio::time::timeout(Duration::from_secs(1), dispatcher.join())
            .await
            .expect("dispatcher task did not stop");
        assert_eq!(dispatcher.state(), DispatcherState::Closed);

        // Closing after the task already ended stays a no-op.
        dispatcher.close();
    }

    #[tokio::test]
    async fn close_unblocks_publisher_stuck_on_full_queue() {
        let conn = connection_of(&[
            "{\"data\":{\"id\":\"1\",\"text\":\"a\"}}\r\n",
            "{\"data\":{\"id\":\"2\",\"text\":\"b\"}}\r\n",
            "{\"data\":{\"id\":\"3\",\"text\":\"c\"}}\r\n",
        ]);
        let config = DispatcherConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let (mut dispatcher, queues) = StreamDispatcher::new(conn, Generation::V2, config);
        dispatcher.start();

        // Never drain the queues; the publisher blocks on the second tweet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.close();
        tokio::time::timeout(Duration::from_secs(1), dispatcher.join())
            .await
            .expect("publisher stayed blocked after close");
        drop(queues);
    }

    #[tokio::test]
    async fn state_transitions() {
        let conn = connection_of(&[]);
        let (mut dispatcher, _queues) =
            StreamDispatcher::new(conn, Generation::V2, DispatcherConfig::default());
        assert_eq!(dispatcher.state(), DispatcherState::Open);
        dispatcher.start();
        dispatcher.join().await;
        assert_eq!(dispatcher.state(), DispatcherState::Closed);
    }
}
