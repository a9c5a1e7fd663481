//! Callback delivery: a single blocking call that reads the stream on the
//! caller's task and invokes per-kind callbacks inline, guarded by a
//! watchdog task enforcing the heartbeat and the caller's stop token.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::debug;

use birdwire_core::{StreamError, SystemMessage, TweetRecord};

use crate::classify::{Generation, RecordClassifier};
use crate::connection::{ConnectionHandle, StreamConnection};
use crate::frames::FrameReader;
use crate::sink::{pump, PumpEnd, RecordSink, SinkClosed};

/// Configuration for one run of the callback loop.
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    /// Maximum silence between frames (keep-alives included) before the
    /// connection is considered dead.
    pub heartbeat: Duration,
    /// Optional cap on the whole run; expiry behaves like a stop request.
    pub deadline: Option<Duration>,
    /// Optional per-frame size cap.
    pub max_frame_bytes: Option<usize>,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            deadline: None,
            max_frame_bytes: None,
        }
    }
}

/// The caller's callback bundle. Every handler is optional; an absent
/// handler is a no-op, not an error. Callbacks run synchronously on the
/// caller's task, in strict arrival order.
#[derive(Default)]
pub struct StreamHandlers {
    on_tweet: Option<Box<dyn FnMut(TweetRecord) + Send>>,
    on_system_message: Option<Box<dyn FnMut(SystemMessage) + Send>>,
    on_transient_error: Option<Box<dyn FnMut(StreamError) + Send>>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tweet(mut self, f: impl FnMut(TweetRecord) + Send + 'static) -> Self {
        self.on_tweet = Some(Box::new(f));
        self
    }

    pub fn on_system_message(mut self, f: impl FnMut(SystemMessage) + Send + 'static) -> Self {
        self.on_system_message = Some(Box::new(f));
        self
    }

    pub fn on_transient_error(mut self, f: impl FnMut(StreamError) + Send + 'static) -> Self {
        self.on_transient_error = Some(Box::new(f));
        self
    }
}

/// Create a stop-signal pair. The controller side fires the token; firing
/// is single-shot and idempotent.
pub fn stop_channel() -> (StopController, StopToken) {
    let (tx, rx) = watch::channel(false);
    (StopController { tx }, StopToken { rx })
}

/// Fires the paired [`StopToken`].
pub struct StopController {
    tx: watch::Sender<bool>,
}

impl StopController {
    /// Request the run to stop. Safe to call any number of times, from
    /// any task, including after the run already returned.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by the run-loop's watchdog. Cloneable.
#[derive(Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopToken {
    /// Resolves when the controller fires. Pends forever if the
    /// controller is dropped without firing — dropping is not a stop.
    pub(crate) async fn stopped(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

/// What made the watchdog close the connection.
#[derive(Debug, Clone, Copy)]
enum StopCause {
    Cancelled,
    HeartbeatExpired { idle: Duration },
}

impl StopCause {
    fn to_error(self) -> StreamError {
        match self {
            Self::Cancelled => StreamError::Cancelled,
            Self::HeartbeatExpired { idle } => StreamError::HeartbeatTimeout {
                idle_ms: idle.as_millis() as u64,
            },
        }
    }
}

/// Run the stream until a terminal condition, delivering records through
/// `handlers`, and return that condition. The call returns exactly once,
/// after the connection has been released.
///
/// Terminal conditions: an in-band disconnection record
/// ([`StreamError::Disconnected`]), the stop token or deadline
/// ([`StreamError::Cancelled`]), heartbeat silence
/// ([`StreamError::HeartbeatTimeout`]), or the transport ending or failing
/// ([`StreamError::Closed`] / [`StreamError::Transport`]).
pub async fn run_with_callbacks(
    conn: StreamConnection,
    generation: Generation,
    handlers: StreamHandlers,
    config: RunLoopConfig,
    stop: StopToken,
) -> StreamError {
    let classifier = RecordClassifier::new(generation);
    let handle = conn.handle();
    let mut reader = FrameReader::new(conn, config.max_frame_bytes);

    let (activity_tx, activity_rx) = watch::channel(Instant::now());
    let cause: Arc<OnceLock<StopCause>> = Arc::new(OnceLock::new());
    let guard = tokio::spawn(watchdog(
        activity_rx,
        config.heartbeat,
        config.deadline,
        stop,
        handle.clone(),
        Arc::clone(&cause),
    ));

    let mut sink = CallbackSink { handlers };
    let end = pump(&mut reader, &classifier, &mut sink, Some(&activity_tx)).await;

    // Release the connection on every path, then let the watchdog finish.
    handle.close();
    drop(reader);
    drop(activity_tx);
    let _ = guard.await;

    match end {
        PumpEnd::Disconnect(record) => {
            debug!(
                disconnects = record.disconnects.len(),
                issues = record.issues.len(),
                "in-band disconnection"
            );
            StreamError::Disconnected {
                disconnects: record.disconnects,
                issues: record.issues,
            }
        }
        // A failed read maps to the watchdog's recorded cause when there
        // is one; the raw error otherwise.
        PumpEnd::Terminal(e) => match cause.get() {
            Some(recorded) => recorded.to_error(),
            None => e,
        },
        PumpEnd::Eof | PumpEnd::SinkClosed => match cause.get() {
            Some(recorded) => recorded.to_error(),
            None => StreamError::Closed,
        },
    }
}

/// Waits on whichever comes first — the stop token, the run deadline, or
/// heartbeat silence — then records the cause and closes the connection.
/// Exits silently when the run-loop finishes on its own.
async fn watchdog(
    mut activity: watch::Receiver<Instant>,
    heartbeat: Duration,
    deadline: Option<Duration>,
    mut stop: StopToken,
    conn: ConnectionHandle,
    cause: Arc<OnceLock<StopCause>>,
) {
    let hard_deadline = deadline.map(|d| Instant::now() + d);
    loop {
        let last = *activity.borrow_and_update();
        tokio::select! {
            _ = stop.stopped() => {
                let _ = cause.set(StopCause::Cancelled);
                conn.close();
                return;
            }
            _ = sleep_until_opt(hard_deadline) => {
                let _ = cause.set(StopCause::Cancelled);
                conn.close();
                return;
            }
            changed = activity.changed() => {
                // Err means the run-loop dropped its sender and is done.
                if changed.is_err() {
                    return;
                }
            }
            _ = time::sleep_until(last + heartbeat) => {
                let idle = Instant::now().saturating_duration_since(*activity.borrow());
                if idle >= heartbeat {
                    let _ = cause.set(StopCause::HeartbeatExpired { idle });
                    conn.close();
                    return;
                }
                // A frame landed while we slept; loop and re-arm.
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct CallbackSink {
    handlers: StreamHandlers,
}

#[async_trait]
impl RecordSink for CallbackSink {
    async fn tweet(&mut self, record: TweetRecord) -> Result<(), SinkClosed> {
        if let Some(f) = self.handlers.on_tweet.as_mut() {
            f(record);
        }
        Ok(())
    }

    async fn system(&mut self, message: SystemMessage) -> Result<(), SinkClosed> {
        if let Some(f) = self.handlers.on_system_message.as_mut() {
            f(message);
        }
        Ok(())
    }

    async fn transient(&mut self, error: StreamError) -> Result<(), SinkClosed> {
        if let Some(f) = self.handlers.on_transient_error.as_mut() {
            f(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex;

    fn connection_of(chunks: &[&str]) -> StreamConnection {
        let items: Vec<Result<Bytes, StreamError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        StreamConnection::new(Box::pin(futures::stream::iter(items)))
    }

    fn recording_handlers(log: &Arc<Mutex<Vec<String>>>) -> StreamHandlers {
        let tweets = Arc::clone(log);
        let system = Arc::clone(log);
        let errors = Arc::clone(log);
        StreamHandlers::new()
            .on_tweet(move |t| tweets.lock().unwrap().push(format!("tweet:{}", t.data.id)))
            .on_system_message(move |m| {
                system.lock().unwrap().push(format!("system:{}:{}", m.kind, m.message))
            })
            .on_transient_error(move |e| errors.lock().unwrap().push(format!("error:{e}")))
    }

    #[tokio::test]
    async fn interleaved_records_arrive_in_order() {
        let conn = connection_of(&[
            "{\"data\":{\"id\":\"1\",\"text\":\"hello\"}}\r\n",
            "{\"error\":{\"message\":\"Forced Disconnect\",\"sent\":\"2017-01-11T18:12:52+00:00\"}}\r\n",
            "{\"data\":{\"id\":\"2\",\"text\":\"world\"}}\r\n",
        ]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_stop, token) = stop_channel();
        let config = RunLoopConfig {
            heartbeat: Duration::from_secs(2),
            ..Default::default()
        };

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            run_with_callbacks(conn, Generation::V1, recording_handlers(&log), config, token),
        )
        .await
        .expect("run did not return");

        // Generation 1 has no hard-disconnect shape: the system message is
        // delivered and the run ends at end-of-input, not fatally.
        assert!(matches!(err, StreamError::Closed));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "tweet:1",
                "system:error:Forced Disconnect",
                "tweet:2",
            ]
        );
    }

    #[tokio::test]
    async fn disconnection_record_terminates_and_skips_callbacks() {
        let conn = connection_of(&[
            "{\"data\":{\"id\":\"1\",\"text\":\"first\"}}\r\n",
            "{\"errors\":[{\"title\":\"operational-disconnect\",\"disconnect_type\":\"UpstreamOperationalDisconnect\"}]}\r\n",
            "{\"data\":{\"id\":\"2\",\"text\":\"never seen\"}}\r\n",
        ]);
        let handle = conn.handle();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_stop, token) = stop_channel();

        let err = run_with_callbacks(
            conn,
            Generation::V2,
            recording_handlers(&log),
            RunLoopConfig::default(),
            token,
        )
        .await;

        match err {
            StreamError::Disconnected { disconnects, issues } => {
                assert_eq!(disconnects.len(), 1);
                assert!(issues.is_empty());
            }
            other => panic!("expected Disconnected, got {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["tweet:1"]);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn malformed_record_goes_to_transient_handler_only() {
        let conn = connection_of(&[
            "not json at all\r\n",
            "{\"data\":{\"id\":\"1\",\"text\":\"fine\"}}\r\n",
        ]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_stop, token) = stop_channel();

        let err = run_with_callbacks(
            conn,
            Generation::V2,
            recording_handlers(&log),
            RunLoopConfig::default(),
            token,
        )
        .await;

        assert!(matches!(err, StreamError::Closed));
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("error:"));
        assert_eq!(log[1], "tweet:1");
    }

    #[tokio::test]
    async fn heartbeat_timeout_closes_connection_within_margin() {
        let conn = StreamConnection::new(Box::pin(futures::stream::pending::<Result<Bytes, StreamError>>()));
        let handle = conn.handle();
        let (_stop, token) = stop_channel();
        let config = RunLoopConfig {
            heartbeat: Duration::from_millis(200),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            run_with_callbacks(conn, Generation::V2, StreamHandlers::new(), config, token),
        )
        .await
        .expect("run did not return after heartbeat expiry");
        let elapsed = started.elapsed();

        match err {
            StreamError::HeartbeatTimeout { idle_ms } => assert!(idle_ms >= 200),
            other => panic!("expected HeartbeatTimeout, got {other}"),
        }
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn keepalives_reset_the_heartbeat() {
        // Four keep-alives, 100ms apart, against a 250ms heartbeat: the
        // run must survive until end-of-input.
        let chunks = futures::stream::unfold(0u32, |n| async move {
            if n < 4 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Some((Ok::<_, StreamError>(Bytes::from_static(b"\r\n")), n + 1))
            } else {
                None
            }
        });
        let conn = StreamConnection::new(Box::pin(chunks));
        let (_stop, token) = stop_channel();
        let config = RunLoopConfig {
            heartbeat: Duration::from_millis(250),
            ..Default::default()
        };

        let err = run_with_callbacks(conn, Generation::V2, StreamHandlers::new(), config, token)
            .await;
        assert!(matches!(err, StreamError::Closed), "got {err}");
    }

    #[tokio::test]
    async fn stop_token_cancels_a_blocked_read() {
        let conn = StreamConnection::new(Box::pin(futures::stream::pending::<Result<Bytes, StreamError>>()));
        let (stop, token) = stop_channel();
        let config = RunLoopConfig {
            heartbeat: Duration::from_secs(10),
            ..Default::default()
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.stop();
            stop.stop(); // single-fire: repeat is a no-op
        });

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            run_with_callbacks(conn, Generation::V2, StreamHandlers::new(), config, token),
        )
        .await
        .expect("run did not return after stop");
        assert!(matches!(err, StreamError::Cancelled));
    }

    #[tokio::test]
    async fn deadline_expiry_behaves_like_cancellation() {
        let conn = StreamConnection::new(Box::pin(futures::stream::pending::<Result<Bytes, StreamError>>()));
        let (_stop, token) = stop_channel();
        let config = RunLoopConfig {
            heartbeat: Duration::from_secs(10),
            deadline: Some(Duration::from_millis(80)),
            ..Default::default()
        };

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            run_with_callbacks(conn, Generation::V2, StreamHandlers::new(), config, token),
        )
        .await
        .expect("run did not return at deadline");
        assert!(matches!(err, StreamError::Cancelled));
    }

    #[tokio::test]
    async fn absent_handlers_are_noops() {
        let conn = connection_of(&[
            "{\"data\":{\"id\":\"1\",\"text\":\"quiet\"}}\r\n",
            "{\"info\":{\"message\":\"noted\"}}\r\n",
        ]);
        let (_stop, token) = stop_channel();

        let err = run_with_callbacks(
            conn,
            Generation::V1,
            StreamHandlers::new(),
            RunLoopConfig::default(),
            token,
        )
        .await;
        assert!(matches!(err, StreamError::Closed));
    }
}
