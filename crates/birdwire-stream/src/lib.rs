//! birdwire-stream — continuous ingestion engine for Twitter's
//! newline-delimited streaming HTTP APIs.
//!
//! ## Architecture
//! ```text
//! StreamConnection (owned byte stream, close-once handle)
//!       │
//!       ▼
//! FrameReader (\r\n framing, keep-alive frames)
//!       │
//!       ▼
//! RecordClassifier (one probe → Tweet / System / Disconnect)
//!       │
//!       ▼
//! RecordSink ─┬─ QueueSink      → StreamDispatcher (bounded queues, Close)
//!             └─ CallbackSink   → run_with_callbacks (inline handlers,
//!                                  heartbeat watchdog, stop token)
//! ```
//!
//! Both delivery variants share the same pump over the reader and
//! classifier; records reach consumers in exact arrival order. Neither
//! variant reconnects — a terminal error means the caller must open a new
//! stream through the transport collaborator.

pub mod classify;
pub mod connection;
pub mod dispatcher;
pub mod frames;
pub mod run_loop;
pub mod sink;

pub use classify::{Generation, RecordClassifier};
pub use connection::{ByteStream, ConnectionHandle, StreamConnection};
pub use dispatcher::{
    DispatcherConfig, DispatcherMetrics, DispatcherState, StreamDispatcher, StreamQueues,
};
pub use frames::FrameReader;
pub use run_loop::{
    run_with_callbacks, stop_channel, RunLoopConfig, StopController, StopToken, StreamHandlers,
};
pub use sink::{RecordSink, SinkClosed};
