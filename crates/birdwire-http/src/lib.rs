//! birdwire-http — the transport collaborator.
//!
//! The engine consumes an already-open, already-authenticated byte
//! stream; this crate is what opens it. It sends a caller-prepared
//! `reqwest` request, verifies the status, captures the per-response
//! rate-limit snapshot and wraps the body as a
//! [`StreamConnection`](birdwire_stream::StreamConnection).
//!
//! Out of scope by design: authentication/header construction and
//! reconnect-with-backoff both belong to the caller.

pub mod connect;

pub use connect::{open_stream, rate_limit_from_headers};
