//! Frame reader: splits the raw byte stream into delimiter-bounded records.
//!
//! A record ends at the first `\r\n`. A zero-length record (two consecutive
//! delimiters, or a leading one) is a valid keep-alive frame; callers skip
//! it. At end-of-input, a non-empty trailing buffer with no delimiter is
//! one final record.

use bytes::{Bytes, BytesMut};

use birdwire_core::StreamError;

use crate::connection::{ConnectionHandle, StreamConnection};

const DELIMITER: &[u8] = b"\r\n";

/// Lazily yields one frame per call over an owned [`StreamConnection`].
///
/// The reader imposes no record-size limit of its own; pass a cap to bound
/// memory against a stream that never sends a delimiter.
pub struct FrameReader {
    conn: StreamConnection,
    buf: BytesMut,
    /// Buffer offset the next delimiter scan starts from, so a frame
    /// spanning many chunks is not rescanned from the beginning each time.
    scan_from: usize,
    eof: bool,
    max_frame: Option<usize>,
}

impl FrameReader {
    pub fn new(conn: StreamConnection, max_frame: Option<usize>) -> Self {
        Self {
            conn,
            buf: BytesMut::new(),
            scan_from: 0,
            eof: false,
            max_frame,
        }
    }

    /// A handle that closes the underlying connection.
    pub fn handle(&self) -> ConnectionHandle {
        self.conn.handle()
    }

    /// Next frame: `Ok(Some(bytes))` per record (possibly empty — a
    /// keep-alive), `Ok(None)` at end of input, `Err` when the transport
    /// fails or a frame outgrows the configured cap.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, StreamError> {
        loop {
            if let Some(pos) = self.find_delimiter() {
                let mut frame = self.buf.split_to(pos + DELIMITER.len());
                frame.truncate(pos);
                self.scan_from = 0;
                return Ok(Some(frame.freeze()));
            }
            if let Some(max) = self.max_frame {
                if self.buf.len() > max {
                    return Err(StreamError::FrameTooLarge { max });
                }
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                self.scan_from = 0;
                return Ok(Some(self.buf.split().freeze()));
            }
            match self.conn.read_chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
    }

    fn find_delimiter(&mut self) -> Option<usize> {
        let start = self.scan_from;
        let found = self.buf[start..]
            .windows(DELIMITER.len())
            .position(|w| w == DELIMITER)
            .map(|p| p + start);
        if found.is_none() {
            // Keep the last byte in range: it may be the CR of a split pair.
            self.scan_from = self.buf.len().saturating_sub(1);
        }
        found
    }
}
