//! Response streamer
//!
//! Copies a child's output pipe to the connection in bounded chunks and
//! terminates the response. The end of response is written even when
//! forwarding stopped early, so the client's next turn is not read as the
//! tail of this one.

use crate::daemon::protocol::Framing;
use std::io::{self, Read, Write};
use tracing::{debug, warn};

/// Why forwarding stopped before the pipe reached end of data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFailure {
    Read(io::ErrorKind),
    Write(io::ErrorKind),
}

/// Summary of one streamed response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Payload bytes forwarded, end of response excluded
    pub bytes: u64,
    pub chunks: u64,
    pub failure: Option<StreamFailure>,
    /// Whether the end of response made it onto the connection
    pub end_written: bool,
}

impl StreamReport {
    /// The connection itself failed; the session cannot continue
    pub fn connection_lost(&self) -> bool {
        matches!(self.failure, Some(StreamFailure::Write(_))) || !self.end_written
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseStreamer {
    framing: Framing,
    chunk_size: usize,
}

impl ResponseStreamer {
    pub fn new(framing: Framing, chunk_size: usize) -> Self {
        Self {
            framing,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Forward all of `source` and end the response
    pub fn stream<R: Read, W: Write>(&self, source: &mut R, sink: &mut W) -> StreamReport {
        let mut report = self.forward(source, sink);
        self.finish(sink, &mut report);
        report
    }

    /// Forward `source` to `sink` until end of data or the first error
    pub fn forward<R: Read, W: Write>(&self, source: &mut R, sink: &mut W) -> StreamReport {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut report = StreamReport::default();

        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, forwarded = report.bytes, "Failed to read command output");
                    report.failure = Some(StreamFailure::Read(e.kind()));
                    break;
                }
            };

            if let Err(e) = self.framing.write_chunk(sink, &buffer[..n]) {
                warn!(error = %e, forwarded = report.bytes, "Failed to send output chunk");
                report.failure = Some(StreamFailure::Write(e.kind()));
                break;
            }

            report.bytes += n as u64;
            report.chunks += 1;
        }

        debug!(bytes = report.bytes, chunks = report.chunks, "Output forwarded");
        report
    }

    /// Send an extra text chunk after the forwarded output
    pub fn append_text<W: Write>(&self, sink: &mut W, text: &str, report: &mut StreamReport) {
        if let Err(e) = self.framing.write_chunk(sink, text.as_bytes()) {
            warn!(error = %e, "Failed to send response text");
            report.failure = Some(StreamFailure::Write(e.kind()));
        }
    }

    /// Write the end of response, best effort
    pub fn finish<W: Write>(&self, sink: &mut W, report: &mut StreamReport) {
        match self.framing.write_end(sink) {
            Ok(()) => report.end_written = true,
            Err(e) => warn!(error = %e, "Failed to send end of response"),
        }
    }
}
