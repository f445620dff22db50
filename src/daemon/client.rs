//! Client session
//!
//! Connects to a server, shows the greeting and then runs the prompt loop:
//! read a line, send it, print the response until its end is seen.
//! Responses arrive in arbitrary pieces; the framing decoder holds back
//! bytes that may belong to a split end marker so they are never printed.

use crate::daemon::protocol::{is_exit_keyword, Framing};
use crate::error::ClientError;
use std::io::{self, BufRead, Read, Write};
use std::net::{Shutdown, TcpStream};
use tracing::{debug, warn};

/// What one response turn delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseSummary {
    /// Payload bytes written to the output
    pub bytes: u64,
    /// Network reads it took
    pub reads: u64,
    pub ends_with_newline: bool,
}

/// Client side of one connection
pub struct ClientSession<S> {
    stream: S,
    framing: Framing,
    buffer_size: usize,
}

impl ClientSession<TcpStream> {
    pub fn connect(
        host: &str,
        port: u16,
        framing: Framing,
        buffer_size: usize,
    ) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .map_err(|source| ClientError::ConnectionFailed { addr, source })?;

        Ok(Self::new(stream, framing, buffer_size))
    }

    /// Shut down both directions; used when leaving on a signal
    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

impl<S: Read + Write> ClientSession<S> {
    pub fn new(stream: S, framing: Framing, buffer_size: usize) -> Self {
        Self {
            stream,
            framing,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Exactly one read; the server sends the greeting in a single write
    pub fn read_greeting(&mut self) -> Result<String, ClientError> {
        match self.read_once()? {
            Some(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            None => Err(ClientError::ServerClosed),
        }
    }

    pub fn send_command(&mut self, command: &str) -> Result<(), ClientError> {
        debug!(command, "Sending command");
        self.stream.write_all(command.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Copy response payload to `out` until the end of response.
    ///
    /// The server closing the connection first is [`ClientError::ServerClosed`];
    /// whatever payload was received is still written.
    pub fn read_response<W: Write>(&mut self, out: &mut W) -> Result<ResponseSummary, ClientError> {
        let mut decoder = self.framing.decoder();
        let mut summary = ResponseSummary::default();

        loop {
            let data = match self.read_once()? {
                Some(data) => data,
                None => {
                    let rest = decoder.finish();
                    emit(out, &rest, &mut summary)?;
                    out.flush()?;
                    return Err(ClientError::ServerClosed);
                }
            };
            summary.reads += 1;

            let decoded = decoder
                .feed(&data)
                .map_err(|e| ClientError::Protocol(e.to_string()))?;
            emit(out, &decoded.payload, &mut summary)?;

            if decoded.complete {
                if !decoded.trailing.is_empty() {
                    warn!(
                        bytes = decoded.trailing.len(),
                        "Discarding data received after end of response"
                    );
                }
                out.flush()?;
                debug!(bytes = summary.bytes, reads = summary.reads, "Response complete");
                return Ok(summary);
            }
        }
    }

    /// One read after exit/salir; no end marker follows the farewell
    pub fn read_farewell(&mut self) -> Result<String, ClientError> {
        Ok(self
            .read_once()?
            .map(|data| String::from_utf8_lossy(&data).into_owned())
            .unwrap_or_default())
    }

    /// One read of up to `buffer_size` bytes, None on end of stream
    fn read_once(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buffer.truncate(n);
                    return Ok(Some(buffer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn emit<W: Write>(out: &mut W, payload: &[u8], summary: &mut ResponseSummary) -> io::Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    out.write_all(payload)?;
    summary.bytes += payload.len() as u64;
    summary.ends_with_newline = payload.ends_with(b"\n");
    Ok(())
}

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Line(String),
    /// Ctrl-C at the prompt
    Interrupted,
    /// Ctrl-D or closed stdin
    Eof,
}

/// Where the prompt loop gets its lines from
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<InputLine>;
}

/// Line source over any buffered reader, for piped input
pub struct BufReadSource<R> {
    reader: R,
    show_prompt: bool,
}

impl<R: BufRead> BufReadSource<R> {
    /// Prints the prompt on stdout before each read
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            show_prompt: true,
        }
    }

    pub fn without_prompt(reader: R) -> Self {
        Self {
            reader,
            show_prompt: false,
        }
    }
}

impl<R: BufRead> LineSource for BufReadSource<R> {
    fn read_line(&mut self, prompt: &str) -> io::Result<InputLine> {
        if self.show_prompt {
            let mut stdout = io::stdout();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;
        }

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(InputLine::Eof),
            Ok(_) => Ok(InputLine::Line(line)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(InputLine::Interrupted),
            Err(e) => Err(e),
        }
    }
}

/// How the prompt loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    /// User typed exit/salir
    Exit,
    /// Input ended; exit was sent on the user's behalf
    InputClosed,
    /// Ctrl-C at the prompt; exit was sent on the user's behalf
    Interrupted,
    /// Server went away mid-session
    ServerClosed,
}

/// Prompt loop. Local UI text goes to `out` together with response payload.
pub fn run_interactive<S, L, W>(
    session: &mut ClientSession<S>,
    input: &mut L,
    out: &mut W,
    prompt: &str,
) -> Result<LoopEnd, ClientError>
where
    S: Read + Write,
    L: LineSource,
    W: Write,
{
    loop {
        let line = match input.read_line(prompt)? {
            InputLine::Line(line) => line,
            InputLine::Eof => {
                writeln!(out, "\nEnd of input, disconnecting...")?;
                leave(session, out)?;
                return Ok(LoopEnd::InputClosed);
            }
            InputLine::Interrupted => {
                writeln!(out, "\nInterrupted, disconnecting...")?;
                leave(session, out)?;
                return Ok(LoopEnd::Interrupted);
            }
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        writeln!(out, "Sending command: '{}'", command)?;
        session.send_command(command)?;

        if is_exit_keyword(command) {
            let farewell = session.read_farewell()?;
            out.write_all(farewell.as_bytes())?;
            out.flush()?;
            return Ok(LoopEnd::Exit);
        }

        writeln!(out, "--- Server response ---")?;
        let summary = match session.read_response(out) {
            Ok(summary) => summary,
            Err(ClientError::ServerClosed) => {
                writeln!(out, "\nThe server closed the connection")?;
                return Ok(LoopEnd::ServerClosed);
            }
            Err(e) => return Err(e),
        };
        if summary.bytes > 0 && !summary.ends_with_newline {
            writeln!(out)?;
        }
        writeln!(out, "--- End of response ({} bytes) ---\n", summary.bytes)?;
    }
}

/// Send exit and print the farewell, tolerating a server that already left
fn leave<S: Read + Write, W: Write>(
    session: &mut ClientSession<S>,
    out: &mut W,
) -> Result<(), ClientError> {
    if let Err(e) = session.send_command("exit") {
        debug!(error = %e, "Could not send exit");
        return Ok(());
    }
    match session.read_farewell() {
        Ok(farewell) => out.write_all(farewell.as_bytes())?,
        Err(e) => debug!(error = %e, "No farewell received"),
    }
    out.flush()?;
    Ok(())
}
