//! rexsh wire protocol
//!
//! A session is a single TCP stream carrying plain text in both directions:
//!
//! ```text
//! server → client   greeting: "<DD/MM/YYYY HH:MM:SS> - ... IP: <peer>\n<welcome>\n"
//! client → server   command line (no terminator required)
//! server → client   response: output bytes, then end of response
//! ...
//! client → server   "exit" | "salir"
//! server → client   farewell line, connection closed
//! ```
//!
//! Two response framings exist:
//!
//! - [`Framing::Marker`] (default): raw output followed by the literal
//!   9-byte marker `<CMD_EOF>`. Output that itself contains the marker
//!   text corrupts the framing; receivers must reassemble a marker split
//!   across reads, see [`MarkerScanner`].
//! - [`Framing::LengthPrefixed`]: each chunk is sent as
//!   `[u32 LE length][bytes]`, a zero-length chunk ends the response.
//!   Both ends must agree on it out of band.

use chrono::{DateTime, Local};
use std::fmt;
use std::io::{self, Write};
use std::net::IpAddr;

/// End of response marker for [`Framing::Marker`]
pub const MARKER: &[u8] = b"<CMD_EOF>";

/// Largest chunk accepted by the length-prefixed decoder (10MB)
const MAX_CHUNK_SIZE: u32 = 10 * 1024 * 1024;

/// Welcome line sent right after the connection info line
pub const WELCOME: &str =
    "Conexion SSH establecida. Escriba comandos o 'salir'/'exit' para desconectar.\n";

/// Farewell line sent in reply to an exit keyword, never followed by an end of response
pub const FAREWELL: &str = "Desconectando. Hasta luego!\n";

/// Words that end a session, matched exactly and case-sensitively after trimming
pub const EXIT_KEYWORDS: [&str; 2] = ["exit", "salir"];

pub fn is_exit_keyword(command: &str) -> bool {
    EXIT_KEYWORDS.contains(&command)
}

/// What the server should do with one received command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Empty,
    Exit,
    Run(String),
}

/// Decode and trim one received command line and classify it
pub fn classify_command(raw: &[u8]) -> CommandKind {
    let text = String::from_utf8_lossy(raw);
    let command = text.trim();

    if command.is_empty() {
        CommandKind::Empty
    } else if is_exit_keyword(command) {
        CommandKind::Exit
    } else {
        CommandKind::Run(command.to_string())
    }
}

/// Build the greeting: connection info line plus welcome line
pub fn greeting(now: DateTime<Local>, peer: IpAddr) -> String {
    format!(
        "{} - Cliente conectado desde IP: {}\n{}",
        now.format("%d/%m/%Y %H:%M:%S"),
        peer,
        WELCOME
    )
}

/// Response framing used for command output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Marker,
    LengthPrefixed,
}

impl Framing {
    /// Parse a framing name as used in configuration (`marker`, `length`)
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "marker" => Some(Framing::Marker),
            "length" | "length-prefixed" => Some(Framing::LengthPrefixed),
            _ => None,
        }
    }

    /// Write one chunk of response payload
    pub fn write_chunk<W: Write>(&self, writer: &mut W, data: &[u8]) -> io::Result<()> {
        match self {
            Framing::Marker => writer.write_all(data),
            Framing::LengthPrefixed => {
                if data.is_empty() {
                    // a zero-length chunk would read as end of response
                    return Ok(());
                }
                writer.write_all(&encode_chunk(data)?)
            }
        }
    }

    /// Write the end of response and flush
    pub fn write_end<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Framing::Marker => writer.write_all(MARKER)?,
            Framing::LengthPrefixed => writer.write_all(&0u32.to_le_bytes())?,
        }
        writer.flush()
    }

    /// Write a complete single-chunk text response
    pub fn write_text_response<W: Write>(&self, writer: &mut W, text: &str) -> io::Result<()> {
        self.write_chunk(writer, text.as_bytes())?;
        self.write_end(writer)
    }

    /// Create a decoder for responses framed this way
    pub fn decoder(&self) -> ResponseDecoder {
        match self {
            Framing::Marker => ResponseDecoder::Marker(MarkerScanner::new()),
            Framing::LengthPrefixed => ResponseDecoder::LengthPrefixed(LengthDecoder::new()),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Marker => write!(f, "marker"),
            Framing::LengthPrefixed => write!(f, "length"),
        }
    }
}

/// Encode one length-prefixed chunk: [4-byte length][payload]
fn encode_chunk(data: &[u8]) -> io::Result<Vec<u8>> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|len| *len <= MAX_CHUNK_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Chunk too large: {} bytes", data.len()),
            )
        })?;

    let mut buffer = Vec::with_capacity(4 + data.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(data);
    Ok(buffer)
}

/// Result of feeding received bytes to a decoder
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Payload bytes that are safe to display
    pub payload: Vec<u8>,
    /// Whether the end of the response was seen
    pub complete: bool,
    /// Bytes received after the end of response (protocol violation, normally empty)
    pub trailing: Vec<u8>,
}

/// Incremental decoder for one response
#[derive(Debug)]
pub enum ResponseDecoder {
    Marker(MarkerScanner),
    LengthPrefixed(LengthDecoder),
}

impl ResponseDecoder {
    pub fn feed(&mut self, input: &[u8]) -> io::Result<Decoded> {
        match self {
            ResponseDecoder::Marker(scanner) => Ok(scanner.feed(input)),
            ResponseDecoder::LengthPrefixed(decoder) => decoder.feed(input),
        }
    }

    /// Bytes held back when the stream ends before the end of response
    pub fn finish(self) -> Vec<u8> {
        match self {
            ResponseDecoder::Marker(scanner) => scanner.finish(),
            ResponseDecoder::LengthPrefixed(decoder) => decoder.finish(),
        }
    }
}

/// Finds [`MARKER`] in a byte stream delivered in arbitrary pieces.
///
/// Bytes that could be the start of a marker are held back (at most
/// `MARKER.len() - 1` of them) until the next read decides whether they
/// are payload or marker, so a marker split as `<CMD_EO` + `F>` is still
/// recognised and never shown.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    pending: Vec<u8>,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> Decoded {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(input);

        if let Some(pos) = find_marker(&buffer) {
            let trailing = buffer.split_off(pos + MARKER.len());
            buffer.truncate(pos);
            return Decoded {
                payload: buffer,
                complete: true,
                trailing,
            };
        }

        let keep = partial_marker_suffix(&buffer);
        self.pending = buffer.split_off(buffer.len() - keep);

        Decoded {
            payload: buffer,
            complete: false,
            trailing: Vec::new(),
        }
    }

    /// Number of bytes currently held back
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn finish(self) -> Vec<u8> {
        self.pending
    }
}

fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(MARKER.len())
        .position(|window| window == MARKER)
}

/// Length of the longest suffix of `buffer` that is a proper prefix of the marker
fn partial_marker_suffix(buffer: &[u8]) -> usize {
    (1..MARKER.len())
        .rev()
        .find(|&len| len <= buffer.len() && buffer.ends_with(&MARKER[..len]))
        .unwrap_or(0)
}

/// Decoder for [`Framing::LengthPrefixed`] responses
#[derive(Debug, Default)]
pub struct LengthDecoder {
    buffer: Vec<u8>,
}

impl LengthDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> io::Result<Decoded> {
        self.buffer.extend_from_slice(input);
        let mut decoded = Decoded::default();

        loop {
            if self.buffer.len() < 4 {
                break;
            }

            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&self.buffer[..4]);
            let len = u32::from_le_bytes(len_bytes);

            if len > MAX_CHUNK_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Chunk too large: {} bytes", len),
                ));
            }

            if len == 0 {
                decoded.complete = true;
                decoded.trailing = self.buffer.split_off(4);
                self.buffer.clear();
                break;
            }

            let end = 4 + len as usize;
            if self.buffer.len() < end {
                break;
            }

            decoded.payload.extend_from_slice(&self.buffer[4..end]);
            self.buffer.drain(..end);
        }

        Ok(decoded)
    }

    pub fn finish(self) -> Vec<u8> {
        // a partial chunk is incomplete payload, drop the header if present
        if self.buffer.len() > 4 {
            self.buffer[4..].to_vec()
        } else {
            Vec::new()
        }
    }
}
