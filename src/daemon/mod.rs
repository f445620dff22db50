//! Remote command session: wire protocol, server side and client side.
//!
//! - `protocol`: greeting/farewell text, command classification, response framing
//! - `config`: `~/.rexshrc` + environment settings for both binaries
//! - `session`: per-connection state machine on the server
//! - `server`: accept loop and lifecycle
//! - `client`: client session and prompt loop

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{run_interactive, BufReadSource, ClientSession, InputLine, LineSource, LoopEnd};
pub use config::{ClientConfig, ConcurrencyMode, ServerConfig, Settings};
pub use protocol::{Framing, MarkerScanner, ResponseDecoder, MARKER};
pub use server::{Server, ShutdownHandle};
pub use session::{Session, SessionEnd, SessionOptions, SessionSummary};
