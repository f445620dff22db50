// Library interface for rexsh
// Shared by the rexsh client, the rexshd server, tests and benchmarks

pub mod daemon;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod logging;
pub mod signal;
