//! SIGINT/SIGTERM handling for both binaries.
//!
//! Signals are consumed on a dedicated thread (`signal_hook::iterator`), so
//! the work done in response is ordinary code rather than a handler body.

use crate::daemon::server::ShutdownHandle;
use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::thread;
use tracing::{info, warn};

/// Conventional exit code for a process ended by `signal` (128 + n)
pub fn exit_code(signal: i32) -> i32 {
    match signal {
        SIGINT => 130,
        SIGTERM => 143,
        _ => 1,
    }
}

/// Server: the first SIGINT/SIGTERM requests an orderly shutdown, a second
/// one exits immediately.
pub fn install_server_handler(shutdown: ShutdownHandle) -> Result<()> {
    for sig in [SIGINT, SIGTERM] {
        // exits only when the flag is already set, i.e. on the second signal
        signal_hook::flag::register_conditional_shutdown(sig, 1, shutdown.flag())?;
    }

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("rexshd-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                info!(signal = sig, "Shutdown requested, releasing listener");
                shutdown.request();
            }
        })?;

    Ok(())
}

/// Client: on SIGINT/SIGTERM tell the server we are leaving, close the
/// connection and exit.
pub fn install_client_handler(connection: TcpStream) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("rexsh-signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                disconnect(connection, sig);
            }
        })?;

    Ok(())
}

fn disconnect(mut connection: TcpStream, sig: i32) -> ! {
    println!("\n[client] Disconnecting...");
    leave_server(&mut connection);
    println!("[client] Connection closed");
    std::process::exit(exit_code(sig));
}

/// Send `exit` and close the connection, best effort
fn leave_server(connection: &mut TcpStream) {
    if let Err(e) = connection.write_all(b"exit") {
        warn!(error = %e, "Could not send exit to the server");
    }
    let _ = connection.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(SIGINT), 130);
        assert_eq!(exit_code(SIGTERM), 143);
        assert_eq!(exit_code(0), 1);
    }

    // smoke tests: registration succeeds, no signal is raised
    #[test]
    fn test_server_handler_install_smoke() {
        assert!(install_server_handler(ShutdownHandle::new()).is_ok());
    }

    #[test]
    fn test_client_handler_install_smoke() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(install_client_handler(stream).is_ok());
    }

    #[test]
    fn test_leave_server_sends_exit_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        leave_server(&mut client);

        // read_to_end returning means the client closed its side
        let mut received = Vec::new();
        server_side.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"exit");
    }

    #[test]
    fn test_leave_server_tolerates_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        drop(listener.accept().unwrap());

        // must not panic when the server already went away
        leave_server(&mut client);
    }
}
