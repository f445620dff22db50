// Integration tests for the client session over real sockets
//
// A scripted listener stands in for the server so the tests control exactly
// how the response is cut into TCP segments.

use rexsh::daemon::client::{run_interactive, BufReadSource, ClientSession, LoopEnd};
use rexsh::daemon::protocol::{Framing, FAREWELL, WELCOME};
use rexsh::error::ClientError;
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accepts one connection and runs `script` on it
fn scripted_server<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });
    (port, handle)
}

/// Writes one piece and lets it leave as its own segment
fn send_piece(stream: &mut TcpStream, piece: &[u8]) {
    stream.write_all(piece).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
}

fn read_command(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[test]
fn test_marker_split_across_segments() {
    let (port, server) = scripted_server(|mut stream| {
        send_piece(&mut stream, WELCOME.as_bytes());
        assert_eq!(read_command(&mut stream), "echo hello");
        send_piece(&mut stream, b"hello\n<CMD_EO");
        send_piece(&mut stream, b"F>");
    });

    let mut client = ClientSession::connect("127.0.0.1", port, Framing::Marker, 4096).unwrap();
    assert_eq!(client.read_greeting().unwrap(), WELCOME);

    client.send_command("echo hello").unwrap();
    let mut out = Vec::new();
    let summary = client.read_response(&mut out).unwrap();

    assert_eq!(out, b"hello\n");
    assert!(summary.reads >= 2);
    server.join().unwrap();
}

#[test]
fn test_marker_split_one_byte_at_a_time() {
    let (port, server) = scripted_server(|mut stream| {
        send_piece(&mut stream, WELCOME.as_bytes());
        read_command(&mut stream);
        send_piece(&mut stream, b"a<b");
        for byte in b"<CMD_EOF>" {
            send_piece(&mut stream, &[*byte]);
        }
    });

    let mut client = ClientSession::connect("127.0.0.1", port, Framing::Marker, 4096).unwrap();
    client.read_greeting().unwrap();
    client.send_command("printf").unwrap();

    let mut out = Vec::new();
    client.read_response(&mut out).unwrap();

    // a lone '<' that turns out not to start the marker is payload
    assert_eq!(out, b"a<b");
    server.join().unwrap();
}

#[test]
fn test_server_closing_mid_response() {
    let (port, server) = scripted_server(|mut stream| {
        send_piece(&mut stream, WELCOME.as_bytes());
        read_command(&mut stream);
        send_piece(&mut stream, b"cut off");
    });

    let mut client = ClientSession::connect("127.0.0.1", port, Framing::Marker, 4096).unwrap();
    client.read_greeting().unwrap();
    client.send_command("yes").unwrap();
    server.join().unwrap();

    let mut out = Vec::new();
    let err = client.read_response(&mut out).unwrap_err();
    assert!(matches!(err, ClientError::ServerClosed));
    assert_eq!(out, b"cut off");
}

#[test]
fn test_interactive_session_against_script() {
    let (port, server) = scripted_server(|mut stream| {
        send_piece(&mut stream, WELCOME.as_bytes());
        assert_eq!(read_command(&mut stream), "uname");
        send_piece(&mut stream, b"Linux\n<CMD_EOF>");
        assert_eq!(read_command(&mut stream), "salir");
        send_piece(&mut stream, FAREWELL.as_bytes());
    });

    let mut client = ClientSession::connect("127.0.0.1", port, Framing::Marker, 4096).unwrap();
    client.read_greeting().unwrap();

    let mut input = BufReadSource::without_prompt(Cursor::new("uname\n\nsalir\n"));
    let mut out = Vec::new();
    let end = run_interactive(&mut client, &mut input, &mut out, "ssh> ").unwrap();

    assert_eq!(end, LoopEnd::Exit);
    let shown = String::from_utf8(out).unwrap();
    assert!(shown.contains("Linux\n--- End of response (6 bytes) ---"));
    assert!(!shown.contains("<CMD_EOF>"));
    server.join().unwrap();
}

#[test]
fn test_connection_refused() {
    // bind then drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let result = ClientSession::connect("127.0.0.1", port, Framing::Marker, 4096);
    assert!(matches!(result, Err(ClientError::ConnectionFailed { .. })));
}
