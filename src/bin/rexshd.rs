//! rexsh server binary
//!
//! `rexshd [port]` listens for clients and runs their commands. Settings not
//! given on the command line come from `~/.rexshrc` and `REXSH_*` variables.

use anyhow::{anyhow, Result};
use rexsh::daemon::config::ServerConfig;
use rexsh::daemon::server::Server;
use rexsh::logging::{init_logging, SERVER_FILTER};
use std::env;
use std::process;
use tracing::{error, info};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() > 2 {
        print_usage();
        process::exit(1);
    }
    if let Some("-h" | "--help") = args.get(1).map(String::as_str) {
        print_usage();
        return Ok(());
    }

    init_logging(SERVER_FILTER)?;

    let mut config = ServerConfig::load();
    if let Some(port) = args.get(1) {
        config.port = port
            .parse()
            .map_err(|_| anyhow!("Invalid port '{}'", port))?;
    }

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Cannot start server");
            process::exit(1);
        }
    };

    rexsh::signal::install_server_handler(server.shutdown_handle())?;

    server.run()?;
    info!("Server stopped");
    Ok(())
}

fn print_usage() {
    eprintln!("rexshd - remote command server");
    eprintln!();
    eprintln!("Usage: rexshd [port]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  REXSH_BIND          address to listen on (default 0.0.0.0)");
    eprintln!("  REXSH_PORT          port when none is given (default 8080)");
    eprintln!("  REXSH_FRAMING       marker | length");
    eprintln!("  REXSH_MODE          sequential | threaded");
    eprintln!("  REXSH_READ_TIMEOUT  seconds to wait for a command, 0 = forever");
    eprintln!("  REXSH_EMPTY_NOTICE  1 to report commands without output");
    eprintln!("  REXSH_CONFIG        rc file (default ~/.rexshrc)");
}
