#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Context, Result};
use nu_ansi_term::Color;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use rexsh::daemon::client::{run_interactive, BufReadSource, ClientSession, InputLine, LineSource, LoopEnd};
use rexsh::daemon::config::ClientConfig;
use rexsh::logging::{init_logging, CLIENT_FILTER};
use std::borrow::Cow;
use std::env;
use std::io;
use std::process;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() != 3 {
        print_usage(args.first().map(String::as_str).unwrap_or("rexsh"));
        process::exit(1);
    }

    init_logging(CLIENT_FILTER)?;

    let mut config = ClientConfig::load();
    config.host = args[1].clone();
    config.port = args[2]
        .parse()
        .map_err(|_| anyhow!("Invalid port '{}'", args[2]))?;

    let mut session = connect(&config)?;

    let connection = session
        .get_ref()
        .try_clone()
        .context("Failed to clone connection for the signal handler")?;
    rexsh::signal::install_client_handler(connection)?;

    let greeting = session.read_greeting()?;
    print!("{}", greeting);
    print_session_header();

    let mut stdout = io::stdout();
    let end = if atty::is(atty::Stream::Stdin) {
        let mut input = ReedlineSource::new();
        run_interactive(&mut session, &mut input, &mut stdout, &config.prompt)?
    } else {
        let mut input = BufReadSource::new(io::stdin().lock());
        run_interactive(&mut session, &mut input, &mut stdout, &config.prompt)?
    };

    if end != LoopEnd::ServerClosed {
        println!("[client] Closing connection...");
    }
    let _ = session.shutdown();
    println!("Disconnected from server");
    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <host> <port>", program);
    eprintln!("Examples:");
    eprintln!("  {} localhost 8080", program);
    eprintln!("  {} 192.168.1.100 8080", program);
}

fn connect(config: &ClientConfig) -> Result<ClientSession<std::net::TcpStream>> {
    println!("{}", Color::Cyan.bold().paint("=== REXSH CLIENT ==="));
    println!("Connecting to: {}:{}", config.host, config.port);

    match ClientSession::connect(&config.host, config.port, config.framing, config.buffer_size) {
        Ok(session) => {
            println!("{}\n", Color::Green.paint("Connection established"));
            Ok(session)
        }
        Err(e) => {
            eprintln!("{}", Color::Red.paint(e.to_string()));
            eprintln!("Check that:");
            eprintln!("- the server is running on {}:{}", config.host, config.port);
            eprintln!("- the address and port are correct");
            eprintln!("- no firewall is blocking the connection");
            Err(e.into())
        }
    }
}

fn print_session_header() {
    println!("{}", Color::Cyan.bold().paint("=== SESSION STARTED ==="));
    println!("Type commands to run on the remote server.");
    println!("Special commands: 'salir' or 'exit' to disconnect");
    println!("Press Ctrl+C to force disconnect\n");
}

/// Fixed prompt text for the line editor
struct RexshPrompt {
    text: String,
}

impl Prompt for RexshPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed(&self.text)
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };

        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

/// Interactive input through reedline
struct ReedlineSource {
    editor: Reedline,
}

impl ReedlineSource {
    fn new() -> Self {
        Self {
            editor: Reedline::create(),
        }
    }
}

impl LineSource for ReedlineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<InputLine> {
        let prompt = RexshPrompt {
            text: prompt.to_string(),
        };

        loop {
            match self.editor.read_line(&prompt) {
                Ok(Signal::Success(line)) => return Ok(InputLine::Line(line)),
                Ok(Signal::CtrlC) => return Ok(InputLine::Interrupted),
                Ok(Signal::CtrlD) => return Ok(InputLine::Eof),
                // EINTR when a signal arrives during the read
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
