//! Configuration from ~/.rexshrc and the environment
//!
//! Both sources use the same keys. The rc file holds shell-style
//! assignments, environment variables override it:
//! - REXSH_BIND (listen address, default 0.0.0.0)
//! - REXSH_PORT (default 8080)
//! - REXSH_CHUNK_SIZE (bytes per output read, default 4096)
//! - REXSH_MAX_COMMAND (bytes per command read, default 256)
//! - REXSH_FRAMING (marker, length)
//! - REXSH_MODE (sequential, threaded)
//! - REXSH_READ_TIMEOUT (seconds, 0 disables)
//! - REXSH_EMPTY_NOTICE (0, 1)
//! - REXSH_PROMPT (client prompt)
//!
//! `REXSH_CONFIG` points at an alternative rc file.

use crate::daemon::protocol::Framing;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_MAX_COMMAND: usize = 256;
pub const DEFAULT_PROMPT: &str = "ssh> ";

/// How accepted connections are serviced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// One session at a time, the next accept happens after it ends
    #[default]
    Sequential,
    /// One thread per accepted connection
    Threaded,
}

impl ConcurrencyMode {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Some(ConcurrencyMode::Sequential),
            "threaded" => Some(ConcurrencyMode::Threaded),
            _ => None,
        }
    }
}

/// Raw key/value settings collected from the rc file and environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    /// Parse rc file content
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);

            if let Some((key, value)) = parse_assignment(line) {
                if key.starts_with("REXSH_") {
                    values.insert(key, unquote(&value));
                }
            }
        }

        Self { values }
    }

    /// Read and parse an rc file; a missing file yields empty settings
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Collect REXSH_* variables from an environment iterator
    pub fn from_env_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with("REXSH_"))
            .collect();
        Self { values }
    }

    /// Overlay `other` on top of `self`
    pub fn merged(mut self, other: Settings) -> Self {
        self.values.extend(other.values);
        self
    }

    /// rc file, then process environment
    pub fn load() -> Self {
        let path = Self::rc_path();
        let file = Self::from_file(&path).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable config file");
            Self::default()
        });
        file.merged(Self::from_env_vars(std::env::vars()))
    }

    /// Path of the rc file (`$REXSH_CONFIG` or `~/.rexshrc`)
    pub fn rc_path() -> PathBuf {
        if let Ok(path) = std::env::var("REXSH_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rexshrc")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Parse `key` with `parse`, recording an error and returning None on bad input
    fn typed<T>(
        &self,
        key: &str,
        errors: &mut Vec<ConfigError>,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Option<T> {
        let value = self.get(key)?;
        let parsed = parse(value.trim());
        if parsed.is_none() {
            errors.push(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        parsed
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub chunk_size: usize,
    pub max_command_len: usize,
    pub framing: Framing,
    pub mode: ConcurrencyMode,
    /// None blocks forever on reads from the client
    pub read_timeout: Option<Duration>,
    /// Report commands that produced no output
    pub empty_notice: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_command_len: DEFAULT_MAX_COMMAND,
            framing: Framing::Marker,
            mode: ConcurrencyMode::Sequential,
            read_timeout: None,
            empty_notice: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with rc file and environment; bad values are logged and skipped
    pub fn load() -> Self {
        let (config, errors) = Self::from_settings(&Settings::load());
        for error in errors {
            warn!(%error, "Keeping default for invalid setting");
        }
        config
    }

    pub fn from_settings(settings: &Settings) -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Some(bind) = settings.typed("REXSH_BIND", &mut errors, |v| v.parse::<IpAddr>().ok()) {
            config.bind = bind;
        }
        if let Some(port) = settings.typed("REXSH_PORT", &mut errors, parse_port) {
            config.port = port;
        }
        if let Some(size) = settings.typed("REXSH_CHUNK_SIZE", &mut errors, parse_nonzero) {
            config.chunk_size = size;
        }
        if let Some(size) = settings.typed("REXSH_MAX_COMMAND", &mut errors, parse_nonzero) {
            config.max_command_len = size;
        }
        if let Some(framing) = settings.typed("REXSH_FRAMING", &mut errors, Framing::from_name) {
            config.framing = framing;
        }
        if let Some(mode) = settings.typed("REXSH_MODE", &mut errors, ConcurrencyMode::from_name) {
            config.mode = mode;
        }
        if let Some(secs) = settings.typed("REXSH_READ_TIMEOUT", &mut errors, |v| v.parse::<u64>().ok()) {
            config.read_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(flag) = settings.typed("REXSH_EMPTY_NOTICE", &mut errors, parse_flag) {
            config.empty_notice = flag;
        }

        (config, errors)
    }
}

/// Client settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub framing: Framing,
    pub prompt: String,
    /// Bytes per network read
    pub buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            framing: Framing::Marker,
            prompt: DEFAULT_PROMPT.to_string(),
            buffer_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn load() -> Self {
        let (config, errors) = Self::from_settings(&Settings::load());
        for error in errors {
            warn!(%error, "Keeping default for invalid setting");
        }
        config
    }

    pub fn from_settings(settings: &Settings) -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Some(port) = settings.typed("REXSH_PORT", &mut errors, parse_port) {
            config.port = port;
        }
        if let Some(framing) = settings.typed("REXSH_FRAMING", &mut errors, Framing::from_name) {
            config.framing = framing;
        }
        if let Some(size) = settings.typed("REXSH_CHUNK_SIZE", &mut errors, parse_nonzero) {
            config.buffer_size = size;
        }
        if let Some(prompt) = settings.get("REXSH_PROMPT") {
            config.prompt = prompt.to_string();
        }

        (config, errors)
    }
}

fn parse_port(value: &str) -> Option<u16> {
    value.parse::<u16>().ok().filter(|port| *port != 0)
}

fn parse_nonzero(value: &str) -> Option<usize> {
    value.parse::<usize>().ok().filter(|n| *n > 0)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a shell variable assignment (KEY=value or KEY="value")
fn parse_assignment(line: &str) -> Option<(String, String)> {
    let eq_pos = line.find('=')?;
    let key = line[..eq_pos].trim().to_string();
    let value = line[eq_pos + 1..].trim().to_string();

    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    Some((key, value))
}

/// Remove surrounding quotes from a value
fn unquote(s: &str) -> String {
    let s = s.trim();

    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return s[1..s.len() - 1].to_string();
    }

    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        return s[1..s.len() - 1].to_string();
    }

    s.to_string()
}
