// Integration tests for rc file loading

use rexsh::daemon::config::{ClientConfig, ConcurrencyMode, ServerConfig, Settings};
use rexsh::daemon::protocol::Framing;
use rexsh::error::ConfigError;
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

fn rc_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_server_config_from_rc_file() {
    let file = rc_file(
        "# server\nexport REXSH_PORT=9090\nREXSH_MODE=\"threaded\"\nREXSH_MAX_COMMAND=1024\n",
    );

    let settings = Settings::from_file(file.path()).unwrap();
    let (config, errors) = ServerConfig::from_settings(&settings);

    assert!(errors.is_empty());
    assert_eq!(config.port, 9090);
    assert_eq!(config.mode, ConcurrencyMode::Threaded);
    assert_eq!(config.max_command_len, 1024);
}

#[test]
fn test_client_config_from_rc_file() {
    let file = rc_file("REXSH_FRAMING=length\nREXSH_PROMPT='box$ '\n");

    let settings = Settings::from_file(file.path()).unwrap();
    let (config, _) = ClientConfig::from_settings(&settings);

    assert_eq!(config.framing, Framing::LengthPrefixed);
    assert_eq!(config.prompt, "box$ ");
}

#[test]
fn test_missing_rc_file_is_empty() {
    let dir = tempdir().unwrap();
    let settings = Settings::from_file(&dir.path().join("absent")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_unreadable_rc_file_is_error() {
    let dir = tempdir().unwrap();
    // a directory cannot be read as a file
    let err = Settings::from_file(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_invalid_entries_are_reported() {
    let file = rc_file("REXSH_MODE=forked\nREXSH_BIND=localhost\nREXSH_PORT=7000\n");

    let settings = Settings::from_file(file.path()).unwrap();
    let (config, errors) = ServerConfig::from_settings(&settings);

    assert_eq!(config.port, 7000);
    assert_eq!(config.mode, ConcurrencyMode::Sequential);
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .any(|e| e.to_string() == "invalid value 'forked' for REXSH_MODE"));
}
