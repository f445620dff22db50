//! tracing subscriber setup shared by both binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for `rexshd`
pub const SERVER_FILTER: &str = "info,rexsh=debug";

/// Default filter for `rexsh`; the terminal belongs to the session output
pub const CLIENT_FILTER: &str = "warn";

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
/// Logs go to stderr so they never mix with command output on stdout.
pub fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}
