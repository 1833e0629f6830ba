//! Log output for the CLI.
//!
//! Events go to stderr through a `fmt` layer so command output on stdout
//! stays machine-readable. Verbosity follows `RUST_LOG` and defaults to
//! `info`; `RUST_LOG=gstore=debug` shows the SQL each cursor compiles to.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .with_target(false),
        )
        .try_init()?;
    Ok(())
}
