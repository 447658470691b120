//! Earshot — voice-activated audio recorder
//!
//! Captures PCM continuously, waits for the signal to cross an amplitude
//! threshold, and spills a lead-in padded window of the capture stream into
//! an external encoder (`lame` or `flac`) writing a timestamped file.
//! Recording stops after a grace period of silence, with a lead-out tail,
//! or on INT/TERM.

pub mod audio;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod fd;
pub mod monitor;
pub mod state;

pub use config::{ConfigError, Options, Params};
pub use engine::{Engine, EngineError};
pub use state::RecorderState;

/// Log to stderr with local-time timestamps; `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    /// Format timestamps using the system's local time via chrono
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(
            &self,
            w: &mut tracing_subscriber::fmt::format::Writer<'_>,
        ) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTimer)
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(stderr_layer)
        .init();
}
