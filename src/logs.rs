//! Tracing subscriber setup.
//!
//! Diagnostics go to stderr so they never interleave with the REPL's
//! stdout.  `RUST_LOG` wins over the verbosity flag when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter for a verbosity count (`-v`, `-vv`).
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "codeloop=debug,info",
        _ => "trace",
    }
}

/// Install the global subscriber.  Calling it twice is harmless.
pub fn init(verbosity: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(default_directive(0), "warn");
        assert!(default_directive(1).contains("debug"));
        assert_eq!(default_directive(5), "trace");
    }
}
