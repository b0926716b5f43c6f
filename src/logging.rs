//! Tracing subscriber setup for binaries. Library code only emits events.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Default filter for a `-v` count when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "syntax_to_sound=warn,runtime=info",
        1 => "syntax_to_sound=info,runtime=info",
        2 => "syntax_to_sound=debug,runtime=debug",
        _ => "trace",
    }
}

/// Install a stderr `fmt` subscriber. `RUST_LOG` wins over `verbosity`.
/// Later calls are no-ops.
pub fn init(verbosity: u8) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert!(default_directive(0).contains("warn"));
        assert!(default_directive(2).contains("debug"));
        assert_eq!(default_directive(9), "trace");
    }

    #[test]
    fn init_is_idempotent() {
        init(0);
        init(3);
    }
}
