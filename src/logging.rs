//! Logging setup on `tracing` / `tracing-subscriber`.
//!
//! Levels by `-v` count:
//!
//! | flag   | level | shows                                           |
//! |--------|-------|-------------------------------------------------|
//! | none   | warn  | CRC mismatches only (or `RUST_LOG` when set)    |
//! | `-v`   | debug | candidates, sections, streams, carved images    |
//! | `-vv`  | trace | rejected fragments, ignored trailing bytes      |

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr.  A second call is a
/// no-op.
pub fn init_logging(verbosity: u8) {
    let filter = if verbosity == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(0)))
    } else {
        EnvFilter::new(level_for(verbosity))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
