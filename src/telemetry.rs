//! Tracing initialization.
//!
//! Controlled by `TRAK_LOG` (an `EnvFilter` directive string):
//! - unset or empty → no subscriber, zero overhead;
//! - e.g. `TRAK_LOG=debug` or `TRAK_LOG=trak::locks=trace` → formatted
//!   events to stderr.
//!
//! stdout stays reserved for command output.

use tracing_subscriber::EnvFilter;

/// Env var holding the filter directive.
pub const ENV_LOG: &str = "TRAK_LOG";

/// Initialize tracing from the environment. Safe to call once from
/// `main`; does nothing when `TRAK_LOG` is unset.
pub fn init() {
    let Ok(directive) = std::env::var(ENV_LOG) else {
        return;
    };
    if directive.is_empty() {
        return;
    }
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}
