//! Log output for the `iwa`, `iwad` and `iwa-model` binaries.
//!
//! Text output is for a terminal. `--json` output is for container log
//! collection: event fields are flattened to the top level, so the `event`
//! field written by [`crate::obs`] and the `task_id`/`run_id` of the
//! enclosing [`crate::TaskSpan`] can be filtered on directly.
//!
//! `RUST_LOG` overrides the level chosen on the command line. The HTTP stack
//! stays at `info` under `--verbose` so step logs are not buried in
//! connection chatter.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose debug output is connection-level noise.
const HTTP_STACK: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls", "tower"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let mut directives = level.as_str().to_ascii_lowercase();
    if level > Level::INFO {
        for krate in HTTP_STACK {
            directives.push_str(&format!(",{krate}=info"));
        }
    }
    directives
}

/// Install the process-wide subscriber. Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_quiets_http_stack() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("hyper=info"));
        assert!(directives.contains("reqwest=info"));
    }

    #[test]
    fn test_info_has_no_overrides() {
        assert_eq!(default_directives(Level::INFO), "info");
        assert_eq!(default_directives(Level::WARN), "warn");
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
