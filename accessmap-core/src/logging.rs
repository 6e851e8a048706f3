//! Log setup for the accessmap binary.
//!
//! Verbosity flags only raise the level of accessmap's own crates; SDK and
//! HTTP client chatter stays at WARN until `-vvv`. `RUST_LOG`, when set,
//! replaces the computed filter. Logs go to stderr so the model can be
//! written to stdout.

use crate::Result;
use crate::error::AccessMapError;
use tracing_subscriber::EnvFilter;

const OWN_CRATES: [&str; 2] = ["accessmap", "accessmap_core"];

/// Filter directives for the CLI verbosity flags.
///
/// `quiet` wins over `verbose`.
pub fn filter_directives(verbose: u8, quiet: bool) -> String {
    let (own, others) = match (quiet, verbose) {
        (true, _) => ("error", "error"),
        (false, 0) => ("info", "warn"),
        (false, 1) => ("debug", "warn"),
        (false, 2) => ("trace", "warn"),
        (false, _) => ("trace", "debug"),
    };

    std::iter::once(others.to_string())
        .chain(OWN_CRATES.iter().map(|krate| format!("{}={}", krate, own)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber.
///
/// # Errors
/// Returns a configuration error if `RUST_LOG` is malformed or a subscriber
/// is already installed
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(&directives),
        _ => EnvFilter::try_new(filter_directives(verbose, quiet)),
    }
    .map_err(|e| AccessMapError::configuration(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| AccessMapError::configuration(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_scopes_own_crates() {
        let test_cases = [
            ((true, 3), "error,accessmap=error,accessmap_core=error"),
            ((false, 0), "warn,accessmap=info,accessmap_core=info"),
            ((false, 1), "warn,accessmap=debug,accessmap_core=debug"),
            ((false, 2), "warn,accessmap=trace,accessmap_core=trace"),
            ((false, 7), "debug,accessmap=trace,accessmap_core=trace"),
        ];

        for ((quiet, verbose), expected) in test_cases {
            assert_eq!(
                filter_directives(verbose, quiet),
                expected,
                "quiet={}, verbose={}",
                quiet,
                verbose
            );
        }
    }

    #[test]
    fn test_directives_parse() {
        for verbose in 0..4 {
            assert!(EnvFilter::try_new(filter_directives(verbose, false)).is_ok());
        }
    }
}
