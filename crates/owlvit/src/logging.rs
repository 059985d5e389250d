//! Logging initialization.
//!
//! Logs go to stderr so that stdout carries only detection output.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ONNX Runtime is chatty at info level.
const QUIET_TARGETS: &str = "ort=warn";

/// Initialize the logging subsystem at `level`, as pretty text or JSON.
///
/// `RUST_LOG` overrides `level` when set.
pub fn init(level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Initialize logging from `[logging]`, with CLI flags taking precedence.
pub fn init_from_config(
    config: &owlvit_core::Config,
    verbose_override: bool,
    json_logs_override: bool,
) {
    let level = if verbose_override {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let json_format = json_logs_override || config.logging.format == "json";
    init(level, json_format);
}

fn filter_directives(level: &str) -> String {
    format!("{level},{QUIET_TARGETS}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_parse() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            let directives = filter_directives(level);
            assert!(directives.starts_with(level));
            assert!(EnvFilter::try_new(&directives).is_ok());
        }
    }
}
