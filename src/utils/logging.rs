//! Logging setup for the popq binary and tests.
//!
//! Logs go to stderr: the CLI prints its JSON responses on stdout, one per
//! line, and scripts read them from there.

use tracing::Level;

/// Map a configured level name to a `tracing` level. Unknown names fall
/// back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the global `fmt` subscriber at `level` (see [`parse_level`]).
pub fn init(level: &str) {
    // try_init: tests call this repeatedly
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_config_spellings() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" warning "), Level::WARN);
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn init_can_run_twice() {
        init("info");
        init("debug");
    }
}
