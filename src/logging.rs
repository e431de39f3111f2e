use clap::ArgMatches;
use std::borrow::Borrow;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Directives applied in addition to `RUST_LOG`. The FTP client reports
/// every control channel command at `debug`.
const QUIET_DIRECTIVES: &[&str] = &["suppaftp=warn"];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoggingStyle {
    /// Uses compact logging.
    Compact,
    /// Uses JSON formatted logging
    Json,
}

/// Initializes the tracing and logging system from arguments.
///
/// ## Arguments
/// * `matches` - The clap argument matches.
pub fn initialize_from_matches<M: Borrow<ArgMatches>>(matches: M) {
    let style = matches
        .borrow()
        .get_one::<LoggingStyle>("logging_style")
        .copied()
        .unwrap_or(LoggingStyle::Compact);
    initialize(style)
}

/// Initializes the tracing and logging system.
///
/// Use the `RUST_LOG` environment variable to tune the levels,
/// e.g. `RUST_LOG=transfer_queue=debug`.
///
/// ## Arguments
/// * `style` - The logging style to use.
pub fn initialize<S: Borrow<LoggingStyle>>(style: S) {
    let formatter = tracing_subscriber::fmt()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_env_filter(build_filter());

    match style.borrow() {
        LoggingStyle::Compact => formatter.compact().init(),
        LoggingStyle::Json => formatter.json().flatten_event(true).init(),
    }
}

fn build_filter() -> EnvFilter {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    QUIET_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(filter, EnvFilter::add_directive)
}
