use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;

static INIT: Once = Once::new();

/// Install the process-wide stderr subscriber with the level taken from
/// RLBOTCPP_LOG_LEVEL (NONE, ERROR, WARNING, INFO, DEBUG; default
/// WARNING). Calling it again is a no-op.
pub fn init() {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level_for(std::env::var("RLBOTCPP_LOG_LEVEL").ok().as_deref()))
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn level_for(raw: Option<&str>) -> LevelFilter {
    match raw {
        Some("NONE") => LevelFilter::OFF,
        Some("ERROR") => LevelFilter::ERROR,
        Some("WARNING") => LevelFilter::WARN,
        Some("INFO") => LevelFilter::INFO,
        Some("DEBUG") => LevelFilter::DEBUG,
        _ => LevelFilter::WARN,
    }
}
