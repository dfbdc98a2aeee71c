use std::io;

use slog::{self, slog_o, Drain, FilterLevel};
use slog_mozlog_json::MozLogJson;

fn filter_level(level: &str) -> FilterLevel {
    match level {
        "debug" => FilterLevel::Debug,
        "info" => FilterLevel::Info,
        "warn" => FilterLevel::Warning,
        "error" => FilterLevel::Error,
        _ => FilterLevel::Info,
    }
}

pub fn init_logging(json: bool, level: &str) {
    let logger = if json {
        let hostname = hostname::get()
            .expect("Couldn't get hostname")
            .into_string()
            .expect("Couldn't get hostname");

        let drain = MozLogJson::new(io::stdout())
            .logger_name(format!(
                "{}-{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .msg_type(format!("{}:log", env!("CARGO_PKG_NAME")))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_envlogger::LogBuilder::new(drain)
            .filter(None, filter_level(level))
            .build();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::LogBuilder::new(drain)
            .filter(None, filter_level(level))
            .build();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };
    // cancel_reset keeps the global logger installed through shutdown;
    // reset_logging swaps it for a discard logger instead.
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
}

pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
