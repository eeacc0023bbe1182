use std::path::PathBuf;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::json::JsonEncoder;
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Handle;

/// Configures the `log` facade with a console appender and, when a path is
/// given, a JSON file appender for debug-level logs. Returns the log4rs
/// handle on first call; later calls in the same process are no-ops (the
/// facade can only be installed once) and return `None`.
pub fn init_logging(log_filepath: Option<&PathBuf>) -> Option<Handle> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%dT%H:%M:%S%.3f)} {l} [{T}] {m}{n}",
        )))
        .build();

    let mut config_builder = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)));
    let mut root_builder = Root::builder().appender("console");

    if let Some(fp) = log_filepath {
        match FileAppender::builder()
            .encoder(Box::new(JsonEncoder::new()))
            .build(fp)
        {
            Ok(file_appender) => {
                config_builder = config_builder
                    .appender(Appender::builder().build("file", Box::new(file_appender)));
                root_builder = root_builder.appender("file");
            }
            Err(e) => {
                eprintln!("failed to open log file {fp:?}: {e}");
            }
        }
    }

    let config = config_builder
        .build(root_builder.build(LevelFilter::Info))
        .expect("failed to build logging config");

    match log4rs::init_config(config) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("logging already initialized: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_without_file_does_not_panic() {
        let _handle = init_logging(None);
    }
}
