use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    str::FromStr,
    sync::{Mutex, OnceLock},
};

use log::{LevelFilter, Log, Metadata, Record};

use crate::logging::LogError;

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Where log lines end up
#[derive(Debug)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(File),
}

impl LogTarget {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            LogTarget::Stdout => io::stdout().lock().write_all(line.as_bytes()),
            LogTarget::Stderr => io::stderr().lock().write_all(line.as_bytes()),
            LogTarget::File(file) => file.write_all(line.as_bytes()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogTarget::Stdout => io::stdout().flush(),
            LogTarget::Stderr => io::stderr().flush(),
            LogTarget::File(file) => file.flush(),
        }
    }
}

/// parses `stdout`, `stderr` or `file:///path/to/file`
pub fn target_from_str(target: &str) -> Result<LogTarget, LogError> {
    match target {
        "stdout" => Ok(LogTarget::Stdout),
        "stderr" => Ok(LogTarget::Stderr),
        _ => match target.strip_prefix("file://") {
            Some("") => Err(LogError::InvalidLogTarget(
                target.to_owned(),
                "file target without a path",
            )),
            Some(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(LogTarget::File)
                .map_err(|e| LogError::OpenFile(path.to_owned(), e)),
            None => Err(LogError::InvalidLogTarget(
                target.to_owned(),
                "expected stdout, stderr or file://",
            )),
        },
    }
}

pub fn level_from_str(level: &str) -> Result<LevelFilter, LogError> {
    LevelFilter::from_str(level).map_err(|_| LogError::InvalidLogLevel(level.to_owned()))
}

pub struct Logger {
    tag: String,
    pid: u32,
    level: LevelFilter,
    target: Mutex<LogTarget>,
}

impl Logger {
    pub fn new(tag: &str, level: LevelFilter, target: LogTarget) -> Self {
        Self {
            tag: tag.to_owned(),
            pid: std::process::id(),
            level,
            target: Mutex::new(target),
        }
    }

    pub fn format(&self, record: &Record) -> String {
        format!(
            "{} {} {} {}\t{}\n",
            time::OffsetDateTime::now_utc(),
            self.pid,
            self.tag,
            record.level(),
            record.args()
        )
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format(record);
        if let Ok(mut target) = self.target.lock() {
            // nowhere to report a failing log target
            let _ = target.write_line(&line);
        }
    }

    fn flush(&self) {
        if let Ok(mut target) = self.target.lock() {
            let _ = target.flush();
        }
    }
}

/// Install the logger for the whole process. Only the first call has an
/// effect, later calls still validate their arguments.
pub fn setup_logging(target: &str, level: &str, tag: &str) -> Result<(), LogError> {
    let level = level_from_str(level)?;
    let target = target_from_str(target)?;

    let logger = LOGGER.get_or_init(|| Logger::new(tag, level, target));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
    Ok(())
}

/// stdout logging, the level is taken from `RUST_LOG` when set
pub fn setup_default_logging(default_level: &str, tag: &str) {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_owned());
    if let Err(e) = setup_logging("stdout", &level, tag) {
        eprintln!("could not set up logging: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_targets() {
        assert!(matches!(target_from_str("stdout"), Ok(LogTarget::Stdout)));
        assert!(matches!(target_from_str("stderr"), Ok(LogTarget::Stderr)));
        assert!(matches!(
            target_from_str("file://"),
            Err(LogError::InvalidLogTarget(..))
        ));
        assert!(matches!(
            target_from_str("udp://127.0.0.1:514"),
            Err(LogError::InvalidLogTarget(..))
        ));
    }

    #[test]
    fn parse_levels() {
        assert_eq!(level_from_str("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(level_from_str("WARN").unwrap(), LevelFilter::Warn);
        assert!(level_from_str("verbose").is_err());
    }

    #[test]
    fn level_filtering() {
        let logger = Logger::new("TEST", LevelFilter::Info, LogTarget::Stderr);
        let info = Metadata::builder().level(log::Level::Info).build();
        let debug = Metadata::builder().level(log::Level::Debug).build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn line_format() {
        let logger = Logger::new("TEST", LevelFilter::Trace, LogTarget::Stderr);
        let line = logger.format(
            &Record::builder()
                .args(format_args!("hello"))
                .level(log::Level::Warn)
                .build(),
        );
        assert!(line.ends_with(" TEST WARN\thello\n"), "{line}");
    }
}
