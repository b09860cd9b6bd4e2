use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{self, Write};

/// Behaviour of the terminal logger.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub level: LevelFilter,
    /// true actually means "auto": colors are still disabled when the output
    /// is not a terminal.
    pub colored: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            level: LevelFilter::Info,
            colored: true,
        }
    }
}

/// Installs the terminal logger with a focus on readability and aesthetics,
/// although it sacrifices parsability a little.
pub fn init(options: Options) -> Result<(), SetLoggerError> {
    if !options.colored {
        colored::control::set_override(false);
    }
    let level = options.level;
    log::set_boxed_logger(Box::new(TermLogger { level }))?;
    log::set_max_level(level);
    Ok(())
}

struct TermLogger {
    level: LevelFilter,
}

impl Log for TermLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = print_record(&mut out, record);
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn print_record(out: &mut impl Write, record: &Record) -> io::Result<()> {
    let time = chrono::Local::now().format("%H:%M:%S");
    match group(record) {
        Some(group) => write!(out, "[{}] {}: ", time, group.bold())?,
        None => write!(out, "[{}] ", time)?,
    }
    match record.level() {
        Level::Error => write!(out, "{}: {}", "ERROR".red(), record.args())?,
        Level::Warn => write!(out, "{}: {}", "WARNING".yellow(), record.args())?,
        _ => write!(out, "{}", record.args())?,
    }
    writeln!(out)
}

/// The log target carries the service name being worked on; targets that
/// point back into this crate's own modules are not a group.
fn group<'r>(record: &'r Record) -> Option<&'r str> {
    let target = record.target();
    if target.is_empty()
        || target == env!("CARGO_PKG_NAME")
        || target.starts_with(concat!(env!("CARGO_PKG_NAME"), "::"))
    {
        None
    } else {
        Some(target)
    }
}
