//! Logging support.

use flexi_logger::{
    filter::{LogLineFilter, LogLineWriter},
    style, DeferredNow, Level, Logger, Record,
};
use libc::{isatty, STDOUT_FILENO};
use std::{fmt::Arguments, io::Write, sync::OnceLock, thread};

const DEFAULT_LOG_LEVEL: &str = "debug";

struct InternalOnly;
impl LogLineFilter for InternalOnly {
    fn write(
        &self,
        now: &mut DeferredNow,
        record: &Record,
        log_line_writer: &dyn LogLineWriter,
    ) -> std::io::Result<()> {
        // logs with paths that start with "/" are from 3rd party libraries
        if record.file().map_or(true, |file| !file.starts_with('/')) {
            log_line_writer.write(now, record)?;
        }
        Ok(())
    }
}

/// Initializes the global logger for the `log` logging facade. `tracing`
/// events are forwarded to it through the `log` feature.
///
/// Set `RAW_STDOUT` when the terminal is in raw mode, so every line also
/// returns the carriage.
///
/// # Panics
///
/// If logger fails to initialize
pub fn init<const RAW_STDOUT: bool>() {
    static LOGGER: OnceLock<flexi_logger::LoggerHandle> = OnceLock::new();
    LOGGER.get_or_init(|| {
        Logger::try_with_env_or_str(DEFAULT_LOG_LEVEL)
            .expect("failed to initialize logger")
            .format(format::<RAW_STDOUT>)
            .filter(Box::new(InternalOnly))
            .set_palette("124;3;4;146;7".into())
            .start()
            .expect("failed to initialize the logger")
    });
}

/// Formats a record to match systemd's new-style daemon format.
///
/// This function creates logs that can be ingested by journald by mapping a rust log to an
/// individual record (by removing newlines), and its log level to a syslog/systemd priority.
/// Systemd expects a record to be prefixed with a number `<n>` to indicate its priority, and
/// splits input streams at newline into individual records.
fn format_newstyle_daemon(w: &mut dyn Write, record: &Record<'_>) -> Result<(), std::io::Error> {
    w.write_all(priority(record.level()))?;
    write!(w, "[{}:{}] ", record.file().unwrap_or("<unnamed>"), record.line().unwrap_or(0),)?;
    w.write_all(sanitize_args(*record.args()).as_bytes())?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Removes newlines and carriages returns, replacing them spaces.
fn sanitize_args(args: Arguments<'_>) -> String {
    let s = std::fmt::format(args);
    s.trim().replace(['\n', '\r'], " ")
}

fn priority(level: Level) -> &'static [u8] {
    match level {
        Level::Error => b"<3>",
        Level::Warn => b"<4>",
        Level::Info => b"<5>",
        Level::Debug => b"<6>",
        Level::Trace => b"<7>",
    }
}

fn format<const RAW_STDOUT: bool>(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record<'_>,
) -> Result<(), std::io::Error> {
    let tty = unsafe { isatty(STDOUT_FILENO) } != 0;
    if tty {
        let level = record.level();
        let log = format!(
            "[{}] T[{:?}] {: <5} [{}:{}] {}",
            now.now().format("%y-%m-%d %H:%M:%S%.3f %:z"),
            thread::current().name().unwrap_or("<unnamed>"),
            level,
            record.file().unwrap_or("<unnamed>"),
            record.line().unwrap_or(0),
            &record.args()
        );
        write!(w, "{}", style(level).paint(log))?;
        if RAW_STDOUT {
            write!(w, "\r")?;
        }
        Ok(())
    } else {
        format_newstyle_daemon(w, record)
    }
}
