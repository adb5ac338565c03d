pub mod serial {
    use std::fmt;
    use std::io::{self, IsTerminal, Write};
    use std::str::FromStr;

    use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

    /// ANSI terminal colours used for the level tag.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum LogColor {
        Reset,
        Red,
        Green,
        Yellow,
        Purple,
        Cyan,
    }

    impl LogColor {
        pub fn as_terminal_string(&self) -> &'static str {
            match *self {
                LogColor::Red => "\x1b[31m",
                LogColor::Green => "\x1b[32m",
                LogColor::Yellow => "\x1b[33m",
                LogColor::Purple => "\x1b[35m",
                LogColor::Cyan => "\x1b[36m",
                LogColor::Reset => "\x1b[0m",
            }
        }

        pub fn for_level(level: Level) -> LogColor {
            match level {
                Level::Error => LogColor::Red,
                Level::Warn => LogColor::Yellow,
                Level::Info => LogColor::Cyan,
                Level::Debug => LogColor::Green,
                Level::Trace => LogColor::Purple,
            }
        }
    }

    /// Host stand-in for the kernel's serial port: one line per record on
    /// stderr. Filtering is left to `log::max_level`.
    pub struct SerialLogger;

    static LOGGER: SerialLogger = SerialLogger;

    impl Log for SerialLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }

            let mut line = format_line(record.level(), record.target(), record.args());
            if io::stderr().is_terminal() {
                let color = LogColor::for_level(record.level());
                line = format!(
                    "{}{}{}",
                    color.as_terminal_string(),
                    line,
                    LogColor::Reset.as_terminal_string()
                );
            }

            let _ = writeln!(io::stderr().lock(), "{line}");
        }

        fn flush(&self) {
            let _ = io::stderr().flush();
        }
    }

    /// `[LEVEL target] message`, the uncoloured form of every log line.
    pub fn format_line(level: Level, target: &str, args: &fmt::Arguments) -> String {
        format!("[{level:<5} {target}] {args}")
    }

    pub fn parse_level(text: &str) -> Result<LevelFilter, String> {
        LevelFilter::from_str(text.trim()).map_err(|_| format!("unknown log level '{text}'"))
    }

    /// Install the logger. Only the first call in a process succeeds.
    pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(level);
        Ok(())
    }
}
