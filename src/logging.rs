use serde::{Deserialize, Serialize};

/// Log target carried by the engine's own records; filter on it to separate bus
/// traffic from application logging.
pub const BUS_LOG_TARGET: &str = "totembus";

/// Numeric verbosity carried in configuration records.
///
/// [BusConfig](crate::BusConfig) stores one of these; [set_log_level] maps it onto the
/// global `log` filter.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(from = "u32", into = "u32")]
pub enum LogLevel {
    Off = 0,
    Critical,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<u32> for LogLevel {
    fn from(level: u32) -> Self {
        match level {
            0 => Self::Off,
            1 => Self::Critical,
            2 => Self::Error,
            3 => Self::Warn,
            4 => Self::Info,
            5 => Self::Debug,
            6 => Self::Trace,
            _ => Self::Off,
        }
    }
}

impl From<LogLevel> for u32 {
    fn from(level: LogLevel) -> Self {
        level as u32
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Critical | LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Applies a verbosity to the global `log` filter.
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_round_trip() {
        for raw in 0..=6u32 {
            assert_eq!(u32::from(LogLevel::from(raw)), raw);
        }
        // Out-of-range levels silence logging rather than flooding it
        assert_eq!(LogLevel::from(99), LogLevel::Off);
    }

    #[test]
    fn test_filter_mapping() {
        assert_eq!(log::LevelFilter::from(LogLevel::Off), log::LevelFilter::Off);
        assert_eq!(
            log::LevelFilter::from(LogLevel::Critical),
            log::LevelFilter::Error
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Error),
            log::LevelFilter::Error
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Trace),
            log::LevelFilter::Trace
        );
    }

    #[test]
    fn test_set_log_level_applies_filter() {
        set_log_level(LogLevel::Trace);
        assert_eq!(log::max_level(), log::LevelFilter::Trace);
    }
}
