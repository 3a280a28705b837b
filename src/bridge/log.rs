//! Log records destined for the host.
//!
//! These are engine-level events (dissector failures, window overflows,
//! capture trouble) addressed to the embedding host, not internal
//! diagnostics — those go through `tracing`. Records are deduplicated by
//! [`LogMessage::key`] inside the host bridge so a dissector failing on
//! every packet of a burst reaches the host once per service cycle.

use std::fmt;

use compact_str::CompactString;

/// Severity of a host-bound log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log record addressed to the host.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: LogLevel,
    /// Subsystem that produced the record (e.g. "dissector", "stream").
    pub domain: CompactString,
    /// Name of the resource involved (dissector name, flow id, device).
    pub resource_name: CompactString,
    /// Source description, e.g. a script line for plug-in dissectors.
    pub source_line: CompactString,
    pub message: String,
    pub line_number: Option<u32>,
    pub start_position: Option<u32>,
    pub end_position: Option<u32>,
    pub start_column: Option<u32>,
    pub end_column: Option<u32>,
}

impl LogMessage {
    pub fn new(level: LogLevel, domain: impl Into<CompactString>, message: impl Into<String>) -> Self {
        Self {
            level,
            domain: domain.into(),
            resource_name: CompactString::default(),
            source_line: CompactString::default(),
            message: message.into(),
            line_number: None,
            start_position: None,
            end_position: None,
            start_column: None,
            end_column: None,
        }
    }

    pub fn warn(domain: impl Into<CompactString>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, domain, message)
    }

    pub fn error(domain: impl Into<CompactString>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, domain, message)
    }

    pub fn with_resource(mut self, resource: impl Into<CompactString>) -> Self {
        self.resource_name = resource.into();
        self
    }

    pub fn with_source_line(mut self, line: impl Into<CompactString>) -> Self {
        self.source_line = line.into();
        self
    }

    /// Dedup key: (domain, resource, position, message). Two records with
    /// the same key within a coalescing window collapse to the newest.
    pub fn key(&self) -> String {
        format!(
            "{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}",
            self.domain,
            self.resource_name,
            self.line_number.map(|n| n as i64).unwrap_or(-1),
            self.start_column.map(|n| n as i64).unwrap_or(-1),
            self.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_fields_same_key() {
        let a = LogMessage::error("x", "m").with_resource("r").with_source_line("s");
        let b = LogMessage::error("x", "m").with_resource("r").with_source_line("s");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_discriminates_fields() {
        let base = LogMessage::error("x", "m").with_resource("r");
        let other_domain = LogMessage::error("y", "m").with_resource("r");
        let other_msg = LogMessage::error("x", "n").with_resource("r");
        let mut other_line = base.clone();
        other_line.line_number = Some(3);

        assert_ne!(base.key(), other_domain.key());
        assert_ne!(base.key(), other_msg.key());
        assert_ne!(base.key(), other_line.key());
    }

    #[test]
    fn test_level_not_part_of_key() {
        // A repeated message that flips level still coalesces
        let a = LogMessage::warn("x", "m");
        let b = LogMessage::error("x", "m");
        assert_eq!(a.key(), b.key());
    }
}
