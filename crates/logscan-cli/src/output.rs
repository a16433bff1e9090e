//! Output formatting for CLI commands.
//!
//! Every record is written and flushed as soon as it arrives so that
//! followed streams reach the reader without delay.

use std::io::Write;

use logscan::{LogRecord, RawMatch};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter for records and matches.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Write one value as a single line and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TextDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Text => value.write_text(writer)?,
        }
        writer.flush()?;
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Json)
    }
}

/// Types with a plain-text line rendering.
pub trait TextDisplay {
    /// Write the value as one human-readable line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_text<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

impl TextDisplay for LogRecord {
    fn write_text<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "{} {}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            self.message
        )?;
        Ok(())
    }
}

impl TextDisplay for RawMatch {
    fn write_text<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}:{}", self.line_number, self.text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logscan::StreamKind;

    fn record() -> LogRecord {
        LogRecord {
            timestamp: Utc
                .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
                .single()
                .expect("valid time"),
            message: "hello".to_string(),
            stream: StreamKind::Stderr,
            partial: false,
            source_offset: 0,
        }
    }

    #[test]
    fn json_is_one_line_per_record() {
        let mut buf = Vec::new();
        OutputFormat::new(Format::Json)
            .write(&mut buf, &record())
            .expect("write");
        let text = String::from_utf8(buf).expect("utf8");

        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"message\":\"hello\""));
        assert!(text.contains("\"stream\":\"stderr\""));
    }

    #[test]
    fn text_format_for_records_and_matches() {
        let format = OutputFormat::new(Format::Text);

        let mut buf = Vec::new();
        format.write(&mut buf, &record()).expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "2024-05-01T10:00:00Z hello\n");

        let mut buf = Vec::new();
        let found = RawMatch {
            offset: 10,
            line_number: 3,
            text: "needle".to_string(),
        };
        format.write(&mut buf, &found).expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "3:needle\n");
    }
}
