//! Record output
//!
//! The consumer end of the pipeline hands every finished record to a
//! [`RecordSink`]. Two line formats are provided:
//!
//! ```text
//! [01/02/2024 15:04:05 +0000] host="db1" open_connections="12"
//! {"_time":"2024-01-02T15:04:05+00:00","host":"db1","open_connections":12}
//! ```

use crate::error::MonitorResult;
use crate::record::{Record, Value};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Write;

/// Default layout of the bracketed event time
pub const DEFAULT_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S %z";

/// Key holding the event time in JSON output
pub const JSON_TIME_KEY: &str = "_time";

/// Output line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `[time] key="value" ...`
    #[default]
    Kv,
    /// One JSON object per line
    Json,
}

/// Destination for finished records
pub trait RecordSink: Send {
    fn write_record(&mut self, record: &Record) -> MonitorResult<()>;

    fn flush(&mut self) -> MonitorResult<()> {
        Ok(())
    }
}

/// Collects records in memory
impl RecordSink for Vec<Record> {
    fn write_record(&mut self, record: &Record) -> MonitorResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes `[time] key="value"` lines
pub struct LinePrinter<W: Write + Send> {
    out: W,
    space_replacement: String,
    time_format: String,
}

impl<W: Write + Send> LinePrinter<W> {
    pub fn new(out: W, space_replacement: impl Into<String>) -> Self {
        Self {
            out,
            space_replacement: space_replacement.into(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }

    /// Builder method: set the event time layout
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render one record without the trailing newline
    pub fn render(&self, record: &Record) -> String {
        let time = record.event_time().unwrap_or_else(Utc::now);
        let mut line = format!("[{}]", time.format(&self.time_format));

        for (key, value) in record.iter() {
            let key = key.replace(' ', &self.space_replacement);
            line.push_str(&format!(" {}=\"{}\"", key, escape(value)));
        }

        line
    }
}

fn escape(value: &Value) -> String {
    let text = value.to_string();
    if text.contains(['"', '\\']) {
        text.replace('\\', "\\\\").replace('"', "\\\"")
    } else {
        text
    }
}

impl<W: Write + Send> RecordSink for LinePrinter<W> {
    fn write_record(&mut self, record: &Record) -> MonitorResult<()> {
        let line = self.render(record);
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn flush(&mut self) -> MonitorResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Writes one JSON object per record
pub struct JsonLinePrinter<W: Write + Send> {
    out: W,
    space_replacement: String,
}

impl<W: Write + Send> JsonLinePrinter<W> {
    pub fn new(out: W, space_replacement: impl Into<String>) -> Self {
        Self {
            out,
            space_replacement: space_replacement.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn to_json(&self, record: &Record) -> MonitorResult<serde_json::Value> {
        let mut object = serde_json::Map::new();
        let time: DateTime<Utc> = record.event_time().unwrap_or_else(Utc::now);
        object.insert(JSON_TIME_KEY.to_string(), serde_json::to_value(time)?);

        for (key, value) in record.iter() {
            object.insert(
                key.replace(' ', &self.space_replacement),
                serde_json::to_value(value)?,
            );
        }

        Ok(serde_json::Value::Object(object))
    }
}

impl<W: Write + Send> RecordSink for JsonLinePrinter<W> {
    fn write_record(&mut self, record: &Record) -> MonitorResult<()> {
        let json = self.to_json(record)?;
        serde_json::to_writer(&mut self.out, &json)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> MonitorResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Build the sink for a configured format
pub fn sink_for<W: Write + Send + 'static>(
    format: OutputFormat,
    out: W,
    space_replacement: &str,
    time_format: &str,
) -> Box<dyn RecordSink> {
    match format {
        OutputFormat::Kv => {
            Box::new(LinePrinter::new(out, space_replacement).time_format(time_format))
        }
        OutputFormat::Json => Box::new(JsonLinePrinter::new(out, space_replacement)),
    }
}
