//! Event time handling
//!
//! - `TimestampResolver`: pulls the event time out of a result record
//! - `parse_since`: turns a `--since` argument into a lower-bound timestamp

use crate::error::{MonitorError, MonitorResult};
use crate::record::{Record, Value};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Literal format accepted for absolute `--since` values (interpreted as UTC)
pub const SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Resolves a record's event time from one configured column
#[derive(Debug, Clone)]
pub struct TimestampResolver {
    column: Option<String>,
    format: String,
}

impl TimestampResolver {
    pub fn new(column: Option<String>, format: impl Into<String>) -> Self {
        Self {
            column: column.filter(|c| !c.is_empty()),
            format: normalize_layout(&format.into()),
        }
    }

    /// Write the event time into `record`, if it can be found
    ///
    /// Never fails: anything that cannot be resolved leaves the event time
    /// unset so the printer falls back to the dispatch time.
    pub fn resolve(&self, record: &mut Record) {
        let Some(column) = &self.column else {
            return;
        };

        let resolved = match record.get(column) {
            Some(Value::Timestamp(ts)) => Some(*ts),
            Some(Value::String(s)) => {
                let parsed = parse_with_format(s, &self.format);
                if parsed.is_none() {
                    tracing::warn!(
                        "Failed to parse timestamp {:?} in column {} with format {:?}",
                        s,
                        column,
                        self.format
                    );
                }
                parsed
            }
            Some(other) => {
                tracing::warn!(
                    "Timestamp column {} holds a {} value, ignoring",
                    column,
                    other.type_name()
                );
                None
            }
            None => {
                tracing::warn!("Timestamp column {} not present in result", column);
                None
            }
        };

        if let Some(ts) = resolved {
            record.set_event_time(ts);
        }
    }
}

/// Parse `s` with a single strftime format
///
/// Formats carrying a zone are honoured; zone-less date-times are taken as
/// UTC and bare dates as midnight UTC.
pub fn parse_with_format(s: &str, format: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_str(s, format) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
        return Some(dt.and_utc());
    }

    NaiveDate::parse_from_str(s, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Go reference-time tokens and their strftime equivalents, longest first
const GO_LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    (".999999999", "%.f"),
    ("January", "%B"),
    ("Monday", "%A"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("_2", "%e"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("PM", "%p"),
];

/// Accept Go reference layouts (`2006-01-02 15:04:05`) as well as strftime
///
/// Anything already containing a `%` directive, or lacking the reference
/// year and clock, is returned untouched.
pub fn normalize_layout(format: &str) -> String {
    if format.contains('%') || !(format.contains("2006") || format.contains("15:04")) {
        return format.to_string();
    }

    let mut out = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'scan: while !rest.is_empty() {
        for (token, directive) in GO_LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(directive);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

const PERIOD_PATTERN: &str = r"^([0-9]+)([smhdMy])$";

fn period_regex() -> MonitorResult<&'static Regex> {
    static PERIOD: OnceLock<Regex> = OnceLock::new();

    if let Some(re) = PERIOD.get() {
        return Ok(re);
    }
    let re = Regex::new(PERIOD_PATTERN).map_err(|source| MonitorError::InvalidRegex {
        pattern: PERIOD_PATTERN.to_string(),
        source,
    })?;
    Ok(PERIOD.get_or_init(|| re))
}

/// Length of one relative-period unit
///
/// `M` is a 30 day month and `y` a 365 day year.
fn unit_duration(unit: char) -> MonitorResult<Duration> {
    match unit {
        's' => Ok(Duration::seconds(1)),
        'm' => Ok(Duration::minutes(1)),
        'h' => Ok(Duration::hours(1)),
        'd' => Ok(Duration::days(1)),
        'M' => Ok(Duration::days(30)),
        'y' => Ok(Duration::days(365)),
        other => Err(MonitorError::UnknownDurationUnit(other)),
    }
}

/// Parse a lower-bound timestamp relative to `now`
///
/// Accepts either the absolute literal format (`2024-01-02 15:04:05.000`)
/// or a period such as `5m`, meaning `now` minus five minutes.
pub fn parse_since(input: &str, now: DateTime<Utc>) -> MonitorResult<DateTime<Utc>> {
    let input = input.trim();
    if let Some(caps) = period_regex()?.captures(input) {
        let amount: i32 = caps[1]
            .parse()
            .map_err(|_| MonitorError::InvalidSince(input.to_string()))?;
        let unit = caps[2]
            .chars()
            .next()
            .ok_or_else(|| MonitorError::InvalidSince(input.to_string()))?;

        let span = unit_duration(unit)?
            .checked_mul(amount)
            .ok_or_else(|| MonitorError::InvalidSince(input.to_string()))?;

        return now
            .checked_sub_signed(span)
            .ok_or_else(|| MonitorError::InvalidSince(input.to_string()));
    }

    NaiveDateTime::parse_from_str(input, SINCE_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|_| MonitorError::InvalidSince(input.to_string()))
}
