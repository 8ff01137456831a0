//! Timestamp parsing and display formatting.
//!
//! Every other module goes through [`normalize`] to turn wire strings into
//! instants; nothing else parses dates.

use crate::error::AppError;
use crate::sensor::types::DisplayLocale;
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const NAIVE_FORMATS: [&[FormatItem<'static>]; 4] = [
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
];

/// Parses a wire timestamp. Strings without an offset are read as UTC.
pub fn normalize(raw: &str) -> Result<OffsetDateTime, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidTimestamp(raw.to_string()));
    }

    if let Ok(instant) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(instant);
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(trimmed, format).ok())
        .map(PrimitiveDateTime::assume_utc)
        .ok_or_else(|| AppError::InvalidTimestamp(raw.to_string()))
}

const TIME_24H: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
const TIME_12H: &[FormatItem<'static>] =
    format_description!("[hour repr:12 padding:none]:[minute]:[second] [period]");
const DATE_DAY_FIRST: &[FormatItem<'static>] =
    format_description!("[day]/[month]/[year repr:last_two]");
const DATE_MONTH_FIRST: &[FormatItem<'static>] =
    format_description!("[month]/[day]/[year repr:last_two]");

fn format_local(instant: OffsetDateTime, offset: UtcOffset, format: &[FormatItem<'_>]) -> String {
    let local = instant.to_offset(offset);
    local.format(format).unwrap_or_else(|_| local.to_string())
}

/// Wall-clock time of day, e.g. `14:05:09` (es-MX) or `2:05:09 PM` (en-US).
pub fn format_time(instant: OffsetDateTime, locale: DisplayLocale, offset: UtcOffset) -> String {
    match locale {
        DisplayLocale::EsMx => format_local(instant, offset, TIME_24H),
        DisplayLocale::EnUs => format_local(instant, offset, TIME_12H),
    }
}

/// Short calendar date: `dd/mm/yy` (es-MX) or `mm/dd/yy` (en-US).
pub fn format_date(instant: OffsetDateTime, locale: DisplayLocale, offset: UtcOffset) -> String {
    match locale {
        DisplayLocale::EsMx => format_local(instant, offset, DATE_DAY_FIRST),
        DisplayLocale::EnUs => format_local(instant, offset, DATE_MONTH_FIRST),
    }
}
