// src/duration.rs
//! ISO-8601-style duration codec for video metadata (`PT1H5M30S` and the
//! extended week/day/month/year forms). Malformed input parses to 0.

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;
const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

/// Parse a `PTnHnMnS`-style duration into milliseconds.
///
/// Each numeric run is bound to the unit letter that follows it, so
/// `PT2H10M` and `PT5M3S` both resolve correctly regardless of which
/// units are present. Inside the `PT` body `M` always means minutes.
/// Anything that does not start with `PT`, an unknown unit letter, or a
/// trailing number without a unit contributes 0.
pub fn parse_iso8601_duration(s: &str) -> u64 {
    let Some(body) = s.strip_prefix("PT").or_else(|| s.strip_prefix("pt")) else {
        return 0;
    };

    let mut total = 0u64;
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().unwrap_or(0);
        digits.clear();
        let unit_ms = match c.to_ascii_uppercase() {
            'S' => MS_PER_SECOND,
            'M' => MS_PER_MINUTE,
            'H' => MS_PER_HOUR,
            'D' => MS_PER_DAY,
            'W' => MS_PER_WEEK,
            'Y' => MS_PER_YEAR,
            _ => 0,
        };
        total = total.saturating_add(value.saturating_mul(unit_ms));
    }
    total
}

/// Format milliseconds as a compact `H:MM:SS`-style display string, widening
/// to days/weeks/months/years as needed. Zero leading components collapse,
/// so 45 seconds renders as `:45`.
pub fn format_duration_ms(ms: u64) -> String {
    fn lead(digit: u64) -> String {
        if digit > 9 {
            format!("{digit}")
        } else if digit > 0 {
            format!("0{digit}")
        } else {
            String::new()
        }
    }

    let seconds = lead(ms / MS_PER_SECOND % 60);
    let minutes = lead(ms / MS_PER_MINUTE % 60);
    let hours = lead(ms / MS_PER_HOUR % 24);
    let days = lead(ms / MS_PER_DAY % 30);
    let weeks = lead(ms / MS_PER_WEEK % 4);
    let months = lead(ms / (30 * MS_PER_DAY) % 12);
    let years = lead(ms / MS_PER_YEAR);

    let pad = |s: String| if s.is_empty() { "00".to_string() } else { s };

    let mut output = vec![minutes, seconds];
    if !years.is_empty() {
        let tail: Vec<String> = vec![months, weeks, days, hours]
            .into_iter()
            .map(pad)
            .collect();
        output.splice(0..0, std::iter::once(years).chain(tail));
    } else if !months.is_empty() {
        let tail: Vec<String> = vec![weeks, days, hours].into_iter().map(pad).collect();
        output.splice(0..0, std::iter::once(months).chain(tail));
    } else if !weeks.is_empty() {
        let tail: Vec<String> = vec![days, hours].into_iter().map(pad).collect();
        output.splice(0..0, std::iter::once(weeks).chain(tail));
    } else if !days.is_empty() {
        output.splice(0..0, vec![days, pad(hours)]);
    } else if !hours.is_empty() {
        output.insert(0, hours);
    }
    output.join(":")
}
