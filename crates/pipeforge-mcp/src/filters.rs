//! Datetime filter normalization.
//!
//! Pipeforge requires datetime filters in `%Y-%m-%d %H:%M:%S` format
//! exactly. LLMs commonly send date-only strings (`gte:2026-02-02`),
//! ISO-8601 timestamps with `T`/`Z`/offsets, or `range:..` syntax, all of
//! which the server rejects as-is. This module rewrites the common cases
//! into the required format and passes anything unrecognized through
//! verbatim — the server's own validation stays the source of truth.

use std::sync::LazyLock;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};

/// Parameter names whose string values get normalized before a list call.
/// Configuration data: new list tools with other datetime params register
/// them here.
pub const DATETIME_FILTER_PARAMS: &[&str] = &["created", "updated", "start_time", "end_time"];

/// Recognized filter operators. An unknown prefix is part of the value.
const KNOWN_OPS: &[&str] = &[
    "equals",
    "notequals",
    "contains",
    "startswith",
    "endswith",
    "oneof",
    "gte",
    "gt",
    "lte",
    "lt",
    "in",
];

const UPPER_BOUND_OPS: &[&str] = &["lte", "lt"];

static DATE_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

static ISO_DT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2})T(\d{2}):(\d{2})(?::(\d{2}))?(?:\.\d+)?(Z|[+-]\d{2}:\d{2})?$",
    )
    .expect("valid regex")
});

static SPACE_FRAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\.\d+$").expect("valid regex")
});

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^range:(?P<lower>.+?)\.\.(?P<upper>.+)$").expect("valid regex"));

/// Normalize one filter value into Pipeforge's required datetime format.
///
/// - `range:lower..upper` → `in:lower,upper` (both sides normalized)
/// - `gte:YYYY-MM-DD` → `gte:YYYY-MM-DD 00:00:00`
/// - `lte:YYYY-MM-DD` → `lte:YYYY-MM-DD 23:59:59`
/// - ISO-8601 (`T` separator, `Z`/offset) → UTC with a space separator
/// - bare `YYYY-MM-DD` → `YYYY-MM-DD 00:00:00`
///
/// Non-datetime values (e.g. `contains:prod`, `oneof:completed,failed`)
/// come back unchanged. Idempotent: normalizing an already-normalized
/// value is the identity.
pub fn normalize_datetime_filter(value: &str) -> String {
    let raw = value.trim();
    if raw.is_empty() {
        return value.to_string();
    }

    // Convenience alias: range:lower..upper → in:lower,upper
    if let Some(caps) = RANGE_RE.captures(raw) {
        let lower = normalize_token(&caps["lower"], false);
        let upper = normalize_token(&caps["upper"], true);
        return format!("in:{},{}", lower, upper);
    }

    // Split optional op:value; unknown prefixes stay part of the value.
    let (op, rest) = match raw.split_once(':') {
        Some((head, tail)) if KNOWN_OPS.contains(&head) => (Some(head), tail),
        _ => (None, raw),
    };

    // in: takes a comma-separated lower,upper pair.
    if op == Some("in") {
        if let Some((lower, upper)) = rest.split_once(',') {
            let lower = normalize_token(lower, false);
            let upper = normalize_token(upper, true);
            return format!("in:{},{}", lower, upper);
        }
    }

    let upper_bound = op.is_some_and(|op| UPPER_BOUND_OPS.contains(&op));
    let normalized = normalize_token(rest, upper_bound);
    match op {
        Some(op) => format!("{}:{}", op, normalized),
        None => normalized,
    }
}

/// Normalize a single datetime token. Date-only values get a time of day
/// appended (end-of-day in upper-bound positions); ISO-8601 values are
/// converted to UTC and reformatted; anything else passes through.
fn normalize_token(token: &str, upper_bound: bool) -> String {
    let token = token.trim();

    if let Some(caps) = ISO_DT_RE.captures(token) {
        if let Some(formatted) = reformat_iso(&caps) {
            return formatted;
        }
    }

    if let Some(caps) = SPACE_FRAC_RE.captures(token) {
        return caps[1].to_string();
    }

    if DATE_ONLY_RE.is_match(token) {
        let time = if upper_bound { "23:59:59" } else { "00:00:00" };
        return format!("{} {}", token, time);
    }

    token.to_string()
}

fn reformat_iso(caps: &regex::Captures<'_>) -> Option<String> {
    let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
    let hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps[3].parse().ok()?;
    let second: u32 = caps
        .get(4)
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let naive = NaiveDateTime::new(date, time);

    let utc = match caps.get(5).map(|m| m.as_str()) {
        None => naive,
        Some("Z") => naive,
        Some(offset) => {
            let offset = parse_offset(offset)?;
            offset
                .from_local_datetime(&naive)
                .single()?
                .with_timezone(&Utc)
                .naive_utc()
        }
    };

    Some(utc.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Parse a `±HH:MM` offset (the regex guarantees the shape).
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = raw.split_at(1);
    let (hours, minutes) = rest.split_once(':')?;
    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    match sign {
        "+" => FixedOffset::east_opt(seconds),
        "-" => FixedOffset::west_opt(seconds),
        _ => None,
    }
}

/// Normalize every allow-listed datetime parameter in a query map.
/// Non-string values and absent keys are left alone.
pub fn normalize_datetime_params(params: &mut Map<String, Value>) {
    for key in DATETIME_FILTER_PARAMS {
        if let Some(Value::String(raw)) = params.get(*key) {
            let normalized = normalize_datetime_filter(raw);
            params.insert((*key).to_string(), Value::String(normalized));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // (input, expected)
    const CASES: &[(&str, &str)] = &[
        // date-only, no operator
        ("2026-02-01", "2026-02-01 00:00:00"),
        // date-only with operators
        ("gte:2026-02-01", "gte:2026-02-01 00:00:00"),
        ("gt:2026-02-01", "gt:2026-02-01 00:00:00"),
        ("lte:2026-02-01", "lte:2026-02-01 23:59:59"),
        ("lt:2026-02-01", "lt:2026-02-01 23:59:59"),
        ("equals:2026-02-01", "equals:2026-02-01 00:00:00"),
        // already correct format passes through
        ("gte:2026-02-01 00:00:00", "gte:2026-02-01 00:00:00"),
        ("2026-02-01 10:30:00", "2026-02-01 10:30:00"),
        // ISO-8601 T separator
        ("2026-02-01T10:00:00", "2026-02-01 10:00:00"),
        ("gte:2026-02-01T10:00:00", "gte:2026-02-01 10:00:00"),
        // ISO-8601 with Z suffix
        ("2026-02-01T10:00:00Z", "2026-02-01 10:00:00"),
        ("gte:2026-02-01T10:00:00Z", "gte:2026-02-01 10:00:00"),
        // fractional seconds are dropped
        ("2026-02-01T10:00:00.123Z", "2026-02-01 10:00:00"),
        ("2026-02-01T10:00:00.123456", "2026-02-01 10:00:00"),
        ("2026-02-01 10:00:00.123", "2026-02-01 10:00:00"),
        // missing seconds
        ("2026-02-01T10:00Z", "2026-02-01 10:00:00"),
        ("2026-02-01T10:00", "2026-02-01 10:00:00"),
        // timezone offsets converted to UTC
        ("2026-02-01T12:00:00+02:00", "2026-02-01 10:00:00"),
        ("2026-02-01T05:00:00-05:00", "2026-02-01 10:00:00"),
        ("gte:2026-02-01T12:00:00+02:00", "gte:2026-02-01 10:00:00"),
        // range: alias
        (
            "range:2026-02-01..2026-02-07",
            "in:2026-02-01 00:00:00,2026-02-07 23:59:59",
        ),
        (
            "range:2026-02-01T00:00:00Z..2026-02-07T23:59:59Z",
            "in:2026-02-01 00:00:00,2026-02-07 23:59:59",
        ),
        // in: pair, lower gets start-of-day, upper gets end-of-day
        (
            "in:2026-02-01,2026-02-07",
            "in:2026-02-01 00:00:00,2026-02-07 23:59:59",
        ),
        // non-datetime filters pass through unchanged
        ("contains:prod", "contains:prod"),
        ("oneof:completed,failed", "oneof:completed,failed"),
        ("startswith:train", "startswith:train"),
        ("notequals:running", "notequals:running"),
        // unknown prefix is part of the value, not an operator
        ("like:2026-02-01", "like:2026-02-01"),
        // unrecognized payloads pass through (server rejects if invalid)
        ("gte:not-a-date", "gte:not-a-date"),
        // whitespace is trimmed before normalization
        ("  2026-02-01  ", "2026-02-01 00:00:00"),
    ];

    #[test]
    fn normalization_table() {
        for (input, expected) in CASES {
            assert_eq!(
                normalize_datetime_filter(input),
                *expected,
                "input: {:?}",
                input
            );
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        for (input, _) in CASES {
            let once = normalize_datetime_filter(input);
            let twice = normalize_datetime_filter(&once);
            assert_eq!(once, twice, "not idempotent for input {:?}", input);
        }
    }

    #[test]
    fn range_equals_explicit_in() {
        let pairs = [
            ("2026-02-01", "2026-02-07"),
            ("2026-02-01T00:00:00Z", "2026-02-07T12:30:00Z"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                normalize_datetime_filter(&format!("range:{}..{}", a, b)),
                normalize_datetime_filter(&format!("in:{},{}", a, b)),
            );
        }
    }

    #[test]
    fn empty_and_whitespace_inputs() {
        assert_eq!(normalize_datetime_filter(""), "");
        // Whitespace-only input does not look like a datetime filter.
        assert_eq!(normalize_datetime_filter("   "), "   ");
    }

    #[test]
    fn query_map_normalization_honors_allow_list() {
        let mut params = Map::new();
        params.insert("created".into(), Value::String("gte:2026-02-01".into()));
        params.insert("name".into(), Value::String("2026-02-01".into()));
        params.insert("size".into(), Value::from(20));

        normalize_datetime_params(&mut params);

        assert_eq!(params["created"], "gte:2026-02-01 00:00:00");
        // Not on the allow-list: untouched even though it looks like a date.
        assert_eq!(params["name"], "2026-02-01");
        assert_eq!(params["size"], 20);
    }
}
