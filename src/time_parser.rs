//! Calendar and time-expression parser.
//!
//! Evaluates the date templates accepted by `start-time`-style settings:
//! ISO-like date/time strings with an optional numeric UTC offset, calendar
//! keywords (`current_day`, `previous_month`, `first_monday`, ...), and
//! additive interval spans such as `current_day + 9 hour + 50 minute`.
//! A `"utc"` or local timezone mode decides which wall clock the calendar
//! keywords are anchored to.
//!
//! This is an independent subsystem; the rule engine calls it as a black
//! box and treats its typed error as an opaque validation message.

use chrono::{
    DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref ISO_DATE: Regex = Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap();
    static ref ISO_TIME: Regex = Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap();
    static ref UTC_OFFSET: Regex = Regex::new(r"^([+-])(\d{2}):?(\d{2})$").unwrap();
    static ref CALENDAR_KEYWORD: Regex = Regex::new(
        r"^(current|previous|next|first|last)_(day|week|month|quarter|year|working_day|vacation_day|monday|tuesday|wednesday|thursday|friday|saturday|sunday)$"
    )
    .unwrap();
}

/// Typed failure carrying the offending fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}: {wrong_value}")]
pub struct ParseTimeError {
    pub wrong_value: String,
    pub message: String,
}

impl ParseTimeError {
    fn new(wrong_value: &str, message: &str) -> Self {
        Self {
            wrong_value: wrong_value.to_string(),
            message: message.to_string(),
        }
    }
}

/// Which wall clock calendar keywords are computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneMode {
    Utc,
    Local,
}

impl TimeZoneMode {
    /// Interprets the `time-zone` setting value; only `"utc"` selects UTC.
    pub fn from_setting(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("utc") {
            TimeZoneMode::Utc
        } else {
            TimeZoneMode::Local
        }
    }
}

/// Evaluator for date templates.
#[derive(Debug, Clone)]
pub struct TimeParser {
    mode: TimeZoneMode,
    /// Frozen "now" for tests; `None` means the real clock.
    now: Option<DateTime<Utc>>,
}

impl TimeParser {
    pub fn new(mode: TimeZoneMode) -> Self {
        Self { mode, now: None }
    }

    /// Parser with a frozen reference instant.
    pub fn with_now(mode: TimeZoneMode, now: DateTime<Utc>) -> Self {
        Self {
            mode,
            now: Some(now),
        }
    }

    fn now_wall_clock(&self) -> NaiveDateTime {
        let instant = self.now.unwrap_or_else(Utc::now);
        match self.mode {
            TimeZoneMode::Utc => instant.naive_utc(),
            TimeZoneMode::Local => instant.with_timezone(&Local).naive_local(),
        }
    }

    fn to_instant(&self, wall: NaiveDateTime) -> DateTime<Utc> {
        match self.mode {
            TimeZoneMode::Utc => Utc.from_utc_datetime(&wall),
            TimeZoneMode::Local => Local
                .from_local_datetime(&wall)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&wall)),
        }
    }

    /// Evaluates a full date template to an instant.
    pub fn parse_date_template(&self, text: &str) -> Result<DateTime<Utc>, ParseTimeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ParseTimeError::new(text, "empty date template"));
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let (mut wall, consumed) = self.parse_base(&tokens)?;
        let mut index = consumed;
        while index < tokens.len() {
            let (span, next) = parse_span(&tokens, index)?;
            wall = apply_span(wall, span);
            index = next;
        }
        Ok(self.to_instant(wall))
    }

    /// Parses the base expression, returning the wall-clock value and the
    /// number of tokens consumed.
    fn parse_base(&self, tokens: &[&str]) -> Result<(NaiveDateTime, usize), ParseTimeError> {
        let now = self.now_wall_clock();
        let first = tokens[0];

        match first {
            "now" => return Ok((now, 1)),
            "today" => return Ok((midnight(now.date()), 1)),
            "yesterday" => return Ok((midnight(now.date()) - Duration::days(1), 1)),
            "tomorrow" => return Ok((midnight(now.date()) + Duration::days(1), 1)),
            _ => {}
        }

        if let Some(caps) = CALENDAR_KEYWORD.captures(first) {
            let anchor = calendar_anchor(&caps[1], &caps[2], now)
                .ok_or_else(|| ParseTimeError::new(first, "invalid calendar expression"))?;
            return Ok((anchor, 1));
        }

        if ISO_DATE.is_match(first) {
            return self.parse_iso(tokens);
        }

        // Single-token ISO forms: 2019-06-11T10:00:00Z and friends.
        if let Ok(parsed) = DateTime::parse_from_rfc3339(first) {
            return Ok((self.to_wall(parsed), 1));
        }
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(first, format) {
                return Ok((parsed, 1));
            }
        }

        Err(ParseTimeError::new(first, "invalid date template"))
    }

    /// Parses the space-separated ISO form: `date [time] [offset]`.
    fn parse_iso(&self, tokens: &[&str]) -> Result<(NaiveDateTime, usize), ParseTimeError> {
        let caps = ISO_DATE.captures(tokens[0]).expect("caller checked");
        let year: i32 = caps[1].parse().unwrap();
        let month: u32 = caps[2].parse().unwrap();
        let day: u32 = caps[3].parse().unwrap();
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| ParseTimeError::new(tokens[0], "invalid calendar date"))?;

        let mut consumed = 1;
        let mut time = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        if let Some(token) = tokens.get(1) {
            if let Some(time_caps) = ISO_TIME.captures(token) {
                let hour: u32 = time_caps[1].parse().unwrap();
                let minute: u32 = time_caps[2].parse().unwrap();
                let second: u32 = time_caps
                    .get(3)
                    .map(|m| m.as_str().parse().unwrap())
                    .unwrap_or(0);
                time = NaiveTime::from_hms_opt(hour, minute, second)
                    .ok_or_else(|| ParseTimeError::new(token, "invalid time of day"))?;
                consumed = 2;
            }
        }

        let wall = NaiveDateTime::new(date, time);
        if consumed == 2 {
            if let Some(token) = tokens.get(2) {
                if let Some(offset_caps) = UTC_OFFSET.captures(token) {
                    let hours: i64 = offset_caps[2].parse().unwrap();
                    let minutes: i64 = offset_caps[3].parse().unwrap();
                    let mut shift = Duration::hours(hours) + Duration::minutes(minutes);
                    if &offset_caps[1] == "-" {
                        shift = -shift;
                    }
                    // An explicit offset pins the instant; re-express it on
                    // this parser's wall clock.
                    let instant = Utc.from_utc_datetime(&(wall - shift));
                    return Ok((self.to_wall_utc(instant), 3));
                }
            }
        }
        Ok((wall, consumed))
    }

    fn to_wall(&self, instant: DateTime<chrono::FixedOffset>) -> NaiveDateTime {
        self.to_wall_utc(instant.with_timezone(&Utc))
    }

    fn to_wall_utc(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self.mode {
            TimeZoneMode::Utc => instant.naive_utc(),
            TimeZoneMode::Local => instant.with_timezone(&Local).naive_local(),
        }
    }
}

// ============================================================================
// CALENDAR KEYWORDS
// ============================================================================

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap()
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = ((date.month0() / 3) * 3) + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap()
}

fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap()
}

fn named_weekday(unit: &str) -> Option<Weekday> {
    let weekday = match unit {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn is_working_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn step_until(mut date: NaiveDate, step: i64, accept: fn(NaiveDate) -> bool) -> NaiveDate {
    while !accept(date) {
        date += Duration::days(step);
    }
    date
}

fn add_months_to_date(date: NaiveDate, months: i32) -> NaiveDate {
    let magnitude = Months::new(months.unsigned_abs());
    if months >= 0 {
        date.checked_add_months(magnitude).unwrap_or(date)
    } else {
        date.checked_sub_months(magnitude).unwrap_or(date)
    }
}

fn calendar_anchor(prefix: &str, unit: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();

    if let Some(weekday) = named_weekday(unit) {
        let this_weeks = week_start(today) + Duration::days(weekday.num_days_from_monday() as i64);
        let date = match prefix {
            "current" => this_weeks,
            "previous" => this_weeks - Duration::days(7),
            "next" => this_weeks + Duration::days(7),
            "first" => {
                let mut date = month_start(today);
                while date.weekday() != weekday {
                    date += Duration::days(1);
                }
                date
            }
            "last" => {
                let mut date = add_months_to_date(month_start(today), 1) - Duration::days(1);
                while date.weekday() != weekday {
                    date -= Duration::days(1);
                }
                date
            }
            _ => return None,
        };
        return Some(midnight(date));
    }

    let date = match unit {
        "day" => match prefix {
            "current" => today,
            "previous" => today - Duration::days(1),
            "next" => today + Duration::days(1),
            "first" => month_start(today),
            "last" => add_months_to_date(month_start(today), 1) - Duration::days(1),
            _ => return None,
        },
        "week" => {
            let start = week_start(today);
            match prefix {
                "current" => start,
                "previous" => start - Duration::days(7),
                "next" => start + Duration::days(7),
                _ => return None,
            }
        }
        "month" => {
            let start = month_start(today);
            match prefix {
                "current" => start,
                "previous" => add_months_to_date(start, -1),
                "next" => add_months_to_date(start, 1),
                _ => return None,
            }
        }
        "quarter" => {
            let start = quarter_start(today);
            match prefix {
                "current" => start,
                "previous" => add_months_to_date(start, -3),
                "next" => add_months_to_date(start, 3),
                _ => return None,
            }
        }
        "year" => {
            let start = year_start(today);
            match prefix {
                "current" => NaiveDate::from_ymd_opt(start.year(), 1, 1).unwrap(),
                "previous" => NaiveDate::from_ymd_opt(start.year() - 1, 1, 1).unwrap(),
                "next" => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap(),
                _ => return None,
            }
        }
        "working_day" => {
            let current = step_until(today, -1, is_working_day);
            match prefix {
                "current" => current,
                "previous" => step_until(current - Duration::days(1), -1, is_working_day),
                "next" => step_until(today + Duration::days(1), 1, is_working_day),
                _ => return None,
            }
        }
        "vacation_day" => {
            let is_vacation = |d: NaiveDate| !is_working_day(d);
            let current = step_until(today, -1, is_vacation);
            match prefix {
                "current" => current,
                "previous" => step_until(current - Duration::days(1), -1, is_vacation),
                "next" => step_until(today + Duration::days(1), 1, is_vacation),
                _ => return None,
            }
        }
        _ => return None,
    };
    Some(midnight(date))
}

// ============================================================================
// INTERVAL SPANS
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum SpanUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    negative: bool,
    count: i64,
    unit: SpanUnit,
}

fn parse_unit(word: &str) -> Option<SpanUnit> {
    let singular = word.strip_suffix('s').unwrap_or(word);
    let unit = match singular {
        "millisecond" => SpanUnit::Millisecond,
        "second" | "sec" => SpanUnit::Second,
        "minute" | "min" => SpanUnit::Minute,
        "hour" => SpanUnit::Hour,
        "day" => SpanUnit::Day,
        "week" => SpanUnit::Week,
        "month" => SpanUnit::Month,
        "quarter" => SpanUnit::Quarter,
        "year" => SpanUnit::Year,
        _ => return None,
    };
    Some(unit)
}

/// Parses one `(+|-) <count>[*]<unit>` span starting at `index`, returning
/// the span and the index of the following token.
fn parse_span(tokens: &[&str], index: usize) -> Result<(Span, usize), ParseTimeError> {
    let op = tokens[index];
    let (negative, mut rest) = match op {
        "+" => (false, None),
        "-" => (true, None),
        _ if op.starts_with('+') => (false, Some(&op[1..])),
        _ if op.starts_with('-') => (true, Some(&op[1..])),
        _ => return Err(ParseTimeError::new(op, "expected '+' or '-'")),
    };
    let mut next = index + 1;

    // Count may be fused with the sign and/or `*unit`.
    let count_token = match rest.take() {
        Some(fused) if !fused.is_empty() => fused.to_string(),
        _ => {
            let token = tokens
                .get(next)
                .ok_or_else(|| ParseTimeError::new(op, "dangling interval operator"))?;
            next += 1;
            token.to_string()
        }
    };

    let (count_text, unit_text) = match count_token.split_once('*') {
        Some((count, unit)) => (count.to_string(), Some(unit.to_string())),
        None => (count_token, None),
    };

    let count: i64 = count_text
        .parse()
        .map_err(|_| ParseTimeError::new(&count_text, "invalid interval count"))?;

    let unit_word = match unit_text {
        Some(unit) if !unit.is_empty() => unit,
        _ => {
            let token = tokens
                .get(next)
                .ok_or_else(|| ParseTimeError::new(&count_text, "missing interval unit"))?;
            next += 1;
            token.to_string()
        }
    };

    let unit = parse_unit(&unit_word)
        .ok_or_else(|| ParseTimeError::new(&unit_word, "invalid interval unit"))?;

    Ok((
        Span {
            negative,
            count,
            unit,
        },
        next,
    ))
}

fn apply_span(wall: NaiveDateTime, span: Span) -> NaiveDateTime {
    let count = if span.negative { -span.count } else { span.count };
    match span.unit {
        SpanUnit::Millisecond => wall + Duration::milliseconds(count),
        SpanUnit::Second => wall + Duration::seconds(count),
        SpanUnit::Minute => wall + Duration::minutes(count),
        SpanUnit::Hour => wall + Duration::hours(count),
        SpanUnit::Day => wall + Duration::days(count),
        SpanUnit::Week => wall + Duration::weeks(count),
        SpanUnit::Month => shift_months(wall, count),
        SpanUnit::Quarter => shift_months(wall, count * 3),
        SpanUnit::Year => shift_months(wall, count * 12),
    }
}

fn shift_months(wall: NaiveDateTime, months: i64) -> NaiveDateTime {
    let magnitude = Months::new(months.unsigned_abs() as u32);
    if months >= 0 {
        wall.checked_add_months(magnitude).unwrap_or(wall)
    } else {
        wall.checked_sub_months(magnitude).unwrap_or(wall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen_utc_parser() -> TimeParser {
        // 2019-06-11T10:15:20+03:00 == 2019-06-11T07:15:20Z, a Tuesday.
        let now = DateTime::parse_from_rfc3339("2019-06-11T10:15:20+03:00")
            .unwrap()
            .with_timezone(&Utc);
        TimeParser::with_now(TimeZoneMode::Utc, now)
    }

    fn expect(parser: &TimeParser, template: &str, iso: &str) {
        let parsed = parser.parse_date_template(template).unwrap();
        let expected = DateTime::parse_from_rfc3339(iso).unwrap().with_timezone(&Utc);
        assert_eq!(parsed, expected, "template: {template}");
    }

    #[test]
    fn current_day_plus_spans() {
        let parser = frozen_utc_parser();
        expect(
            &parser,
            "current_day + 9 hour + 50 minute",
            "2019-06-11T09:50:00Z",
        );
    }

    #[test]
    fn plain_calendar_keywords() {
        let parser = frozen_utc_parser();
        expect(&parser, "current_day", "2019-06-11T00:00:00Z");
        expect(&parser, "today", "2019-06-11T00:00:00Z");
        expect(&parser, "yesterday", "2019-06-10T00:00:00Z");
        expect(&parser, "current_week", "2019-06-10T00:00:00Z");
        expect(&parser, "previous_week", "2019-06-03T00:00:00Z");
        expect(&parser, "current_month", "2019-06-01T00:00:00Z");
        expect(&parser, "previous_month", "2019-05-01T00:00:00Z");
        expect(&parser, "next_month", "2019-07-01T00:00:00Z");
        expect(&parser, "current_quarter", "2019-04-01T00:00:00Z");
        expect(&parser, "current_year", "2019-01-01T00:00:00Z");
    }

    #[test]
    fn named_weekdays() {
        let parser = frozen_utc_parser();
        // Week of 2019-06-10 (Monday) .. 2019-06-16 (Sunday).
        expect(&parser, "current_monday", "2019-06-10T00:00:00Z");
        expect(&parser, "current_friday", "2019-06-14T00:00:00Z");
        expect(&parser, "previous_friday", "2019-06-07T00:00:00Z");
        expect(&parser, "next_monday", "2019-06-17T00:00:00Z");
        expect(&parser, "first_monday", "2019-06-03T00:00:00Z");
        expect(&parser, "last_sunday", "2019-06-30T00:00:00Z");
    }

    #[test]
    fn working_and_vacation_days() {
        let parser = frozen_utc_parser();
        // The 11th is a Tuesday, so it is itself a working day.
        expect(&parser, "current_working_day", "2019-06-11T00:00:00Z");
        expect(&parser, "previous_working_day", "2019-06-10T00:00:00Z");
        expect(&parser, "next_working_day", "2019-06-12T00:00:00Z");
        expect(&parser, "current_vacation_day", "2019-06-09T00:00:00Z");
        expect(&parser, "next_vacation_day", "2019-06-15T00:00:00Z");
    }

    #[test]
    fn iso_forms() {
        let parser = frozen_utc_parser();
        expect(&parser, "2019-06-11", "2019-06-11T00:00:00Z");
        expect(&parser, "2019-06-11 10:00", "2019-06-11T10:00:00Z");
        expect(&parser, "2019-06-11 10:00:30", "2019-06-11T10:00:30Z");
        expect(&parser, "2019-06-11 10:00:00 +03:00", "2019-06-11T07:00:00Z");
        expect(&parser, "2019-06-11T10:00:00Z", "2019-06-11T10:00:00Z");
    }

    #[test]
    fn iso_with_spans() {
        let parser = frozen_utc_parser();
        expect(&parser, "2019-06-11 - 1 day", "2019-06-10T00:00:00Z");
        expect(&parser, "2019-01-31 + 1 month", "2019-02-28T00:00:00Z");
        expect(&parser, "2019-06-11 + 2*week", "2019-06-25T00:00:00Z");
    }

    #[test]
    fn rejects_garbage() {
        let parser = frozen_utc_parser();
        let err = parser.parse_date_template("eleventh of june").unwrap_err();
        assert_eq!(err.wrong_value, "eleventh");
        assert!(parser.parse_date_template("").is_err());
        assert!(parser.parse_date_template("current_day + x hour").is_err());
        assert!(parser.parse_date_template("current_day + 1 lightyear").is_err());
    }

    #[test]
    fn mode_from_setting_value() {
        assert_eq!(TimeZoneMode::from_setting("utc"), TimeZoneMode::Utc);
        assert_eq!(TimeZoneMode::from_setting(" UTC "), TimeZoneMode::Utc);
        assert_eq!(TimeZoneMode::from_setting("local"), TimeZoneMode::Local);
    }
}
