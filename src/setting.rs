//! A setting occurrence and its value-level type checking.
//!
//! A [`Setting`] is one `name = value` pair found in the document, bound to
//! its catalog descriptor (possibly scope-overridden) and its source range.
//! `check_type` performs the per-type validation; a value containing a
//! dynamic `${...}` or `@{...}` placeholder bypasses every check.

use std::sync::Arc;

use lazy_static::lazy_static;
use once_cell::unsync::OnceCell;
use regex::Regex;

use crate::catalog::{clear_setting_name, SettingDescriptor, SettingType};
use crate::diagnostics::{Diagnostic, Range};
use crate::time_parser::{ParseTimeError, TimeParser};

lazy_static! {
    /// Dynamic placeholder; suppresses all type checks.
    static ref CALCULATED_VALUE: Regex = Regex::new(r"\$\{.*\}|@\{.*\}").unwrap();
    static ref NUMBER_VALUE: Regex =
        Regex::new(r"^\s*[-+]?\d+(\.\d+)?([eE][-+]?\d+)?\s*$").unwrap();
    static ref INTEGER_VALUE: Regex = Regex::new(r"^\s*[-+]?\d+\s*$").unwrap();
    static ref INTERVAL_VALUE: Regex = Regex::new(
        r"^\s*\d+\s*(nanosecond|millisecond|sec|second|min|minute|hour|day|week|month|quarter|year)s?\s*$"
    )
    .unwrap();
    static ref PERCENTILE_VALUE: Regex = Regex::new(r"^percentile\((\d+(\.\d+)?)\)$").unwrap();
    static ref PERCENTILE_LEGACY: Regex = Regex::new(r"^percentile_(\d+(\.\d+)?)$").unwrap();
    /// Structural patterns applied to specific string settings.
    static ref GROUPS_VALUE: Regex = Regex::new(r"^[\d\s,;\-]+$").unwrap();
}

const BOOLEAN_KEYWORDS: &[&str] = &[
    "false", "no", "null", "none", "0", "off", "true", "yes", "on", "1",
];

/// One declared setting in the document.
#[derive(Debug, Clone)]
pub struct Setting {
    pub descriptor: Arc<SettingDescriptor>,
    /// The name exactly as written.
    pub display_name: String,
    /// Canonical name; two settings with equal names are the same setting.
    pub name: String,
    pub value: String,
    /// Additional values of a multi-line setting, in declaration order.
    pub values: Vec<String>,
    pub range: Range,
    parsed_time: OnceCell<Result<chrono::DateTime<chrono::Utc>, ParseTimeError>>,
}

impl Setting {
    pub fn new(
        descriptor: Arc<SettingDescriptor>,
        display_name: &str,
        value: &str,
        range: Range,
    ) -> Self {
        Self {
            descriptor,
            display_name: display_name.to_string(),
            name: clear_setting_name(display_name),
            value: value.to_string(),
            values: Vec::new(),
            range,
            parsed_time: OnceCell::new(),
        }
    }

    /// Appends a repeated declaration of a multi-line setting.
    pub fn push_value(&mut self, value: &str) {
        self.values.push(value.to_string());
    }

    /// All declared values: the first plus any accumulated ones, each split
    /// on commas.
    pub fn value_list(&self) -> Vec<String> {
        std::iter::once(self.value.as_str())
            .chain(self.values.iter().map(String::as_str))
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect()
    }

    /// Evaluates the value as a date template, caching the result for the
    /// lifetime of this occurrence.
    pub fn parse_time(
        &self,
        parser: &TimeParser,
    ) -> Result<chrono::DateTime<chrono::Utc>, ParseTimeError> {
        self.parsed_time
            .get_or_init(|| parser.parse_date_template(&self.value))
            .clone()
    }

    // ========================================================================
    // TYPE CHECKING
    // ========================================================================

    /// Validates the value against the descriptor type. Pure in
    /// `(type, value, enum, bounds, name)`; returns at most one diagnostic.
    pub fn check_type(&self) -> Option<Diagnostic> {
        if CALCULATED_VALUE.is_match(&self.value) {
            return None;
        }
        match self.descriptor.setting_type {
            SettingType::String => self.check_string(),
            SettingType::Number => self.check_numeric(false),
            SettingType::Integer => self.check_numeric(true),
            SettingType::Boolean => self.check_boolean(),
            SettingType::Enum => self.check_enum(),
            SettingType::Interval => self.check_interval(),
            SettingType::Date => self.check_date(),
            SettingType::Object => self.check_object(),
        }
    }

    fn check_string(&self) -> Option<Diagnostic> {
        let value = self.value.trim();
        if value.is_empty() {
            return Some(Diagnostic::error(
                self.range,
                format!("{} can not be empty", self.display_name),
            ));
        }
        if !self.descriptor.enum_values.is_empty() {
            for token in value.split(',').map(str::trim) {
                if !self.descriptor.enum_values.iter().any(|v| v == token) {
                    return Some(self.enum_mismatch(token));
                }
            }
            return None;
        }
        // Name-specific structural checks.
        if self.name == "groups" && !GROUPS_VALUE.is_match(value) {
            return Some(Diagnostic::error(
                self.range,
                format!(
                    "{} must be a list of group numbers, for example '1, 3-5'",
                    self.display_name
                ),
            ));
        }
        None
    }

    fn check_numeric(&self, integer: bool) -> Option<Diagnostic> {
        let mut value = self.value.trim().to_string();
        let mut scale = 1.0;
        // Percent form of arrow-length is rescaled before the bounds check.
        if self.name == "arrowlength" {
            if let Some(stripped) = value.strip_suffix('%') {
                value = stripped.trim().to_string();
                scale = 100.0;
            }
        }
        let pattern: &Regex = if integer { &INTEGER_VALUE } else { &NUMBER_VALUE };
        if !pattern.is_match(&value) {
            let expected = if integer { "an integer" } else { "a number" };
            return Some(Diagnostic::error(
                self.range,
                format!(
                    "{} should be {}, but '{}' is specified",
                    self.display_name, expected, self.value
                ),
            ));
        }
        let parsed: f64 = match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => return None,
        };
        self.check_bounds(parsed * scale)
    }

    fn check_bounds(&self, value: f64) -> Option<Diagnostic> {
        let min = self.descriptor.min_value;
        let max = self.descriptor.max_value;
        if min.is_none() && max.is_none() {
            return None;
        }
        let exclusive = self.descriptor.exclude_bounds;
        let below = min.is_some_and(|m| if exclusive { value <= m } else { value < m });
        let above = max.is_some_and(|m| if exclusive { value >= m } else { value > m });
        if !below && !above {
            return None;
        }
        let (open, close) = if exclusive { ("(", ")") } else { ("[", "]") };
        let describe = |bound: Option<f64>| -> String {
            bound.map(|b| format!("{b}")).unwrap_or_else(|| "∞".to_string())
        };
        Some(Diagnostic::error(
            self.range,
            format!(
                "{} should be in range {}{}, {}{}",
                self.display_name,
                open,
                describe(min),
                describe(max),
                close
            ),
        ))
    }

    fn check_boolean(&self) -> Option<Diagnostic> {
        let value = self.value.trim();
        if BOOLEAN_KEYWORDS.contains(&value) {
            return None;
        }
        Some(Diagnostic::error(
            self.range,
            format!(
                "{} should be a boolean value, for example 'true' or 'false'",
                self.display_name
            ),
        ))
    }

    fn check_enum(&self) -> Option<Diagnostic> {
        let value = self.value.trim();
        let has_percentile_form = self
            .descriptor
            .enum_values
            .iter()
            .any(|v| v.starts_with("percentile"));
        if has_percentile_form && value.starts_with("percentile") {
            return self.check_percentile(value);
        }
        let matched = self
            .descriptor
            .enum_values
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value));
        if matched {
            None
        } else {
            Some(self.enum_mismatch(value))
        }
    }

    fn check_percentile(&self, value: &str) -> Option<Diagnostic> {
        if let Some(caps) = PERCENTILE_VALUE.captures(value) {
            let level: f64 = caps[1].parse().unwrap_or(-1.0);
            if (0.0..=100.0).contains(&level) {
                return None;
            }
            return Some(Diagnostic::error(
                self.range,
                format!("percentile level must be between 0 and 100, but '{}' is specified", &caps[1]),
            ));
        }
        if PERCENTILE_LEGACY.is_match(value) {
            return Some(Diagnostic::warning(
                self.range,
                "underscore percentile syntax is deprecated, use percentile(n) instead",
            ));
        }
        Some(Diagnostic::error(
            self.range,
            "percentile requires a level in parentheses, for example percentile(95)",
        ))
    }

    fn check_interval(&self) -> Option<Diagnostic> {
        let value = self.value.trim();
        if value == "all" || INTERVAL_VALUE.is_match(value) {
            return None;
        }
        // Alternative literal values such as 'auto' may be allowed on top
        // of the interval form.
        if self
            .descriptor
            .enum_values
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value))
        {
            return None;
        }
        if INTEGER_VALUE.is_match(value) && self.name.contains("interval") {
            return Some(Diagnostic::warning(
                self.range,
                format!(
                    "specifying the interval in seconds is deprecated, use '<count> <unit>' format: for example '{} second'",
                    value
                ),
            ));
        }
        Some(Diagnostic::error(
            self.range,
            format!(
                "{} should be set as '<count> <unit>', for example '1 hour', or 'all'",
                self.display_name
            ),
        ))
    }

    fn check_date(&self) -> Option<Diagnostic> {
        let parser = TimeParser::new(crate::time_parser::TimeZoneMode::Utc);
        match parser.parse_date_template(self.value.trim()) {
            Ok(_) => None,
            Err(error) => Some(Diagnostic::error(
                self.range,
                format!("{}: {}", self.display_name, error),
            )),
        }
    }

    fn check_object(&self) -> Option<Diagnostic> {
        match serde_json::from_str::<serde_json::Value>(&self.value) {
            Ok(_) => None,
            Err(_) => Some(Diagnostic::error(
                self.range,
                format!("{} should be a valid object", self.display_name),
            )),
        }
    }

    fn enum_mismatch(&self, value: &str) -> Diagnostic {
        Diagnostic::error(
            self.range,
            format!(
                "'{}' is not a valid value for {}; must be one of: {}",
                value,
                self.display_name,
                self.descriptor.enum_values.join(", ")
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SettingDescriptor;

    fn setting(descriptor: SettingDescriptor, value: &str) -> Setting {
        let display = descriptor.display_name.clone();
        Setting::new(Arc::new(descriptor), &display, value, Range::on_line(0, 0, 5))
    }

    #[test]
    fn integer_rejects_text_and_mentions_type() {
        let descriptor = SettingDescriptor::new("limit", SettingType::Integer);
        let diagnostic = setting(descriptor, "abc").check_type().unwrap();
        assert!(diagnostic.message.contains("integer"));
    }

    #[test]
    fn integer_bounds_are_enforced() {
        let descriptor =
            SettingDescriptor::new("severity", SettingType::Integer).with_bounds(0.0, 10.0);
        assert!(setting(descriptor.clone(), "5").check_type().is_none());
        let diagnostic = setting(descriptor, "15").check_type().unwrap();
        assert!(diagnostic.message.contains("[0, 10]"));
    }

    #[test]
    fn placeholder_bypasses_all_checks() {
        let descriptor =
            SettingDescriptor::new("severity", SettingType::Integer).with_bounds(0.0, 10.0);
        assert!(setting(descriptor, "${level}").check_type().is_none());
        let descriptor = SettingDescriptor::new("start-time", SettingType::Date);
        assert!(setting(descriptor, "@{start}").check_type().is_none());
    }

    #[test]
    fn arrow_length_percent_is_rescaled() {
        let descriptor =
            SettingDescriptor::new("arrow-length", SettingType::Number).with_bounds(0.0, 100.0);
        // 0.5% -> 50 after rescaling, inside bounds.
        assert!(setting(descriptor.clone(), "0.5%").check_type().is_none());
        // 5% -> 500, out of bounds.
        assert!(setting(descriptor, "5%").check_type().is_some());
    }

    #[test]
    fn boolean_accepts_keyword_set_only() {
        let descriptor = SettingDescriptor::new("display", SettingType::Boolean);
        for value in ["true", "no", "1", "off"] {
            assert!(setting(descriptor.clone(), value).check_type().is_none());
        }
        assert!(setting(descriptor, "maybe").check_type().is_some());
    }

    #[test]
    fn enum_is_case_insensitive_and_lists_values() {
        let descriptor =
            SettingDescriptor::new("axis", SettingType::Enum).with_enum(&["left", "right"]);
        assert!(setting(descriptor.clone(), "LEFT").check_type().is_none());
        let diagnostic = setting(descriptor, "middle").check_type().unwrap();
        assert!(diagnostic.message.contains("left, right"));
    }

    #[test]
    fn percentile_forms() {
        let descriptor = SettingDescriptor::new("statistic", SettingType::Enum)
            .with_enum(&["avg", "percentile(n)"]);
        assert!(setting(descriptor.clone(), "percentile(95)").check_type().is_none());
        let over = setting(descriptor.clone(), "percentile(150)").check_type().unwrap();
        assert_eq!(over.severity, crate::diagnostics::DiagnosticSeverity::Error);
        let legacy = setting(descriptor.clone(), "percentile_75").check_type().unwrap();
        assert_eq!(legacy.severity, crate::diagnostics::DiagnosticSeverity::Warning);
        let broken = setting(descriptor, "percentile95").check_type().unwrap();
        assert!(broken.message.contains("parentheses"));
    }

    #[test]
    fn interval_forms() {
        let descriptor = SettingDescriptor::new("timespan", SettingType::Interval)
            .with_enum(&["all", "auto"]);
        assert!(setting(descriptor.clone(), "15 minute").check_type().is_none());
        assert!(setting(descriptor.clone(), "2 weeks").check_type().is_none());
        assert!(setting(descriptor.clone(), "all").check_type().is_none());
        assert!(setting(descriptor.clone(), "auto").check_type().is_none());
        assert!(setting(descriptor, "soon").check_type().is_some());
    }

    #[test]
    fn bare_seconds_interval_is_deprecation_warning() {
        let descriptor = SettingDescriptor::new("update-interval", SettingType::Interval);
        let diagnostic = setting(descriptor, "30").check_type().unwrap();
        assert_eq!(diagnostic.severity, crate::diagnostics::DiagnosticSeverity::Warning);
        assert!(diagnostic.message.contains("deprecated"));
    }

    #[test]
    fn object_requires_json() {
        let descriptor = SettingDescriptor::new("properties", SettingType::Object);
        assert!(setting(descriptor.clone(), r#"{"a": 1}"#).check_type().is_none());
        assert!(setting(descriptor, "{a: 1").check_type().is_some());
    }

    #[test]
    fn date_accepts_calendar_expressions() {
        let descriptor = SettingDescriptor::new("start-time", SettingType::Date);
        assert!(setting(descriptor.clone(), "current_day + 1 hour").check_type().is_none());
        assert!(setting(descriptor.clone(), "2019-06-11 10:00:00").check_type().is_none());
        assert!(setting(descriptor, "someday").check_type().is_some());
    }

    #[test]
    fn value_list_splits_commas_and_accumulated_values() {
        let descriptor = SettingDescriptor::new("colors", SettingType::String).multi_line();
        let mut colors = setting(descriptor, "red, green");
        colors.push_value("blue");
        assert_eq!(colors.value_list(), vec!["red", "green", "blue"]);
    }
}
