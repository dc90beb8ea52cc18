//! Cross-setting consistency rules, run once over the completed tree.
//!
//! Each rule is a named check applied to every section of its target kind
//! in declaration order. Checks read effective values through the tree
//! (nearest declaring ancestor, catalog default as fallback) so a value
//! declared on `[widget]` constrains every `[series]` under it.

use crate::catalog::{clear_setting_name, Catalog};
use crate::config_tree::{ConfigTree, SectionId};
use crate::diagnostics::{dedupe_by_range, Diagnostic};
use crate::setting::Setting;
use crate::time_parser::{TimeParser, TimeZoneMode};

// ============================================================================
// RULE PLUMBING
// ============================================================================

/// What a single rule produced for a single section.
pub enum RuleResult {
    None,
    One(Diagnostic),
    Many(Vec<Diagnostic>),
}

impl RuleResult {
    fn append_to(self, out: &mut Vec<Diagnostic>) {
        match self {
            RuleResult::None => {}
            RuleResult::One(diagnostic) => out.push(diagnostic),
            RuleResult::Many(diagnostics) => out.extend(diagnostics),
        }
    }
}

impl From<Option<Diagnostic>> for RuleResult {
    fn from(diagnostic: Option<Diagnostic>) -> Self {
        match diagnostic {
            Some(diagnostic) => RuleResult::One(diagnostic),
            None => RuleResult::None,
        }
    }
}

pub struct Rule {
    pub name: &'static str,
    pub check: fn(&RuleContext) -> RuleResult,
}

pub struct RuleContext<'a> {
    pub tree: &'a ConfigTree,
    pub section: SectionId,
    pub catalog: &'a Catalog,
}

impl RuleContext<'_> {
    /// The setting as declared in this section or any ancestor.
    fn declared(&self, name: &str) -> Option<&Setting> {
        self.tree
            .get_setting_from_tree(self.section, &clear_setting_name(name))
    }

    /// Declared value, falling back to the catalog default.
    fn effective_value(&self, name: &str) -> Option<String> {
        match self.declared(name) {
            Some(setting) => Some(setting.value.clone()),
            None => self.catalog.default_value(name).map(str::to_string),
        }
    }

    fn condition(&self, setting: &str, allowed: &[&str]) -> bool {
        match self.effective_value(setting) {
            Some(value) => allowed.contains(&value.trim()),
            None => false,
        }
    }

    fn time_parser(&self) -> TimeParser {
        let mode = self
            .effective_value("timezone")
            .map(|value| TimeZoneMode::from_setting(&value))
            .unwrap_or(TimeZoneMode::Local);
        TimeParser::new(mode)
    }
}

/// Sections the engine visits, with the rules applied to each.
const RULE_TABLE: &[(&str, &[Rule])] = &[("widget", WIDGET_RULES), ("series", SERIES_RULES)];

pub fn apply_rules(tree: &ConfigTree, catalog: &Catalog) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (target, rules) in RULE_TABLE {
        for section in tree.sections_named(target) {
            let context = RuleContext {
                tree,
                section,
                catalog,
            };
            for rule in *rules {
                (rule.check)(&context).append_to(&mut diagnostics);
            }
        }
    }
    dedupe_by_range(diagnostics)
}

// ============================================================================
// GENERIC SHAPES
// ============================================================================

const THRESHOLD_WIDGETS: &[&str] = &["calendar", "treemap", "gauge"];

/// `required` (any one of them) must accompany `present` when every
/// condition holds.
fn required_if_present(
    context: &RuleContext,
    present: &str,
    required: &[&str],
    conditions: &[(&str, &[&str])],
) -> RuleResult {
    let Some(setting) = context.declared(present) else {
        return RuleResult::None;
    };
    if !conditions
        .iter()
        .all(|(name, allowed)| context.condition(name, allowed))
    {
        return RuleResult::None;
    }
    if required.iter().any(|name| context.declared(name).is_some()) {
        return RuleResult::None;
    }
    let message = match required {
        [single] => format!("{single} is required if {present} is specified"),
        many => format!(
            "one of {} is required if {present} is specified",
            many.join(", ")
        ),
    };
    RuleResult::One(Diagnostic::error(setting.range, message))
}

/// Warns that `present` is inert because a governing setting does not
/// match any allowed value.
fn useless_without(
    context: &RuleContext,
    present: &str,
    conditions: &[(&str, &[&str])],
) -> RuleResult {
    let Some(setting) = context.declared(present) else {
        return RuleResult::None;
    };
    let failed: Vec<String> = conditions
        .iter()
        .filter(|(name, allowed)| !context.condition(name, allowed))
        .map(|(name, allowed)| format!("{name} is one of {}", allowed.join(", ")))
        .collect();
    if failed.is_empty() {
        return RuleResult::None;
    }
    RuleResult::One(Diagnostic::warning(
        setting.range,
        format!("{present} has effect only when {}", failed.join(" and ")),
    ))
}

// ============================================================================
// WIDGET RULES
// ============================================================================

const WIDGET_RULES: &[Rule] = &[
    Rule {
        name: "thresholds required with colors",
        check: |context| {
            required_if_present(
                context,
                "colors",
                &["thresholds"],
                &[("type", THRESHOLD_WIDGETS)],
            )
        },
    },
    Rule {
        name: "colors count matches thresholds",
        check: check_colors_match_thresholds,
    },
    Rule {
        name: "start-time before end-time",
        check: check_start_before_end,
    },
    Rule {
        name: "forecast horizon after end-time",
        check: check_forecast_horizon,
    },
    Rule {
        name: "redundant time span",
        check: check_simultaneous_time_settings,
    },
];

fn check_colors_match_thresholds(context: &RuleContext) -> RuleResult {
    let (Some(colors), Some(thresholds)) =
        (context.declared("colors"), context.declared("thresholds"))
    else {
        return RuleResult::None;
    };
    if !context.condition("type", THRESHOLD_WIDGETS) {
        return RuleResult::None;
    }
    let expected = thresholds.value_list().len().saturating_sub(1);
    if colors.value_list().len() == expected {
        return RuleResult::None;
    }
    RuleResult::One(Diagnostic::error(
        colors.range,
        "Number of colors (if specified) must be equal to number of thresholds minus 1",
    ))
}

fn check_start_before_end(context: &RuleContext) -> RuleResult {
    let (Some(start), Some(end)) = (
        context.declared("starttime"),
        context.declared("endtime"),
    ) else {
        return RuleResult::None;
    };
    let parser = context.time_parser();
    // unparsable values were already reported by the type check
    let (Ok(start_value), Ok(end_value)) = (start.parse_time(&parser), end.parse_time(&parser))
    else {
        return RuleResult::None;
    };
    if start_value < end_value {
        return RuleResult::None;
    }
    RuleResult::One(Diagnostic::error(
        start.range,
        "start-time must be less than end-time",
    ))
}

fn check_forecast_horizon(context: &RuleContext) -> RuleResult {
    let (Some(horizon), Some(end)) = (
        context.declared("forecasthorizonendtime"),
        context.declared("endtime"),
    ) else {
        return RuleResult::None;
    };
    let parser = context.time_parser();
    let (Ok(horizon_value), Ok(end_value)) =
        (horizon.parse_time(&parser), end.parse_time(&parser))
    else {
        return RuleResult::None;
    };
    if horizon_value > end_value {
        return RuleResult::None;
    }
    RuleResult::One(Diagnostic::error(
        horizon.range,
        "forecast-horizon-end-time must be greater than end-time",
    ))
}

fn check_simultaneous_time_settings(context: &RuleContext) -> RuleResult {
    let settings = [
        context.declared("starttime"),
        context.declared("endtime"),
        context.declared("timespan"),
    ];
    let [Some(start), Some(end), Some(span)] = settings else {
        return RuleResult::None;
    };
    // the later-declared of the three is the one silently ignored
    let last = [start, end, span]
        .into_iter()
        .max_by_key(|setting| setting.range.start)
        .expect("three candidates");
    RuleResult::One(Diagnostic::warning(
        last.range,
        format!(
            "start-time, end-time and timespan must not be declared simultaneously; {} is ignored",
            last.display_name
        ),
    ))
}

// ============================================================================
// SERIES RULES
// ============================================================================

const SERIES_RULES: &[Rule] = &[
    Rule {
        name: "attribute needs table",
        check: |context| required_if_present(context, "attribute", &["table"], &[]),
    },
    Rule {
        name: "table needs attribute",
        check: |context| required_if_present(context, "table", &["attribute"], &[]),
    },
    Rule {
        name: "alert-style needs alert-expression",
        check: |context| {
            required_if_present(context, "alertstyle", &["alertexpression"], &[])
        },
    },
    Rule {
        name: "negative-style needs column mode",
        check: |context| {
            useless_without(
                context,
                "negativestyle",
                &[("mode", &["column", "column-stack"])],
            )
        },
    },
    Rule {
        name: "ssa group count below eigentriple limit",
        check: check_ssa_eigentriple_limit,
    },
];

fn check_ssa_eigentriple_limit(context: &RuleContext) -> RuleResult {
    let Some(count) = context.declared("forecastssagroupautocount") else {
        return RuleResult::None;
    };
    let Some(limit) = context.effective_value("forecast-ssa-decompose-eigentriple-limit") else {
        return RuleResult::None;
    };
    let (Ok(count_value), Ok(limit_value)) =
        (count.value.trim().parse::<f64>(), limit.trim().parse::<f64>())
    else {
        return RuleResult::None;
    };
    if count_value < limit_value {
        return RuleResult::None;
    }
    RuleResult::One(Diagnostic::error(
        count.range,
        "forecast-ssa-group-auto-count must be less than forecast-ssa-decompose-eigentriple-limit",
    ))
}
