use charts_lint::catalog::Catalog;
use charts_lint::diagnostics::{Diagnostic, DiagnosticSeverity};
use charts_lint::validator::validate;

// ---
// Test Setup
// ---

fn check(text: &str) -> Vec<Diagnostic> {
    let catalog = Catalog::default_catalog();
    validate(text, &catalog)
}

fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics.iter().map(|d| d.message.as_str()).collect()
}

const CLEAN_DASHBOARD: &str = "\
[configuration]
  entity = nurswgvml007
  time-zone = utc

[group]

[widget]
  type = calendar
  start-time = 2019-06-01
  end-time = 2019-06-02
  thresholds = 0, 60, 100
  colors = green, red

[series]
  metric = cpu_busy
";

// ---
// Whole-document scenarios
// ---

#[test]
fn clean_document_has_no_diagnostics() {
    let diagnostics = check(CLEAN_DASHBOARD);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
}

#[test]
fn calendar_widget_with_colors_needs_thresholds() {
    let text = CLEAN_DASHBOARD.replace("  thresholds = 0, 60, 100\n", "");
    let diagnostics = check(&text);
    assert_eq!(
        messages(&diagnostics),
        vec!["thresholds is required if colors is specified"]
    );
}

#[test]
fn widget_must_declare_its_type() {
    let text = "[configuration]\n[group]\n[widget]\n[series]\n entity = a\n metric = b";
    let diagnostics = check(text);
    assert_eq!(messages(&diagnostics), vec!["type is required"]);
    // anchored at the [widget] header
    assert_eq!(diagnostics[0].range.start.line, 2);
}

#[test]
fn series_directly_under_configuration_is_a_depth_error() {
    let text = "[configuration]\n[series]\n entity = a\n metric = b";
    let diagnostics = check(text);
    let depth_error = diagnostics
        .iter()
        .find(|d| d.message.starts_with("Unexpected section [series]"))
        .expect("depth diagnostic");
    assert!(depth_error.message.contains("[group]"));
}

#[test]
fn dropdown_requires_a_change_handler() {
    let text = "[configuration]\n[group]\n[widget]\n type = console\n[series]\n entity = a\n metric = b\n[dropdown]\n options = a, b";
    let diagnostics = check(text);
    assert_eq!(
        messages(&diagnostics),
        vec!["one of onchange, changefield is required"]
    );

    let text = text.replace(" options = a, b", " on-change = update()");
    let diagnostics = check(&text);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
}

#[test]
fn unclosed_csv_is_reported_at_its_keyword() {
    let diagnostics = check("csv data = a, b\n 1, 2");
    assert_eq!(messages(&diagnostics), vec!["csv has no matching endcsv"]);
    assert_eq!(diagnostics[0].range.start.line, 0);
}

#[test]
fn orphan_branch_keywords() {
    let diagnostics = check("else\nendif");
    let messages = messages(&diagnostics);
    assert!(messages.contains(&"else has no matching if"));
    assert!(messages.contains(&"endif has no matching if"));
}

#[test]
fn deprecated_setting_warns_but_still_validates() {
    let text = "[configuration]\n[group]\n[widget]\n type = chart\n batch-update = sometimes\n[series]\n entity = a\n metric = b";
    let diagnostics = check(text);
    assert_eq!(diagnostics.len(), 2, "{diagnostics:?}");
    assert!(diagnostics
        .iter()
        .any(|d| d.message.contains("deprecated") && d.severity == DiagnosticSeverity::Warning));
    assert!(diagnostics
        .iter()
        .any(|d| d.message.contains("boolean value")));
}

#[test]
fn numeric_bounds_are_enforced() {
    let text = "[configuration]\n[group]\n[widget]\n type = chart\n width-units = 100\n[series]\n entity = a\n metric = b";
    let diagnostics = check(text);
    assert_eq!(
        messages(&diagnostics),
        vec!["width-units should be in range [1, 64]"]
    );
}

#[test]
fn legacy_seconds_interval_is_a_deprecation_warning() {
    let text = "[configuration]\n[group]\n[widget]\n type = chart\n update-interval = 30\n[series]\n entity = a\n metric = b";
    let diagnostics = check(text);
    assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
    assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
    assert!(diagnostics[0].message.contains("deprecated"));
}

#[test]
fn placeholder_values_bypass_type_checks() {
    let text = "[configuration]\n[group]\n[widget]\n type = chart\n width-units = ${units}\n[series]\n entity = a\n metric = b";
    let diagnostics = check(text);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
}

// ---
// Output contract
// ---

#[test]
fn diagnostics_serialize_in_editor_protocol_shape() {
    let diagnostics = check("[configuration]\n[series]\n entity = a\n metric = b");
    assert!(!diagnostics.is_empty());
    let json = serde_json::to_value(&diagnostics).unwrap();
    let first = &json[0];
    assert_eq!(first["source"], "Axibase Charts");
    assert_eq!(first["severity"], 1);
    assert!(first["range"]["start"]["line"].is_u64());
    assert!(first["range"]["end"]["character"].is_u64());
}

#[test]
fn diagnostics_are_sorted_and_deduplicated() {
    let text = "endfor\n[configuration]\n[series]\n entity = a\n metric = b\nendwidget";
    let diagnostics = check(text);
    assert!(diagnostics.len() >= 3, "{diagnostics:?}");
    for pair in diagnostics.windows(2) {
        assert!(pair[0].range.start <= pair[1].range.start, "{diagnostics:?}");
        assert_ne!(pair[0].range, pair[1].range, "{diagnostics:?}");
    }
}
