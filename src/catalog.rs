//! Setting catalog and section tables.
//!
//! The catalog is the read-only registry of every declarable setting: its
//! type, bounds, enum values, applicability filters, and scope overrides.
//! It is built once at startup (from JSON descriptor files or the built-in
//! defaults) and passed by reference to every validation component; no
//! process-wide singleton exists, so isolated instances can run in
//! parallel.
//!
//! The section tables at the bottom define the fixed nesting depth of each
//! `[section]`, which sections may inherit a deeper position, which
//! descendant sections a section requires, and which settings a section
//! must declare.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SETTING DESCRIPTORS
// ============================================================================

/// The value type of a setting, driving `check_type` dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Integer,
    Boolean,
    Enum,
    Interval,
    Date,
    Object,
}

/// A scope-conditional partial override of a descriptor.
///
/// When the surrounding widget type or section matches, the non-`None`
/// fields replace the descriptor's own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeOverride {
    pub widget: Option<String>,
    pub section: Option<String>,
    #[serde(rename = "type")]
    pub setting_type: Option<SettingType>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<String>>,
    pub default_value: Option<String>,
}

/// Catalog template for one declarable setting.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDescriptor {
    pub display_name: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    /// When set, the bounds are exclusive instead of inclusive.
    #[serde(default)]
    pub exclude_bounds: bool,
    /// Multi-line settings accumulate repeated declarations instead of
    /// reporting a repetition error.
    #[serde(default)]
    pub multi_line: bool,
    /// Canonical names of settings this one cannot coexist with.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Sections the setting is restricted to; empty means any.
    #[serde(default)]
    pub section: Vec<String>,
    /// Widget types the setting is restricted to; empty means any.
    #[serde(default)]
    pub widget: Vec<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    /// Deprecation note; presence marks the setting deprecated.
    #[serde(default)]
    pub deprecated: Option<String>,
    #[serde(default)]
    pub overrides: Vec<ScopeOverride>,
}

impl SettingDescriptor {
    pub fn new(display_name: &str, setting_type: SettingType) -> Self {
        Self {
            display_name: display_name.to_string(),
            setting_type,
            description: String::new(),
            enum_values: Vec::new(),
            min_value: None,
            max_value: None,
            exclude_bounds: false,
            multi_line: false,
            excludes: Vec::new(),
            section: Vec::new(),
            widget: Vec::new(),
            default_value: None,
            deprecated: None,
            overrides: Vec::new(),
        }
    }

    /// Canonical name: lower-cased display name with everything but ASCII
    /// letters removed. `Entity-Group`, `entitygroup` and `entity group`
    /// all name the same setting.
    pub fn name(&self) -> String {
        clear_setting_name(&self.display_name)
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_exclusive_bounds(mut self, min: f64, max: f64) -> Self {
        self.exclude_bounds = true;
        self.with_bounds(min, max)
    }

    pub fn multi_line(mut self) -> Self {
        self.multi_line = true;
        self
    }

    pub fn with_excludes(mut self, names: &[&str]) -> Self {
        self.excludes = names.iter().map(|n| clear_setting_name(n)).collect();
        self
    }

    pub fn with_section(mut self, sections: &[&str]) -> Self {
        self.section = sections.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_widget(mut self, widgets: &[&str]) -> Self {
        self.widget = widgets.iter().map(|w| w.to_string()).collect();
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn deprecated_with(mut self, note: &str) -> Self {
        self.deprecated = Some(note.to_string());
        self
    }

    /// Resolves scope overrides against the surrounding widget type and
    /// section, returning an adjusted copy when one matches.
    pub fn apply_scope(&self, widget: Option<&str>, section: Option<&str>) -> SettingDescriptor {
        let mut resolved = self.clone();
        for entry in &self.overrides {
            let widget_matches = match (&entry.widget, widget) {
                (Some(required), Some(actual)) => required == actual,
                (Some(_), None) => false,
                (None, _) => true,
            };
            let section_matches = match (&entry.section, section) {
                (Some(required), Some(actual)) => required == actual,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !widget_matches || !section_matches {
                continue;
            }
            if let Some(setting_type) = entry.setting_type {
                resolved.setting_type = setting_type;
            }
            if let Some(min) = entry.min_value {
                resolved.min_value = Some(min);
            }
            if let Some(max) = entry.max_value {
                resolved.max_value = Some(max);
            }
            if let Some(values) = &entry.enum_values {
                resolved.enum_values = values.clone();
            }
            if let Some(value) = &entry.default_value {
                resolved.default_value = Some(value.clone());
            }
        }
        resolved
    }
}

/// Derives the canonical setting name from its written form.
pub fn clear_setting_name(display_name: &str) -> String {
    display_name
        .chars()
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_ascii_lowercase())
        .collect()
}

// ============================================================================
// CATALOG
// ============================================================================

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate setting '{0}' in catalog")]
    Duplicate(String),
}

/// Read-only registry of setting descriptors keyed by canonical name.
#[derive(Debug, Clone)]
pub struct Catalog {
    settings: HashMap<String, Arc<SettingDescriptor>>,
}

impl Catalog {
    pub fn new(descriptors: Vec<SettingDescriptor>) -> Result<Self, CatalogError> {
        let mut settings = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let name = descriptor.name();
            if settings.insert(name.clone(), Arc::new(descriptor)).is_some() {
                return Err(CatalogError::Duplicate(name));
            }
        }
        Ok(Self { settings })
    }

    /// Loads descriptors from a JSON array, the format served by the
    /// resources provider.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let descriptors: Vec<SettingDescriptor> = serde_json::from_str(json)?;
        Self::new(descriptors)
    }

    /// Looks a setting up by any spelling of its name.
    pub fn lookup(&self, name: &str) -> Option<&Arc<SettingDescriptor>> {
        self.settings.get(&clear_setting_name(name))
    }

    /// The default value of a setting, when the catalog declares one.
    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.lookup(name)
            .and_then(|d| d.default_value.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<SettingDescriptor>)> {
        self.settings.iter()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// The built-in descriptor set, covering the settings exercised by the
    /// bundled validation rules.
    pub fn default_catalog() -> Self {
        Self::new(default_descriptors()).expect("built-in catalog has no duplicates")
    }
}

fn default_descriptors() -> Vec<SettingDescriptor> {
    use SettingType::*;
    vec![
        SettingDescriptor::new("type", Enum)
            .with_enum(&[
                "chart", "gauge", "calendar", "treemap", "box", "bar", "histogram", "graph",
                "pie", "text", "page", "console", "table", "property",
            ])
            .with_section(&["widget"]),
        SettingDescriptor::new("mode", Enum)
            .with_enum(&[
                "column", "column-stack", "stack", "row", "default", "half", "circle",
            ])
            .with_default("default"),
        SettingDescriptor::new("entity", SettingType::String),
        SettingDescriptor::new("entities", SettingType::String),
        SettingDescriptor::new("entity-group", SettingType::String),
        SettingDescriptor::new("entity-expression", SettingType::String),
        SettingDescriptor::new("metric", SettingType::String),
        SettingDescriptor::new("table", SettingType::String).with_excludes(&["value"]),
        SettingDescriptor::new("attribute", SettingType::String).with_excludes(&["value"]),
        SettingDescriptor::new("value", SettingType::String)
            .with_excludes(&["table", "attribute"]),
        SettingDescriptor::new("alias", SettingType::String).with_section(&["series"]),
        SettingDescriptor::new("label", SettingType::String),
        SettingDescriptor::new("colors", SettingType::String).multi_line(),
        SettingDescriptor::new("thresholds", SettingType::String).multi_line(),
        SettingDescriptor::new("start-time", Date),
        SettingDescriptor::new("end-time", Date),
        SettingDescriptor::new("timespan", Interval).with_enum(&["all", "auto"]),
        SettingDescriptor::new("time-zone", SettingType::String),
        SettingDescriptor::new("update-interval", Interval).with_default("1 minute"),
        SettingDescriptor::new("refresh-interval", Interval),
        SettingDescriptor::new("disconnect-interval", Interval),
        SettingDescriptor::new("period", Interval),
        SettingDescriptor::new("statistic", Enum).with_enum(&[
            "avg", "min", "max", "sum", "count", "first", "last", "median", "percentile(n)",
        ]),
        SettingDescriptor::new("arrow-length", Number)
            .with_bounds(0.0, 100.0)
            .with_widget(&["gauge"]),
        SettingDescriptor::new("severity", Integer).with_bounds(0.0, 7.0),
        SettingDescriptor::new("width-units", Integer).with_bounds(1.0, 64.0),
        SettingDescriptor::new("height-units", Integer).with_bounds(1.0, 64.0),
        SettingDescriptor::new("limit", Integer),
        SettingDescriptor::new("groups", SettingType::String),
        SettingDescriptor::new("group-keys", SettingType::String),
        SettingDescriptor::new("axis", Enum).with_enum(&["left", "right"]),
        SettingDescriptor::new("format", SettingType::String),
        SettingDescriptor::new("url", SettingType::String),
        SettingDescriptor::new("url-parameters", SettingType::String),
        SettingDescriptor::new("icon", SettingType::String),
        SettingDescriptor::new("display", Boolean).with_default("true"),
        SettingDescriptor::new("audio-alert", Boolean),
        SettingDescriptor::new("cache", Boolean),
        SettingDescriptor::new("add-meta", Boolean),
        SettingDescriptor::new("negative-style", SettingType::String),
        SettingDescriptor::new("palette-ticks", Boolean),
        SettingDescriptor::new("alert-expression", SettingType::String),
        SettingDescriptor::new("alert-style", SettingType::String),
        SettingDescriptor::new("node-alert-style", SettingType::String),
        SettingDescriptor::new("link-alert-style", SettingType::String),
        SettingDescriptor::new("forecast-name", SettingType::String),
        SettingDescriptor::new("forecast-horizon-start-time", Date),
        SettingDescriptor::new("forecast-horizon-end-time", Date),
        SettingDescriptor::new("forecast-ssa-group-auto-count", Integer)
            .with_bounds(0.0, 1000.0),
        SettingDescriptor::new("forecast-ssa-decompose-eigentriple-limit", Integer)
            .with_bounds(0.0, 1000.0)
            .with_default("1000"),
        SettingDescriptor::new("data-type", Enum)
            .with_enum(&["history", "forecast", "forecast_deviation"]),
        SettingDescriptor::new("on-change", SettingType::String).with_section(&["dropdown"]),
        SettingDescriptor::new("change-field", SettingType::String).with_section(&["dropdown"]),
        SettingDescriptor::new("options", SettingType::String).with_section(&["dropdown"]),
        SettingDescriptor::new("id", SettingType::String).with_section(&["node"]),
        SettingDescriptor::new("nodes", SettingType::String).with_section(&["link"]),
        SettingDescriptor::new("parent", SettingType::String),
        SettingDescriptor::new("step-line", Boolean),
        SettingDescriptor::new("summarize-period", Interval),
        SettingDescriptor::new("batch-update", Boolean)
            .deprecated_with("Updates are batched automatically."),
        SettingDescriptor::new("series-limit", Integer).with_default("1000"),
        SettingDescriptor::new("offset-right", Integer),
        SettingDescriptor::new("offset-left", Integer),
        SettingDescriptor::new("expand-panels", Enum).with_enum(&["all", "none", "compact"]),
        SettingDescriptor::new("properties", SettingType::Object),
        SettingDescriptor::new("script", SettingType::String).multi_line(),
    ]
}

// ============================================================================
// SECTION TABLES
// ============================================================================

/// Sections that may legally appear below their table depth, attaching to
/// the nearest valid ancestor instead.
pub const INHERITABLE_SECTIONS: &[&str] = &["keys", "tags"];

/// Settings whose effective value is tracked through section scopes.
pub const SCOPED_SETTINGS: &[&str] = &["type", "mode"];

/// Fixed nesting depth of every known section name.
pub fn section_depth(name: &str) -> Option<usize> {
    let depth = match name {
        "configuration" => 0,
        "group" => 1,
        "widget" => 2,
        "column" | "dropdown" | "keys" | "link" | "node" | "other" | "placeholders"
        | "property" | "series" | "threshold" => 3,
        "option" | "properties" | "tag" | "tags" => 4,
        _ => return None,
    };
    Some(depth)
}

/// Section names valid at a given depth, for wrong-depth messages.
pub fn sections_at_depth(depth: usize) -> Vec<&'static str> {
    const ALL: &[&str] = &[
        "configuration",
        "group",
        "widget",
        "column",
        "dropdown",
        "keys",
        "link",
        "node",
        "other",
        "placeholders",
        "property",
        "series",
        "threshold",
        "option",
        "properties",
        "tag",
        "tags",
    ];
    ALL.iter()
        .filter(|name| section_depth(name) == Some(depth))
        .copied()
        .collect()
}

pub fn is_inheritable(name: &str) -> bool {
    INHERITABLE_SECTIONS.contains(&name)
}

/// Descendant sections a section requires before it may close.
///
/// Each inner list is one alternative; all names in a list must appear, and
/// any single satisfied list resolves the requirement.
pub fn section_dependencies(name: &str) -> Vec<Vec<&'static str>> {
    match name {
        "configuration" => vec![vec!["group"]],
        "group" => vec![vec!["widget"]],
        "widget" => vec![vec!["series"]],
        _ => Vec::new(),
    }
}

/// Replacement descendant requirement installed on `[widget]` when
/// `type = graph` is declared.
pub fn graph_widget_dependencies() -> Vec<Vec<&'static str>> {
    vec![vec!["series"], vec!["node"], vec!["link"]]
}

/// Valid direct parents for depth-4 sections attaching to the immediately
/// preceding section.
pub fn depth4_parents(name: &str) -> &'static [&'static str] {
    match name {
        "option" => &["dropdown"],
        "properties" => &["series", "widget"],
        "tag" => &["tags", "widget", "series"],
        "tags" => &["widget", "series", "configuration"],
        _ => &[],
    }
}

/// Settings a section must declare before it ends. Each inner list is a
/// one-of alternative; every outer list must be satisfied.
pub fn required_settings(section: &str) -> &'static [&'static [&'static str]] {
    match section {
        "series" => &[
            &["entity", "entities", "entitygroup", "entityexpression"],
            &["metric", "table", "attribute", "value"],
        ],
        "widget" => &[&["type"]],
        "dropdown" => &[&["onchange", "changefield"]],
        "node" => &[&["id"]],
        "link" => &[&["nodes"]],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_collapse_spelling() {
        assert_eq!(clear_setting_name("Entity-Group"), "entitygroup");
        assert_eq!(clear_setting_name("entity group"), "entitygroup");
        assert_eq!(clear_setting_name("entitygroup"), "entitygroup");
    }

    #[test]
    fn lookup_accepts_any_spelling() {
        let catalog = Catalog::default_catalog();
        let hyphenated = catalog.lookup("start-time").unwrap();
        let collapsed = catalog.lookup("starttime").unwrap();
        assert_eq!(hyphenated.display_name, collapsed.display_name);
    }

    #[test]
    fn depth_table_matches_hierarchy() {
        assert_eq!(section_depth("configuration"), Some(0));
        assert_eq!(section_depth("group"), Some(1));
        assert_eq!(section_depth("widget"), Some(2));
        assert_eq!(section_depth("series"), Some(3));
        assert_eq!(section_depth("tags"), Some(4));
        assert_eq!(section_depth("bogus"), None);
    }

    #[test]
    fn inheritable_sections_are_keys_and_tags() {
        assert!(is_inheritable("keys"));
        assert!(is_inheritable("tags"));
        assert!(!is_inheritable("series"));
    }

    #[test]
    fn duplicate_descriptors_are_rejected() {
        let descriptors = vec![
            SettingDescriptor::new("entity", SettingType::String),
            SettingDescriptor::new("Entity", SettingType::String),
        ];
        assert!(matches!(
            Catalog::new(descriptors),
            Err(CatalogError::Duplicate(name)) if name == "entity"
        ));
    }

    #[test]
    fn json_catalog_round_trips() {
        let json = r#"[
            {"displayName": "my-setting", "type": "integer", "minValue": 0, "maxValue": 5},
            {"displayName": "my-mode", "type": "enum", "enum": ["a", "b"]}
        ]"#;
        let catalog = Catalog::from_json(json).unwrap();
        let descriptor = catalog.lookup("mysetting").unwrap();
        assert_eq!(descriptor.setting_type, SettingType::Integer);
        assert_eq!(descriptor.max_value, Some(5.0));
    }

    #[test]
    fn scope_override_applies_by_widget() {
        let mut descriptor = SettingDescriptor::new("limit", SettingType::Integer);
        descriptor.overrides.push(ScopeOverride {
            widget: Some("gauge".to_string()),
            max_value: Some(10.0),
            ..ScopeOverride::default()
        });
        let in_gauge = descriptor.apply_scope(Some("gauge"), None);
        assert_eq!(in_gauge.max_value, Some(10.0));
        let elsewhere = descriptor.apply_scope(Some("chart"), None);
        assert_eq!(elsewhere.max_value, None);
    }
}
