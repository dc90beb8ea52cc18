//! The assembled section tree, built as sections are confirmed during the
//! scan and queried afterwards by the rule engine.
//!
//! Sections live in an arena indexed by [`SectionId`]. Attachment is
//! decided purely by table depth plus two special cases: a `[series]`
//! directly following a `[column]` nests under that column, and depth-4
//! sections prefer the immediately preceding section when its name is a
//! valid container for them.

use std::collections::HashMap;

use crate::catalog::depth4_parents;
use crate::diagnostics::Range;
use crate::setting::Setting;

pub type SectionId = usize;

/// Settings whose effective value is resolved top-down and cached on every
/// node rather than found by walking ancestors.
const SCOPE_SETTINGS: &[&str] = &["type", "mode"];

#[derive(Debug)]
pub struct Section {
    pub name: String,
    pub range: Range,
    pub settings: Vec<Setting>,
    pub parent: Option<SectionId>,
    pub children: Vec<SectionId>,
    scope: HashMap<String, Setting>,
}

impl Section {
    /// The setting as declared directly in this section.
    pub fn get_setting(&self, name: &str) -> Option<&Setting> {
        self.settings.iter().find(|setting| setting.name == name)
    }
}

#[derive(Debug, Default)]
pub struct ConfigTree {
    sections: Vec<Section>,
    root: Option<SectionId>,
    last_at_depth: [Option<SectionId>; 5],
    /// The most recently added section regardless of depth.
    previous: Option<SectionId>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SectionId) -> &Section {
        &self.sections[id]
    }

    pub fn root(&self) -> Option<SectionId> {
        self.root
    }

    /// Adds a confirmed section at its table depth. A section with no
    /// valid parent available is dropped silently; nesting errors were
    /// already reported during the scan.
    pub fn add_section(
        &mut self,
        name: &str,
        range: Range,
        settings: Vec<Setting>,
        depth: usize,
    ) {
        let parent = match depth {
            0 => None,
            1 => self.root,
            2 => self.last_at_depth[1],
            3 => self.series_under_column(name).or(self.last_at_depth[2]),
            _ => self.preceding_container(name).or(self.last_at_depth[3]),
        };
        if depth > 0 && parent.is_none() {
            return;
        }

        let scope = self.build_scope(parent, &settings);
        let id = self.sections.len();
        self.sections.push(Section {
            name: name.to_string(),
            range,
            settings,
            parent,
            children: Vec::new(),
            scope,
        });

        match parent {
            Some(parent_id) => self.sections[parent_id].children.push(id),
            None => self.root = Some(id),
        }
        if depth < self.last_at_depth.len() {
            self.last_at_depth[depth] = Some(id);
        }
        self.previous = Some(id);
    }

    fn series_under_column(&self, name: &str) -> Option<SectionId> {
        let previous = self.previous?;
        (name == "series" && self.sections[previous].name == "column").then_some(previous)
    }

    fn preceding_container(&self, name: &str) -> Option<SectionId> {
        let previous = self.previous?;
        depth4_parents(name)
            .contains(&self.sections[previous].name.as_str())
            .then_some(previous)
    }

    fn build_scope(
        &self,
        parent: Option<SectionId>,
        settings: &[Setting],
    ) -> HashMap<String, Setting> {
        let mut scope = parent
            .map(|id| self.sections[id].scope.clone())
            .unwrap_or_default();
        for setting in settings {
            if SCOPE_SETTINGS.contains(&setting.name.as_str()) {
                scope.insert(setting.name.clone(), setting.clone());
            }
        }
        scope
    }

    /// Effective value of a setting for this section: the inherited scope
    /// cache for scope settings, otherwise the nearest ancestor (starting
    /// with the section itself) that declares it directly.
    pub fn get_setting_from_tree(&self, id: SectionId, name: &str) -> Option<&Setting> {
        if let Some(cached) = self.sections[id].scope.get(name) {
            return Some(cached);
        }
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let section = &self.sections[current];
            if let Some(setting) = section.get_setting(name) {
                return Some(setting);
            }
            cursor = section.parent;
        }
        None
    }

    /// All sections with the given name in depth-first pre-order.
    pub fn sections_named(&self, name: &str) -> Vec<SectionId> {
        let mut found = Vec::new();
        let Some(root) = self.root else {
            return found;
        };
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if self.sections[id].name == name {
                found.push(id);
            }
            // reversed so children pop in declaration order
            pending.extend(self.sections[id].children.iter().rev());
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn tree_with(sections: &[(&str, usize, &[(&str, &str)])]) -> ConfigTree {
        let catalog = Catalog::default_catalog();
        let mut tree = ConfigTree::new();
        for (line, (name, depth, settings)) in sections.iter().enumerate() {
            let settings = settings
                .iter()
                .map(|(setting, value)| {
                    Setting::new(
                        catalog.lookup(setting).expect(setting).clone(),
                        setting,
                        value,
                        Range::of_length(line, 2, setting.len()),
                    )
                })
                .collect();
            tree.add_section(name, Range::of_length(line, 0, name.len() + 2), settings, *depth);
        }
        tree
    }

    #[test]
    fn series_attaches_under_preceding_column() {
        let tree = tree_with(&[
            ("configuration", 0, &[]),
            ("group", 1, &[]),
            ("widget", 2, &[("type", "table")]),
            ("column", 3, &[]),
            ("series", 3, &[]),
        ]);
        let series = tree.sections_named("series")[0];
        assert_eq!(tree.get(tree.get(series).parent.unwrap()).name, "column");
    }

    #[test]
    fn depth4_prefers_valid_preceding_container() {
        let tree = tree_with(&[
            ("configuration", 0, &[]),
            ("group", 1, &[]),
            ("widget", 2, &[]),
            ("series", 3, &[]),
            ("tags", 4, &[]),
            ("tag", 4, &[]),
        ]);
        let tag = tree.sections_named("tag")[0];
        assert_eq!(tree.get(tree.get(tag).parent.unwrap()).name, "tags");

        let tags = tree.sections_named("tags")[0];
        assert_eq!(tree.get(tree.get(tags).parent.unwrap()).name, "series");
    }

    #[test]
    fn orphan_section_is_dropped() {
        let tree = tree_with(&[("series", 3, &[])]);
        assert!(tree.sections_named("series").is_empty());
    }

    #[test]
    fn scope_settings_inherit_and_override() {
        let tree = tree_with(&[
            ("configuration", 0, &[]),
            ("group", 1, &[]),
            ("widget", 2, &[("type", "calendar")]),
            ("series", 3, &[]),
            ("widget", 2, &[("type", "bar")]),
            ("series", 3, &[("type", "chart")]),
        ]);
        let all_series = tree.sections_named("series");
        assert_eq!(all_series.len(), 2);
        assert_eq!(
            tree.get_setting_from_tree(all_series[0], "type").unwrap().value,
            "calendar"
        );
        assert_eq!(
            tree.get_setting_from_tree(all_series[1], "type").unwrap().value,
            "chart"
        );
    }

    #[test]
    fn plain_settings_walk_ancestors() {
        let tree = tree_with(&[
            ("configuration", 0, &[("entity", "atsd")]),
            ("group", 1, &[]),
            ("widget", 2, &[]),
            ("series", 3, &[("metric", "cpu_busy")]),
        ]);
        let series = tree.sections_named("series")[0];
        assert_eq!(tree.get_setting_from_tree(series, "entity").unwrap().value, "atsd");
        assert_eq!(tree.get_setting_from_tree(series, "metric").unwrap().value, "cpu_busy");
        let widget = tree.sections_named("widget")[0];
        assert!(tree.get_setting_from_tree(widget, "metric").is_none());
    }
}
