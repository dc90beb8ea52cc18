//! Section nesting validation while scanning.
//!
//! The stack holds one frame per open section. Each frame carries its
//! pending dependency alternatives (an OR of AND-sets of descendant
//! section names) and the settings declared directly inside it, so the
//! validator can resolve "closest enclosing value of X" lookups without
//! the final tree.

use crate::catalog::{is_inheritable, section_dependencies, section_depth, sections_at_depth};
use crate::diagnostics::{Diagnostic, Range};
use crate::setting::Setting;

// ============================================================================
// DEPENDENCY ALTERNATIVES
// ============================================================================

/// One AND-set of required descendant sections. The option is satisfied
/// when every name in it has been seen.
#[derive(Debug, Clone)]
pub struct DependencyOption {
    pub resolved_count: usize,
    pub unresolved: Vec<&'static str>,
}

impl DependencyOption {
    fn new(required: Vec<&'static str>) -> Self {
        Self {
            resolved_count: 0,
            unresolved: required,
        }
    }

    fn resolve(&mut self, name: &str) {
        if let Some(position) = self.unresolved.iter().position(|&dep| dep == name) {
            self.unresolved.remove(position);
            self.resolved_count += 1;
        }
    }
}

// ============================================================================
// STACK FRAMES
// ============================================================================

#[derive(Debug)]
pub struct SectionStackNode {
    pub name: String,
    pub range: Range,
    options: Vec<DependencyOption>,
    settings: Vec<Setting>,
}

impl SectionStackNode {
    fn new(name: &str, range: Range, dependencies: Vec<Vec<&'static str>>) -> Self {
        Self {
            name: name.to_string(),
            range,
            options: dependencies.into_iter().map(DependencyOption::new).collect(),
            settings: Vec::new(),
        }
    }

    /// A recovery frame for a skipped depth. Carries no requirements.
    fn placeholder(range: Range) -> Self {
        Self::new("", range, Vec::new())
    }

    pub fn dependencies_resolved(&self) -> bool {
        self.options.is_empty() || self.options.iter().any(|option| option.unresolved.is_empty())
    }

    fn resolve(&mut self, name: &str) {
        for option in &mut self.options {
            option.resolve(name);
        }
    }

    /// The alternative closest to satisfied: most resolved names, then
    /// fewest missing ones, declaration order breaking remaining ties.
    pub fn best_option(&self) -> Option<&DependencyOption> {
        let mut best: Option<&DependencyOption> = None;
        for option in &self.options {
            best = match best {
                None => Some(option),
                Some(current)
                    if option.resolved_count > current.resolved_count
                        || (option.resolved_count == current.resolved_count
                            && option.unresolved.len() < current.unresolved.len()) =>
                {
                    Some(option)
                }
                keep => keep,
            };
        }
        best
    }

    pub fn insert_setting(&mut self, setting: Setting) {
        self.settings.push(setting);
    }

    pub fn get_setting(&self, name: &str) -> Option<&Setting> {
        self.settings.iter().find(|setting| setting.name == name)
    }

    fn unresolved_diagnostic(&self) -> Option<Diagnostic> {
        if self.dependencies_resolved() {
            return None;
        }
        let missing = self
            .best_option()?
            .unresolved
            .iter()
            .map(|name| format!("[{name}]"))
            .collect::<Vec<_>>()
            .join(", ");
        Some(Diagnostic::error(
            self.range,
            format!("Required section(s) not declared: {missing}"),
        ))
    }
}

// ============================================================================
// THE STACK
// ============================================================================

#[derive(Debug, Default)]
pub struct SectionStack {
    stack: Vec<SectionStackNode>,
    seen_root: bool,
}

impl SectionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn top(&self) -> Option<&SectionStackNode> {
        self.stack.last()
    }

    /// Opens a section at its table-defined depth, closing deeper frames
    /// first and verifying their requirements. Unknown names and invalid
    /// depths are reported; scanning recovers either way.
    pub fn insert_section(&mut self, name: &str, range: Range) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        let Some(mut depth) = section_depth(name) else {
            diagnostics.push(Diagnostic::error(
                range,
                format!("Unknown section [{name}]"),
            ));
            return diagnostics;
        };

        let expected = self.stack.len();
        if depth > expected {
            if is_inheritable(name) && expected > 0 {
                depth = expected;
            } else {
                let valid = sections_at_depth(expected)
                    .iter()
                    .map(|section| format!("[{section}]"))
                    .collect::<Vec<_>>()
                    .join(", ");
                diagnostics.push(Diagnostic::error(
                    range,
                    format!("Unexpected section [{name}]. Expected one of: {valid}"),
                ));
            }
        }

        let duplicate_root = depth == 0 && self.seen_root;
        if duplicate_root {
            diagnostics.push(Diagnostic::error(
                range,
                format!("[{name}] is already declared"),
            ));
        }

        // Close frames the new section steps out of. Frames unwound by a
        // duplicate root skip their requirement checks.
        while self.stack.len() > depth {
            let closed = self.stack.pop().expect("stack deeper than target depth");
            if duplicate_root {
                continue;
            }
            if let Some(diagnostic) = closed.unresolved_diagnostic() {
                diagnostics.push(diagnostic);
            }
        }

        // The new section resolves pending requirements of every live
        // ancestor, including requirements it will only satisfy later.
        for frame in &mut self.stack {
            frame.resolve(name);
        }

        // Pad skipped depths so the frame lands at its table depth.
        while self.stack.len() < depth {
            self.stack.push(SectionStackNode::placeholder(range));
        }

        if depth == 0 {
            self.seen_root = true;
        }
        self.stack
            .push(SectionStackNode::new(name, range, section_dependencies(name)));
        diagnostics
    }

    /// Installs additional dependency alternatives on the nearest live
    /// frame with the given name, replacing its current requirements.
    pub fn set_requirements(&mut self, section: &str, options: Vec<Vec<&'static str>>) {
        if let Some(frame) = self
            .stack
            .iter_mut()
            .rev()
            .find(|frame| frame.name == section)
        {
            frame.options = options.into_iter().map(DependencyOption::new).collect();
        }
    }

    pub fn insert_current_setting(&mut self, setting: Setting) {
        if let Some(top) = self.stack.last_mut() {
            top.insert_setting(setting);
        }
    }

    /// Closest enclosing declared value of a setting, innermost frame first.
    pub fn get_current_setting(&self, name: &str) -> Option<&Setting> {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.get_setting(name))
    }

    /// Settings declared in the nearest frame with the given name. With
    /// `recursive` the frames enclosing it contribute theirs as well.
    pub fn get_section_settings(&self, section: &str, recursive: bool) -> Vec<&Setting> {
        let Some(position) = self.stack.iter().rposition(|frame| frame.name == section) else {
            return Vec::new();
        };
        let frames: &[SectionStackNode] = if recursive {
            &self.stack[..=position]
        } else {
            &self.stack[position..=position]
        };
        frames.iter().flat_map(|frame| frame.settings.iter()).collect()
    }

    /// Closes everything still open at end of document.
    pub fn finalize(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        while let Some(closed) = self.stack.pop() {
            if let Some(diagnostic) = closed.unresolved_diagnostic() {
                diagnostics.push(diagnostic);
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(line: usize) -> Range {
        Range::of_length(line, 0, 8)
    }

    fn drain(stack: &mut SectionStack, sections: &[&str]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for (line, section) in sections.iter().enumerate() {
            diagnostics.extend(stack.insert_section(section, at(line)));
        }
        diagnostics.extend(stack.finalize());
        diagnostics
    }

    #[test]
    fn complete_document_is_clean() {
        let mut stack = SectionStack::new();
        let diagnostics = drain(
            &mut stack,
            &["configuration", "group", "widget", "series"],
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn unknown_section_is_reported() {
        let mut stack = SectionStack::new();
        let diagnostics = stack.insert_section("widgets", at(0));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Unknown section [widgets]");
    }

    #[test]
    fn skipped_depth_is_reported_and_recovered() {
        let mut stack = SectionStack::new();
        assert!(stack.insert_section("configuration", at(0)).is_empty());
        let diagnostics = stack.insert_section("widget", at(1));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.starts_with("Unexpected section [widget]"));
        assert!(diagnostics[0].message.contains("[group]"));
        // recovery keeps the frame at its table depth
        assert_eq!(stack.depth(), 3);
        assert!(stack.insert_section("series", at(2)).is_empty());
    }

    #[test]
    fn inheritable_section_attaches_at_current_depth() {
        let mut stack = SectionStack::new();
        stack.insert_section("configuration", at(0));
        let diagnostics = stack.insert_section("keys", at(1));
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn unresolved_dependency_reported_on_close() {
        let mut stack = SectionStack::new();
        stack.insert_section("configuration", at(0));
        stack.insert_section("group", at(1));
        stack.insert_section("widget", at(2));
        // a second widget closes the first, which never saw a series
        let diagnostics = stack.insert_section("widget", at(3));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].message,
            "Required section(s) not declared: [series]"
        );
        assert_eq!(diagnostics[0].range, at(2));
    }

    #[test]
    fn alternative_dependency_satisfies_requirement() {
        let mut stack = SectionStack::new();
        stack.insert_section("configuration", at(0));
        stack.insert_section("group", at(1));
        stack.insert_section("widget", at(2));
        stack.set_requirements("widget", vec![vec!["series"], vec!["node"], vec!["link"]]);
        stack.insert_section("node", at(3));
        let diagnostics = stack.finalize();
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn duplicate_root_is_reported() {
        let mut stack = SectionStack::new();
        stack.insert_section("configuration", at(0));
        stack.insert_section("group", at(1));
        stack.insert_section("widget", at(2));
        stack.insert_section("series", at(3));
        let diagnostics = stack.insert_section("configuration", at(4));
        assert!(diagnostics
            .iter()
            .any(|d| d.message == "[configuration] is already declared"));
    }

    #[test]
    fn duplicate_root_unwind_skips_dependency_checks() {
        let mut stack = SectionStack::new();
        stack.insert_section("configuration", at(0));
        stack.insert_section("group", at(1));
        stack.insert_section("widget", at(2));
        // the open widget never saw a [series], but the duplicate root is
        // the only diagnostic
        let diagnostics = stack.insert_section("configuration", at(3));
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].message, "[configuration] is already declared");
    }

    #[test]
    fn closest_enclosing_setting_lookup() {
        use crate::catalog::Catalog;

        let catalog = Catalog::default_catalog();
        let mut stack = SectionStack::new();
        stack.insert_section("configuration", at(0));
        stack.insert_current_setting(Setting::new(
            catalog.lookup("entity").unwrap().clone(),
            "entity",
            "atsd",
            at(1),
        ));
        stack.insert_section("group", at(2));
        stack.insert_section("widget", at(3));
        assert_eq!(stack.get_current_setting("entity").unwrap().value, "atsd");
        assert!(stack.get_current_setting("metric").is_none());

        let own = stack.get_section_settings("widget", false);
        assert!(own.is_empty());
        let inherited = stack.get_section_settings("widget", true);
        assert_eq!(inherited.len(), 1);
    }
}
