//! The validator: drives the line cursor, dispatches every line to the
//! keyword tracker, the section stack and the setting model, then runs the
//! rule engine over the assembled tree.
//!
//! One instance validates one document. All state lives on the instance,
//! so concurrent validations only share the read-only catalog.

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::{
    clear_setting_name, graph_widget_dependencies, section_depth, Catalog,
};
use crate::config::Config;
use crate::config_tree::ConfigTree;
use crate::diagnostics::{dedupe_by_range, sort_by_position, Diagnostic, Range};
use crate::expr::check_expression;
use crate::keyword_handler::KeywordHandler;
use crate::rules::apply_rules;
use crate::section_stack::SectionStack;
use crate::setting::Setting;
use crate::text_range::TextRange;

lazy_static! {
    static ref SECTION_HEADER: Regex = Regex::new(r"^([ \t]*)\[([a-z]+)\][ \t]*$").unwrap();
    static ref SETTING_LINE: Regex =
        Regex::new(r"^([ \t]*)([a-z0-9_\- \t]+?)[ \t]*=[ \t]*(.*?)[ \t]*$").unwrap();
    /// `end*` tokens the keyword recognizer does not know.
    static ref UNKNOWN_END: Regex = Regex::new(r"^[ \t]*(end[a-z]*)[ \t]*$").unwrap();
    static ref FREEMARKER: Regex = Regex::new(r"</?#[^>]*>").unwrap();
    static ref FREEMARKER_ALIAS: Regex = Regex::new(r"\bas\s+(\w+)>").unwrap();
    static ref VAR_NAME: Regex = Regex::new(r"^[ \t]*var\s+(\w+)\s*=").unwrap();
    static ref LIST_NAME: Regex = Regex::new(r"^[ \t]*list\s+(\w+)\s*=").unwrap();
    static ref CSV_NAME: Regex =
        Regex::new(r"^[ \t]*csv\s+(\w+)\s*(=|from)[ \t]*(.*?)[ \t]*$").unwrap();
    static ref FOR_HEAD: Regex = Regex::new(r"^[ \t]*for\s+(\w+)\s+in\s+").unwrap();
    static ref COLLECTION: Regex =
        Regex::new(r"^(?:object\s*\.\s*(?:keys|values)\s*\(\s*(\w+)\s*\)|(\w+))").unwrap();
    static ref AT_REFERENCE: Regex = Regex::new(r"@\{(\w+)\}").unwrap();
    static ref VALUE_CALL: Regex = Regex::new(r#"value\s*\(\s*['"](\w+)['"]\s*\)"#).unwrap();
    static ref URL_PLACEHOLDER: Regex = Regex::new(r"\{(\w+)\}").unwrap();
}

/// Sections whose keys are free-form tags rather than catalog settings.
const TAG_SECTIONS: &[&str] = &["tag", "tags", "keys"];

/// Validates a whole document against the catalog.
pub fn validate(text: &str, catalog: &Catalog) -> Vec<Diagnostic> {
    Validator::new(text, catalog).line_by_line()
}

/// Which multi-line block body the cursor is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockBody {
    Script,
    Sql,
    Var,
    /// Column count fixed by the first non-blank row.
    Csv { columns: Option<usize> },
}

impl BlockBody {
    fn closer(self) -> &'static str {
        match self {
            BlockBody::Script => "endscript",
            BlockBody::Sql => "endsql",
            BlockBody::Var => "endvar",
            BlockBody::Csv { .. } => "endcsv",
        }
    }
}

#[derive(Debug)]
struct PendingSection {
    name: String,
    range: Range,
    depth: usize,
}

pub struct Validator<'a> {
    config: Config,
    catalog: &'a Catalog,
    keyword_handler: KeywordHandler,
    section_stack: SectionStack,
    config_tree: ConfigTree,
    diagnostics: Vec<Diagnostic>,
    block: Option<BlockBody>,
    current_section: Option<PendingSection>,
    current_settings: Vec<Setting>,
    /// Setting names declared outside any `if` branch in this section.
    unconditional: HashSet<String>,
    /// Names declared in every branch of a closed `if` that had an `else`.
    promoted: HashSet<String>,
    /// One name set per open `if`/`elseif`/`else` branch.
    branches: Vec<HashSet<String>>,
    has_else: bool,
    aliases: Vec<String>,
    dealiases: Vec<(String, Range)>,
    /// Names introduced by `list`/`var`/`csv`/`for` over the whole document.
    declared_names: HashSet<String>,
    /// Innermost-first loop variables of open `for` blocks.
    for_variables: Vec<String>,
    current_widget_type: Option<String>,
    url_placeholders: Vec<(String, Range)>,
    placeholder_keys: Vec<(String, Range)>,
}

impl<'a> Validator<'a> {
    pub fn new(text: &str, catalog: &'a Catalog) -> Self {
        Self {
            config: Config::new(text),
            catalog,
            keyword_handler: KeywordHandler::new(),
            section_stack: SectionStack::new(),
            config_tree: ConfigTree::new(),
            diagnostics: Vec::new(),
            block: None,
            current_section: None,
            current_settings: Vec::new(),
            unconditional: HashSet::new(),
            promoted: HashSet::new(),
            branches: Vec::new(),
            has_else: false,
            aliases: Vec::new(),
            dealiases: Vec::new(),
            declared_names: HashSet::new(),
            for_variables: Vec::new(),
            current_widget_type: None,
            url_placeholders: Vec::new(),
            placeholder_keys: Vec::new(),
        }
    }

    /// Scans the whole document and returns its diagnostics, sorted by
    /// position with identical ranges collapsed to the first report.
    pub fn line_by_line(mut self) -> Vec<Diagnostic> {
        while let Some(line) = self.config.next_line() {
            let number = self.config.current_line_number();
            self.handle_line(&line, number);
        }
        self.finalize();
        let mut diagnostics = dedupe_by_range(self.diagnostics);
        sort_by_position(&mut diagnostics);
        diagnostics
    }

    fn handle_line(&mut self, line: &str, number: usize) {
        if self.handle_block_body(line, number) {
            return;
        }
        self.check_freemarker(line, number);
        if line.trim().is_empty() {
            return;
        }
        if let Some(caps) = SECTION_HEADER.captures(line) {
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            let name = caps.get(2).map_or("", |m| m.as_str()).to_string();
            self.handle_section(&name, Range::of_length(number, indent, name.len() + 2));
            return;
        }
        if let Some(keyword) = TextRange::parse(line, number) {
            self.handle_keyword(keyword, line, number);
            return;
        }
        if let Some(caps) = UNKNOWN_END.captures(line) {
            let token = caps.get(1).expect("group 1 always participates");
            self.diagnostics.push(Diagnostic::error(
                Range::of_length(number, token.start(), token.as_str().len()),
                format!("{} is unknown", token.as_str()),
            ));
            return;
        }
        if !self.for_variables.is_empty() {
            self.check_at_references(line, number);
        }
        if let Some(caps) = SETTING_LINE.captures(line) {
            self.handle_setting(&caps, number);
        }
    }

    // ========================================================================
    // BLOCK BODIES
    // ========================================================================

    /// Consumes lines inside an open `script`/`sql`/`var`/`csv` block.
    /// Returns true when the line belonged to a block body or closed one.
    fn handle_block_body(&mut self, line: &str, number: usize) -> bool {
        let Some(block) = self.block else {
            return false;
        };
        if let Some(keyword) = TextRange::parse(line, number) {
            if keyword.text == block.closer() {
                self.block = None;
                if let Some(diagnostic) = self.keyword_handler.handle_closing(&keyword) {
                    self.diagnostics.push(diagnostic);
                }
                return true;
            }
        }
        if let BlockBody::Csv { columns } = block {
            self.check_csv_row(line, number, columns);
        }
        true
    }

    fn check_csv_row(&mut self, line: &str, number: usize, columns: Option<usize>) {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            return;
        }
        let found = trimmed.split(',').count();
        match columns {
            None => self.block = Some(BlockBody::Csv { columns: Some(found) }),
            Some(expected) if expected != found => {
                let indent = line.len() - line.trim_start().len();
                self.diagnostics.push(Diagnostic::error(
                    Range::on_line(number, indent, trimmed.len()),
                    format!("Expected {expected} columns, but found {found}"),
                ));
            }
            Some(_) => {}
        }
    }

    // ========================================================================
    // KEYWORDS
    // ========================================================================

    fn handle_keyword(&mut self, keyword: TextRange, line: &str, number: usize) {
        match keyword.text.as_str() {
            "endfor" => {
                self.for_variables.pop();
                self.close(&keyword);
            }
            "endif" => {
                self.close_if_branches();
                self.close(&keyword);
            }
            "endcsv" | "endscript" | "endsql" | "endvar" | "endlist" => self.close(&keyword),
            "else" => {
                self.next_branch(true);
                self.close(&keyword);
            }
            "elseif" => {
                self.next_branch(false);
                self.check_condition(&keyword, line, number);
                self.close(&keyword);
            }
            "if" => {
                self.check_condition(&keyword, line, number);
                self.branches.push(HashSet::new());
                self.push_opener(keyword, line);
            }
            "for" => self.handle_for(keyword, line, number),
            "var" => {
                if let Some(caps) = VAR_NAME.captures(line) {
                    self.declared_names.insert(caps[1].to_string());
                }
                if KeywordHandler::should_be_closed(&keyword, line, &self.config) {
                    self.block = Some(BlockBody::Var);
                    self.keyword_handler.push(keyword);
                }
            }
            "list" => {
                if let Some(caps) = LIST_NAME.captures(line) {
                    self.declared_names.insert(caps[1].to_string());
                }
                self.push_opener(keyword, line);
            }
            "csv" => self.handle_csv(keyword, line),
            "script" => self.handle_embedded(keyword, BlockBody::Script, line, number),
            "sql" => self.handle_embedded(keyword, BlockBody::Sql, line, number),
            _ => {}
        }
    }

    fn close(&mut self, keyword: &TextRange) {
        if let Some(diagnostic) = self.keyword_handler.handle_closing(keyword) {
            self.diagnostics.push(diagnostic);
        }
    }

    fn push_opener(&mut self, keyword: TextRange, line: &str) {
        if KeywordHandler::should_be_closed(&keyword, line, &self.config) {
            self.keyword_handler.push(keyword);
        }
    }

    /// Syntax-checks the condition of an `if`/`elseif` line.
    fn check_condition(&mut self, keyword: &TextRange, line: &str, number: usize) {
        let after = keyword.range.end.character;
        let condition = &line[after.min(line.len())..];
        let offset = after + (condition.len() - condition.trim_start().len());
        if let Err(error) = check_expression(condition.trim()) {
            let column = offset + error.offset;
            let end = line.trim_end().len().max(column + 1);
            self.diagnostics.push(Diagnostic::error(
                Range::on_line(number, column, end),
                error.message,
            ));
        }
    }

    fn handle_for(&mut self, keyword: TextRange, line: &str, number: usize) {
        let Some(head) = FOR_HEAD.captures(line) else {
            self.diagnostics
                .push(Diagnostic::error(keyword.range, "Invalid for declaration"));
            return;
        };
        let iterator = head.get(1).expect("group 1 always participates");
        self.declared_names.insert(iterator.as_str().to_string());
        self.for_variables.push(iterator.as_str().to_string());

        let base = head.get(0).expect("whole match").end();
        let collection = line[base..].trim_end();
        self.check_collection(collection, base, number);
        self.keyword_handler.push(keyword);
    }

    /// The collection of a `for` must be a declared name (possibly indexed,
    /// dotted or wrapped in `object.keys`/`object.values`) or a literal
    /// array expression.
    fn check_collection(&mut self, collection: &str, base: usize, number: usize) {
        if collection.starts_with('[') {
            if let Err(error) = check_expression(collection) {
                let column = base + error.offset;
                self.diagnostics.push(Diagnostic::error(
                    Range::of_length(number, column, 1),
                    error.message,
                ));
            }
            return;
        }
        let Some(caps) = COLLECTION.captures(collection) else {
            self.diagnostics.push(Diagnostic::error(
                Range::of_length(number, base, collection.len().max(1)),
                format!("{collection} is unknown"),
            ));
            return;
        };
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .expect("one alternative matched");
        if !self.declared_names.contains(name.as_str()) {
            self.diagnostics.push(Diagnostic::error(
                Range::of_length(number, base + name.start(), name.as_str().len()),
                format!("{} is unknown", name.as_str()),
            ));
        }
    }

    fn handle_csv(&mut self, keyword: TextRange, line: &str) {
        let Some(caps) = CSV_NAME.captures(line) else {
            self.diagnostics
                .push(Diagnostic::error(keyword.range, "Invalid csv declaration"));
            return;
        };
        self.declared_names.insert(caps[1].to_string());
        if &caps[2] == "from" {
            // inline form, no body follows
            return;
        }
        let header = caps.get(3).map_or("", |m| m.as_str());
        let columns = match header.trim().is_empty() {
            true => None,
            false => Some(header.split(',').count()),
        };
        self.block = Some(BlockBody::Csv { columns });
        self.keyword_handler.push(keyword);
    }

    /// A `script`/`sql` opener: the single-line `name = value` form needs
    /// no closing; the block form must carry nothing after the keyword.
    fn handle_embedded(&mut self, keyword: TextRange, body: BlockBody, line: &str, number: usize) {
        if keyword.can_be_unclosed {
            return;
        }
        let after = keyword.range.end.character;
        let rest = line[after.min(line.len())..].trim_end();
        if !rest.trim().is_empty() {
            self.diagnostics.push(Diagnostic::error(
                Range::on_line(number, after + 1, line.trim_end().len()),
                format!(
                    "A linefeed character after {} keyword is required",
                    keyword.text
                ),
            ));
        }
        self.block = Some(body);
        self.keyword_handler.push(keyword);
    }

    // ========================================================================
    // IF BRANCH BOOKKEEPING
    // ========================================================================

    fn next_branch(&mut self, is_else: bool) {
        if !self.branches.is_empty() {
            self.branches.push(HashSet::new());
            self.has_else |= is_else;
        }
    }

    /// A setting satisfies a requirement through an `if` chain only when
    /// every branch declares it and an `else` branch exists.
    fn close_if_branches(&mut self) {
        if self.branches.is_empty() {
            return;
        }
        if self.has_else {
            let mut names: HashSet<String> = self.branches[0].clone();
            for branch in &self.branches[1..] {
                names.retain(|name| branch.contains(name));
            }
            self.promoted.extend(names);
        }
        self.branches.clear();
        self.has_else = false;
    }

    // ========================================================================
    // SECTIONS
    // ========================================================================

    fn handle_section(&mut self, name: &str, range: Range) {
        self.flush_section();
        if name == "widget" {
            self.reconcile_aliases();
            self.current_widget_type = None;
        }
        let nested = self.section_stack.insert_section(name, range);
        self.diagnostics.extend(nested);
        self.current_section = match section_depth(name) {
            Some(_) => Some(PendingSection {
                name: name.to_string(),
                range,
                depth: self.section_stack.depth().saturating_sub(1),
            }),
            None => None,
        };
    }

    /// End-of-section bookkeeping: required settings, then handing the
    /// completed section to the tree.
    fn flush_section(&mut self) {
        self.close_if_branches();
        let Some(section) = self.current_section.take() else {
            self.reset_section_state();
            return;
        };
        for group in crate::catalog::required_settings(&section.name) {
            let satisfied = group.iter().any(|name| self.is_declared(name));
            if !satisfied {
                let message = match *group {
                    [single] => format!("{single} is required"),
                    _ => format!("one of {} is required", group.join(", ")),
                };
                self.diagnostics
                    .push(Diagnostic::error(section.range, message));
            }
        }
        let settings = std::mem::take(&mut self.current_settings);
        self.config_tree
            .add_section(&section.name, section.range, settings, section.depth);
        self.reset_section_state();
    }

    fn reset_section_state(&mut self) {
        self.current_settings.clear();
        self.unconditional.clear();
        self.promoted.clear();
        self.branches.clear();
        self.has_else = false;
    }

    fn is_declared(&self, name: &str) -> bool {
        self.unconditional.contains(name)
            || self.promoted.contains(name)
            || self.section_stack.get_current_setting(name).is_some()
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    fn handle_setting(&mut self, caps: &regex::Captures, number: usize) {
        let indent = caps.get(1).map_or(0, |m| m.as_str().len());
        let name_match = caps.get(2).expect("group 2 always participates");
        let display = name_match.as_str();
        let value_match = caps.get(3).expect("group 3 always participates");
        let value = value_match.as_str();
        let name_range = Range::of_length(number, indent, display.len());
        let range = match value.is_empty() {
            true => name_range,
            false => Range::of_length(number, value_match.start(), value.len()),
        };

        if display.contains(' ') || display.contains('\t') {
            self.diagnostics.push(Diagnostic::warning(
                name_range,
                format!("{display} contains whitespace characters"),
            ));
        }

        let section_name = self.current_section.as_ref().map(|s| s.name.clone());
        match section_name.as_deref() {
            Some("placeholders") => {
                self.placeholder_keys.push((display.to_string(), name_range));
                return;
            }
            Some(section) if TAG_SECTIONS.contains(&section) => {
                if self.catalog.lookup(display).is_some() {
                    self.diagnostics.push(Diagnostic::information(
                        name_range,
                        format!("{display} is interpreted as a tag and sent to the server"),
                    ));
                }
                return;
            }
            _ => {}
        }

        let canonical = clear_setting_name(display);
        if canonical.is_empty() {
            return;
        }
        let Some(base) = self.catalog.lookup(display) else {
            self.diagnostics
                .push(Diagnostic::error(name_range, format!("{display} is unknown")));
            return;
        };
        let descriptor = Arc::new(
            base.apply_scope(self.current_widget_type.as_deref(), section_name.as_deref()),
        );

        if let Some(note) = &descriptor.deprecated {
            self.diagnostics.push(Diagnostic::warning(
                name_range,
                format!("{display} is deprecated: {note}"),
            ));
        }
        if let Some(section) = section_name.as_deref() {
            if !descriptor.section.is_empty()
                && !descriptor.section.iter().any(|s| s == section)
            {
                self.diagnostics.push(Diagnostic::error(
                    name_range,
                    format!("{display} is not applicable to [{section}] section"),
                ));
            }
        }
        if let Some(widget) = self.current_widget_type.as_deref() {
            if !descriptor.widget.is_empty() && !descriptor.widget.iter().any(|w| w == widget) {
                self.diagnostics.push(Diagnostic::error(
                    name_range,
                    format!("{display} is not supported by the {widget} widget"),
                ));
            }
        }

        // A repetition only counts when it happens in the same scope: the
        // same branch of an open `if`, or twice outside any branch.
        // Sibling branches legitimately re-declare the same setting.
        let in_current_branch = self
            .branches
            .last()
            .is_some_and(|branch| branch.contains(&canonical));
        let repeated_unconditionally =
            self.branches.is_empty() && self.unconditional.contains(&canonical);
        if in_current_branch || repeated_unconditionally {
            if descriptor.multi_line {
                if let Some(existing) = self
                    .current_settings
                    .iter_mut()
                    .find(|setting| setting.name == canonical)
                {
                    existing.push_value(value);
                }
            } else {
                self.diagnostics.push(Diagnostic::error(
                    name_range,
                    format!("{display} is already defined"),
                ));
            }
            return;
        }

        let setting = Setting::new(descriptor, display, value, range);

        if canonical == "type" && section_name.as_deref() == Some("widget") {
            self.current_widget_type = Some(value.to_string());
            if value == "graph" {
                self.section_stack
                    .set_requirements("widget", graph_widget_dependencies());
            }
        }

        if let Some(diagnostic) = setting.check_type() {
            self.diagnostics.push(diagnostic);
        }
        for excluded in &setting.descriptor.excludes {
            if self.is_declared(excluded) {
                self.diagnostics.push(Diagnostic::error(
                    name_range,
                    format!("{display} can not be specified simultaneously with {excluded}"),
                ));
            }
        }

        if canonical == "alias" {
            self.aliases.push(value.to_string());
        }
        for call in VALUE_CALL.captures_iter(value) {
            let referenced = call.get(1).expect("group 1 always participates");
            self.dealiases.push((
                referenced.as_str().to_string(),
                Range::of_length(
                    number,
                    value_match.start() + referenced.start(),
                    referenced.as_str().len(),
                ),
            ));
        }
        if canonical == "url" || canonical == "urlparameters" {
            self.collect_url_placeholders(value, value_match.start(), number);
        }

        match self.branches.last_mut() {
            Some(branch) => {
                branch.insert(canonical);
            }
            None => {
                self.unconditional.insert(canonical);
                self.section_stack.insert_current_setting(setting.clone());
            }
        }
        self.current_settings.push(setting);
    }

    /// `{name}` tokens in url values, excluding `${...}` and `@{...}`
    /// dynamic expressions.
    fn collect_url_placeholders(&mut self, value: &str, value_start: usize, number: usize) {
        for caps in URL_PLACEHOLDER.captures_iter(value) {
            let whole = caps.get(0).expect("whole match");
            if whole.start() > 0 {
                let preceding = value.as_bytes()[whole.start() - 1];
                if preceding == b'$' || preceding == b'@' {
                    continue;
                }
            }
            let name = caps.get(1).expect("group 1 always participates");
            self.url_placeholders.push((
                name.as_str().to_string(),
                Range::of_length(
                    number,
                    value_start + name.start(),
                    name.as_str().len(),
                ),
            ));
        }
    }

    // ========================================================================
    // FREEMARKER AND LOOP REFERENCES
    // ========================================================================

    fn check_freemarker(&mut self, line: &str, number: usize) {
        for found in FREEMARKER.find_iter(line) {
            self.diagnostics.push(Diagnostic::information(
                Range::on_line(number, found.start(), found.end()),
                "Freemarker expressions are deprecated, use native syntax instead",
            ));
            if let Some(caps) = FREEMARKER_ALIAS.captures(found.as_str()) {
                self.declared_names.insert(caps[1].to_string());
            }
        }
    }

    /// `@{name}` references inside an open `for` body must name something
    /// declared via `for`/`list`/`var`/`csv`.
    fn check_at_references(&mut self, line: &str, number: usize) {
        for caps in AT_REFERENCE.captures_iter(line) {
            let name = caps.get(1).expect("group 1 always participates");
            if !self.declared_names.contains(name.as_str()) {
                self.diagnostics.push(Diagnostic::error(
                    Range::of_length(number, name.start(), name.as_str().len()),
                    format!("{} is unknown", name.as_str()),
                ));
            }
        }
    }

    // ========================================================================
    // END OF DOCUMENT
    // ========================================================================

    fn reconcile_aliases(&mut self) {
        for (name, range) in self.dealiases.drain(..) {
            if !self.aliases.contains(&name) {
                self.diagnostics.push(Diagnostic::error(
                    range,
                    format!("The alias {name} is not declared"),
                ));
            }
        }
        self.aliases.clear();
    }

    fn finalize(&mut self) {
        self.flush_section();
        self.reconcile_aliases();
        let unclosed = self.keyword_handler.finalize();
        self.diagnostics.extend(unclosed);
        let unresolved = self.section_stack.finalize();
        self.diagnostics.extend(unresolved);
        self.check_placeholders();
        let rule_diagnostics = apply_rules(&self.config_tree, self.catalog);
        self.diagnostics.extend(rule_diagnostics);
    }

    fn check_placeholders(&mut self) {
        for (name, range) in &self.url_placeholders {
            if !self.placeholder_keys.iter().any(|(key, _)| key == name) {
                self.diagnostics.push(Diagnostic::error(
                    *range,
                    format!("{name} is not defined in [placeholders]"),
                ));
            }
        }
        for (key, range) in &self.placeholder_keys {
            if !self.url_placeholders.iter().any(|(name, _)| name == key) {
                self.diagnostics.push(Diagnostic::warning(
                    *range,
                    format!("{key} is not used in any url"),
                ));
            }
        }
    }
}
