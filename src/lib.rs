pub use crate::catalog::{Catalog, SettingDescriptor, SettingType};
pub use crate::diagnostics::{Diagnostic, DiagnosticSeverity, Position, Range};
pub use crate::validator::{validate, Validator};

pub mod catalog;
pub mod cli;
pub mod config;
pub mod config_tree;
pub mod diagnostics;
pub mod expr;
pub mod keyword_handler;
pub mod rules;
pub mod section_stack;
pub mod setting;
pub mod text_range;
pub mod time_parser;
pub mod validator;
