//! The charts-lint command-line interface.
//!
//! This module is the main entry point for all CLI commands and orchestrates
//! the core library functions.

use std::path::{Path, PathBuf};
use std::{fs, process};

use clap::Parser;
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::cli::args::{ChartsArgs, Command, OutputFormat};
use crate::diagnostics::{Diagnostic, DiagnosticSeverity};
use crate::validator::validate;

pub mod args;
pub mod output;

/// The main entry point for the CLI.
pub fn run() {
    let args = ChartsArgs::parse();

    let result = match args.command {
        Command::Validate {
            path,
            format,
            catalog,
            strict,
        } => handle_validate(&path, format, catalog.as_deref(), strict),
        Command::ListSettings { catalog } => handle_list_settings(catalog.as_deref()),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(error) => {
            eprintln!("Error: {error}");
            process::exit(2);
        }
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(Catalog::from_json(&json)?)
        }
        None => Ok(Catalog::default_catalog()),
    }
}

/// Handles the `validate` subcommand. Returns the process exit code.
fn handle_validate(
    path: &Path,
    format: OutputFormat,
    catalog_path: Option<&Path>,
    strict: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let catalog = load_catalog(catalog_path)?;
    let files = collect_files(path)?;
    if files.is_empty() {
        eprintln!("No configuration files found under {}", path.display());
        return Ok(0);
    }

    let mut results: Vec<(String, String, Vec<Diagnostic>)> = Vec::new();
    for file in &files {
        let text = fs::read_to_string(file)?;
        let diagnostics = validate(&text, &catalog);
        results.push((file.display().to_string(), text, diagnostics));
    }

    let errors: usize = count_severity(&results, DiagnosticSeverity::Error);
    let warnings: usize = count_severity(&results, DiagnosticSeverity::Warning);

    match format {
        OutputFormat::Text => {
            for (file, _, diagnostics) in &results {
                output::print_text(file, diagnostics);
            }
            output::print_summary(results.len(), errors, warnings);
        }
        OutputFormat::Pretty => {
            for (file, text, diagnostics) in &results {
                output::print_pretty(file, text, diagnostics);
            }
            output::print_summary(results.len(), errors, warnings);
        }
        OutputFormat::Json => {
            let flat: Vec<(String, Vec<Diagnostic>)> = results
                .into_iter()
                .map(|(file, _, diagnostics)| (file, diagnostics))
                .collect();
            output::print_json(&flat)?;
        }
    }

    let failed = errors > 0 || (strict && warnings > 0);
    Ok(if failed { 1 } else { 0 })
}

/// Handles the `list-settings` subcommand.
fn handle_list_settings(catalog_path: Option<&Path>) -> Result<i32, Box<dyn std::error::Error>> {
    let catalog = load_catalog(catalog_path)?;
    let mut settings: Vec<_> = catalog.iter().collect();
    settings.sort_by(|a, b| a.0.cmp(b.0));
    for (name, descriptor) in settings {
        println!("{name:40} {:?}", descriptor.setting_type);
    }
    Ok(0)
}

/// A file argument is taken as-is; a directory is walked for `.config`
/// files.
fn collect_files(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "config")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn count_severity(
    results: &[(String, String, Vec<Diagnostic>)],
    severity: DiagnosticSeverity,
) -> usize {
    results
        .iter()
        .flat_map(|(_, _, diagnostics)| diagnostics)
        .filter(|diagnostic| diagnostic.severity == severity)
        .count()
}
