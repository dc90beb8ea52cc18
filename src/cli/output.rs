//! Handles all user-facing output for the CLI.
//!
//! This module is responsible for pretty-printing, colorizing output,
//! formatting diagnostics, and generating JSON. By centralizing output logic
//! here, we ensure a consistent user experience across all commands.

use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::diagnostics::{to_report, Diagnostic, DiagnosticSeverity};

/// Colors only when stdout is an interactive terminal.
fn color_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn severity_style(severity: DiagnosticSeverity) -> (&'static str, Color) {
    match severity {
        DiagnosticSeverity::Error => ("error", Color::Red),
        DiagnosticSeverity::Warning => ("warning", Color::Yellow),
        DiagnosticSeverity::Information => ("info", Color::Cyan),
        DiagnosticSeverity::Hint => ("hint", Color::Blue),
    }
}

/// Prints one `file:line:column severity message` row per diagnostic.
/// Lines and columns are shown 1-based.
pub fn print_text(file_name: &str, diagnostics: &[Diagnostic]) {
    let mut stdout = StandardStream::stdout(color_choice());
    for diagnostic in diagnostics {
        let (label, color) = severity_style(diagnostic.severity);
        print!(
            "{}:{}:{} ",
            file_name,
            diagnostic.range.start.line + 1,
            diagnostic.range.start.character + 1
        );
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
        print!("{label}");
        let _ = stdout.reset();
        println!(" {}", diagnostic.message);
    }
    let _ = stdout.flush();
}

/// Prints annotated source snippets for every diagnostic.
pub fn print_pretty(file_name: &str, text: &str, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let report = to_report(diagnostic, file_name, text);
        eprint!("{report:?}");
    }
}

/// Serializes the diagnostics of every file as one JSON object keyed by
/// file name.
pub fn print_json(results: &[(String, Vec<Diagnostic>)]) -> serde_json::Result<()> {
    let value: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|(file, diagnostics)| {
            Ok((file.clone(), serde_json::to_value(diagnostics)?))
        })
        .collect::<serde_json::Result<_>>()?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Summary row after validating multiple files.
pub fn print_summary(files: usize, errors: usize, warnings: usize) {
    let mut stdout = StandardStream::stdout(color_choice());
    let color = if errors > 0 {
        Color::Red
    } else if warnings > 0 {
        Color::Yellow
    } else {
        Color::Green
    };
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    println!(
        "{} file(s) checked: {} error(s), {} warning(s)",
        files, errors, warnings
    );
    let _ = stdout.reset();
}
