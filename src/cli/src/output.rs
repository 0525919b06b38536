//! Output formatting utilities for the Portal CLI.
//!
//! Supports table, JSON, and YAML output formats.

use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print rows as a table, or the rows themselves as JSON/YAML.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return;
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        _ => print_item(items, format),
    }
}

/// Print a single item as JSON (table mode included) or YAML.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) {
    let rendered = match format {
        OutputFormat::Table | OutputFormat::Json => {
            serde_json::to_string_pretty(item).map(|s| s + "\n").map_err(|e| e.to_string())
        }
        OutputFormat::Yaml => serde_yaml::to_string(item).map_err(|e| e.to_string()),
    };

    match rendered {
        Ok(text) => print!("{}", text),
        Err(e) => print_error(&format!("Failed to render output: {}", e)),
    }
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Colour a job state name for terminal display.
pub fn state_label(state: &str) -> ColoredString {
    match state {
        "completed" => state.green(),
        "failed" => state.red(),
        "processing" => state.yellow(),
        "pending" => state.blue(),
        other => other.normal(),
    }
}

/// Colour a recommendation severity for terminal display.
pub fn severity_label(severity: &str) -> ColoredString {
    match severity {
        "critical" => severity.red().bold(),
        "warning" => severity.yellow(),
        _ => severity.dimmed(),
    }
}
