//! Table and JSON rendering

use clap::ValueEnum;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Print rows as a table, or the raw value as JSON
pub fn print_rows<R: Tabled, T: Serialize + ?Sized>(
    rows: &[R],
    raw: &T,
    format: OutputFormat,
) -> eyre::Result<()> {
    match format {
        OutputFormat::Table if rows.is_empty() => println!("No items found."),
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(raw)?),
    }
    Ok(())
}

/// Print a single value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}
