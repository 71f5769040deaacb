use std::io::Write;
use std::path::Path;

use log::info;
use serde_json::Value;

use crate::models::TableResult;

/// Text form of a cell: NULL is empty, strings are raw, everything else is
/// JSON text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn write_csv<W: Write>(result: &TableResult, writer: W) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(result.columns())?;
    for row in result.rows() {
        writer.write_record(result.columns().iter().map(|c| cell_text(row.get(c).unwrap_or(&Value::Null))))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, result: &TableResult) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::File::create(path)?;
    write_csv(result, file)?;
    info!("Exported {} rows to CSV: {}", result.len(), path.display());
    Ok(())
}

/// One JSON object per line, keys in column order.
pub fn write_json_lines<W: Write>(result: &TableResult, mut writer: W) -> Result<(), Box<dyn std::error::Error>> {
    for row in result.rows() {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
