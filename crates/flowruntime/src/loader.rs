// crates/flowruntime/src/loader.rs
//! Reads unit declarations (`nodes` / `sequences`) from JSON or YAML files.

use flowcore::value::deep_merge;
use flowcore::{ConfigError, FlowError, Map, UnitSet, Value};
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Load one unit file, or every unit file below a directory.
///
/// Files are merged in path order; on conflicting keys the later file wins.
pub fn load_units(path: impl AsRef<Path>) -> Result<UnitSet, FlowError> {
    let path = path.as_ref();
    let files = if path.is_dir() {
        let mut files = Vec::new();
        collect_unit_files(path, &mut files)?;
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut merged = Value::Object(Map::new());
    for file in &files {
        let text = std::fs::read_to_string(file)?;
        let value = parse_units(&text, file)?;
        tracing::debug!("Loaded units from {}", file.display());
        deep_merge(&mut merged, value);
    }

    let mut units: UnitSet = serde_json::from_value(merged)?;
    units.normalize_ids();
    tracing::info!(
        "Loaded {} node(s) and {} sequence(s) from {} file(s)",
        units.nodes.len(),
        units.sequences.len(),
        files.len()
    );
    Ok(units)
}

/// Parse one document; the format follows the file extension (JSON unless `.yaml`/`.yml`).
pub fn parse_units(text: &str, source: &Path) -> Result<Value, FlowError> {
    let value: Value = match source.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml_ng::from_str(text)?,
        _ => serde_json::from_str(text)?,
    };
    match value {
        Value::Object(_) => Ok(value),
        // empty YAML documents
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(ConfigError::InvalidUnit {
            source_name: source.display().to_string(),
            message: format!("expected a mapping at the top level, found {}", kind_of(&other)),
        }
        .into()),
    }
}

fn collect_unit_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), FlowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_unit_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
