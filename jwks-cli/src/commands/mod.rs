pub mod credential;
pub mod keys;

use crate::error::{Error, Result};
use serde_json::Value;
use std::io::Read;

/// Reads a document from a file path, or from stdin when `source` is `-`
pub fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(source)
            .map_err(|e| Error::invalid_parameter(format!("Failed to read {}: {}", source, e)))
    }
}

/// Reads and parses a JSON document from a file path or stdin
pub fn read_json(source: &str) -> Result<Value> {
    let text = read_source(source)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::invalid_parameter(format!("Invalid JSON in {}: {}", source, e)))
}
