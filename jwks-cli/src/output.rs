//! Response rendering for the command line

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

/// Output format for CLI responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `{"status": ..., "data": ...}` envelope
    Json,
    /// Indented `name: value` lines
    Text,
}

#[derive(Debug, Serialize)]
struct SuccessEnvelope<'a, T: Serialize> {
    status: &'static str,
    data: &'a T,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    status: &'static str,
    error: &'a str,
}

/// Renders a successful result in the chosen format
pub fn render_success<T: Serialize>(format: OutputFormat, data: &T) -> String {
    match format {
        OutputFormat::Json => to_pretty(&SuccessEnvelope {
            status: "success",
            data,
        }),
        OutputFormat::Text => {
            let mut out = String::new();
            let value = serde_json::to_value(data).unwrap_or(Value::Null);
            render_text_value(&mut out, &value, 0);
            out
        }
    }
}

/// Renders an error in the chosen format
pub fn render_error(format: OutputFormat, error: &str) -> String {
    match format {
        OutputFormat::Json => to_pretty(&ErrorEnvelope {
            status: "error",
            error,
        }),
        OutputFormat::Text => format!("Error: {}", error),
    }
}

/// Prints a successful result to stdout
pub fn print_success<T: Serialize>(format: OutputFormat, data: &T) {
    println!("{}", render_success(format, data).trim_end());
}

/// Prints an error to stderr
pub fn print_error(format: OutputFormat, error: &str) {
    eprintln!("{}", render_error(format, error));
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        format!(
            "{{\"status\":\"error\",\"error\":\"Serialization failed: {}\"}}",
            e
        )
    })
}

fn render_text_value(out: &mut String, value: &Value, indent: usize) {
    let pad = " ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{}{}:\n", pad, key));
                        render_text_value(out, val, indent + 2);
                    }
                    _ => out.push_str(&format!("{}{}: {}\n", pad, key, format_scalar(val))),
                }
            }
        }
        Value::Array(items) => {
            for (i, val) in items.iter().enumerate() {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{}[{}]:\n", pad, i));
                        render_text_value(out, val, indent + 2);
                    }
                    _ => out.push_str(&format!("{}[{}]: {}\n", pad, i, format_scalar(val))),
                }
            }
        }
        _ => out.push_str(&format!("{}{}\n", pad, format_scalar(value))),
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
