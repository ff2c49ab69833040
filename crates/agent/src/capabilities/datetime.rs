use std::fmt::Write;

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use serde_json::{json, Value};

use crate::tools::{optional_str, Tool, ToolError};

pub const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CurrentDatetime;

/// Formats the local wall-clock time. Invalid directives are an error
/// rather than a panic.
pub fn format_now(format: &str) -> Result<String, ToolError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ToolError::InvalidArguments(format!("unsupported format string `{format}`")));
    }

    let mut rendered = String::new();
    write!(rendered, "{}", Local::now().format_with_items(items.iter()))
        .map_err(|_| ToolError::InvalidArguments(format!("unsupported format string `{format}`")))?;
    Ok(rendered)
}

#[async_trait]
impl Tool for CurrentDatetime {
    fn name(&self) -> &'static str {
        "current_datetime"
    }

    fn description(&self) -> &'static str {
        "Return the current datetime as a string formatted according to the given strftime format."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "strftime-style format string",
                    "default": DEFAULT_FORMAT
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let format = optional_str(&input, "format")
            .filter(|format| !format.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
        format_now(&format)
    }
}
