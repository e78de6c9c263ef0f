//! Current time tool

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde_json::{json, Value};

use crate::tool::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput};

/// Japan Standard Time, used when the caller gives no offset
const DEFAULT_OFFSET_HOURS: i64 = 9;

pub struct CurrentTimeTool {
    now: fn() -> DateTime<Utc>,
}

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self { now: Utc::now }
    }

    #[cfg(test)]
    fn fixed(now: fn() -> DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object().property(
            "utc_offset_hours",
            PropertySchema::integer("Offset from UTC in hours (default +9)").with_range(-12.0, 14.0),
            false,
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let hours = input
            .get("utc_offset_hours")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_OFFSET_HOURS);

        let offset = FixedOffset::east_opt((hours * 3600) as i32)
            .ok_or_else(|| ToolError::invalid_params(format!("invalid UTC offset: {}", hours)))?;
        let local = (self.now)().with_timezone(&offset);

        let text = format!("{}時{:02}分です。", local.hour(), local.minute());
        Ok(ToolOutput::text(text).with_data(json!({
            "iso8601": local.to_rfc3339(),
            "utc_offset_hours": hours,
        })))
    }

    fn timeout_secs(&self) -> u64 {
        1
    }
}
