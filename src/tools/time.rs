use async_trait::async_trait;
use serde_json::{Value, json};

use super::{CurrentLocation, Tool, ToolContext, ToolEffect, ToolResult, required_str};

/// Common place names and their IANA time zones.
const KNOWN_TIME_ZONES: &[(&str, &str)] = &[
    ("new york", "America/New_York"),
    ("london", "Europe/London"),
    ("tokyo", "Asia/Tokyo"),
    ("paris", "Europe/Paris"),
    ("sydney", "Australia/Sydney"),
    ("san francisco", "America/Los_Angeles"),
    ("los angeles", "America/Los_Angeles"),
    ("berlin", "Europe/Berlin"),
    ("dubai", "Asia/Dubai"),
    ("singapore", "Asia/Singapore"),
    ("chicago", "America/Chicago"),
    ("mumbai", "Asia/Kolkata"),
];

/// Map a place name to an IANA zone, falling back to the input itself.
pub fn resolve_time_zone(location: &str) -> String {
    let wanted = location.trim().to_lowercase();
    KNOWN_TIME_ZONES
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, zone)| zone.to_string())
        .unwrap_or_else(|| location.trim().to_string())
}

/// `get_time {location}` backed by a worldtimeapi-style service.
pub struct GetTimeTool {
    context: ToolContext,
}

impl GetTimeTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for GetTimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Retrieves the current local time for a city or IANA time zone."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name or IANA time zone, e.g. \"Tokyo\" or \"Europe/Paris\""
                }
            },
            "required": ["location"]
        })
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let location = required_str(&params, "location")?;
        let zone = resolve_time_zone(location);

        self.context.emit(ToolEffect::SetLocation(CurrentLocation {
            name: location.to_string(),
            canonical_id: Some(zone.clone()),
            ..Default::default()
        }));

        let url = format!("{}/api/timezone/{}", self.context.time_base_url, zone);
        self.context.get_json(self.context.http.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_names() {
        assert_eq!(resolve_time_zone("New York"), "America/New_York");
        assert_eq!(resolve_time_zone("  tokyo "), "Asia/Tokyo");
        assert_eq!(resolve_time_zone("San Francisco"), "America/Los_Angeles");
    }

    #[test]
    fn test_resolve_falls_back_to_input() {
        assert_eq!(resolve_time_zone("Europe/Lisbon"), "Europe/Lisbon");
    }
}
