use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    CurrentLocation, Tool, ToolContext, ToolEffect, ToolResult, required_f64, required_str,
};

/// `get_weather {lat, lng, location}` backed by Open-Meteo.
pub struct GetWeatherTool {
    context: ToolContext,
}

impl GetWeatherTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

/// Pull `{temperature, wind_speed}` with units out of a forecast response.
fn observation(forecast: &Value) -> Option<Value> {
    let current = forecast.get("current")?;
    let units = forecast.get("current_units");
    let reading = |field: &str| {
        current.get(field).map(|value| {
            json!({
                "value": value,
                "units": units.and_then(|u| u.get(field)).cloned().unwrap_or(Value::Null),
            })
        })
    };
    Some(json!({
        "temperature": reading("temperature_2m")?,
        "wind_speed": reading("wind_speed_10m")?,
    }))
}

#[async_trait]
impl Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Retrieves the weather for a given lat, lng coordinate pair. Specify a label for the location."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lat": { "type": "number", "description": "Latitude" },
                "lng": { "type": "number", "description": "Longitude" },
                "location": { "type": "string", "description": "Name of the location" }
            },
            "required": ["lat", "lng", "location"]
        })
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let lat = required_f64(&params, "lat")?;
        let lng = required_f64(&params, "lng")?;
        let location = required_str(&params, "location")?;

        self.context.emit(ToolEffect::SetLocation(CurrentLocation {
            name: location.to_string(),
            canonical_id: None,
            lat: Some(lat),
            lng: Some(lng),
            observation: None,
        }));

        let url = format!("{}/v1/forecast", self.context.weather_base_url);
        let request = self.context.http.get(url).query(&[
            ("latitude", lat.to_string()),
            ("longitude", lng.to_string()),
            ("current", "temperature_2m,wind_speed_10m".to_string()),
        ]);
        let forecast = self.context.get_json(request).await?;

        match observation(&forecast) {
            Some(observed) => self.context.emit(ToolEffect::ObserveLocation(observed)),
            None => tracing::debug!("Forecast without current readings"),
        }
        Ok(forecast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_extracts_units() {
        let forecast = json!({
            "current": {"temperature_2m": 21.5, "wind_speed_10m": 3.2},
            "current_units": {"temperature_2m": "°C", "wind_speed_10m": "km/h"}
        });
        let observed = observation(&forecast).unwrap();
        assert_eq!(observed["temperature"]["value"], json!(21.5));
        assert_eq!(observed["wind_speed"]["units"], json!("km/h"));
    }

    #[test]
    fn test_observation_missing_current() {
        assert!(observation(&json!({"latitude": 1.0})).is_none());
    }
}
