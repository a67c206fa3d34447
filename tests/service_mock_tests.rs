//! Tools and memory persistence against mocked HTTP services.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_realtime_console::memory::{MemoryError, MemoryMap, MemoryPersistence};
use waav_realtime_console::tools::{
    ToolContext, ToolEffect, ToolRegistry, register_builtin_tools,
};

fn registry_for(
    server: &MockServer,
) -> (ToolRegistry, mpsc::UnboundedReceiver<ToolEffect>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let context = ToolContext::new(tx, &server.uri(), &server.uri(), Duration::from_secs(5))
        .expect("context");
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry, &context);
    (registry, rx)
}

#[tokio::test]
async fn test_get_weather_reports_location_and_observation() {
    let server = MockServer::start().await;
    let forecast = json!({
        "latitude": 48.86,
        "longitude": 2.35,
        "current_units": {"temperature_2m": "°C", "wind_speed_10m": "km/h"},
        "current": {"temperature_2m": 18.5, "wind_speed_10m": 9.7}
    });
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "48.8566"))
        .and(query_param("current", "temperature_2m,wind_speed_10m"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&forecast))
        .expect(1)
        .mount(&server)
        .await;

    let (registry, mut effects) = registry_for(&server);
    let result = registry
        .invoke_with_arguments(
            "get_weather",
            r#"{"lat": 48.8566, "lng": 2.3522, "location": "Paris"}"#,
        )
        .await;
    assert_eq!(result, forecast);

    match effects.recv().await {
        Some(ToolEffect::SetLocation(location)) => {
            assert_eq!(location.name, "Paris");
            assert_eq!(location.lat, Some(48.8566));
            assert_eq!(location.lng, Some(2.3522));
        }
        other => panic!("expected SetLocation, got {other:?}"),
    }
    match effects.recv().await {
        Some(ToolEffect::ObserveLocation(observation)) => {
            assert_eq!(observation["temperature"]["value"], 18.5);
            assert_eq!(observation["temperature"]["units"], "°C");
            assert_eq!(observation["wind_speed"]["units"], "km/h");
        }
        other => panic!("expected ObserveLocation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_weather_service_error_becomes_error_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (registry, _effects) = registry_for(&server);
    let result = registry
        .invoke_with_arguments("get_weather", r#"{"lat": 1.0, "lng": 2.0, "location": "Sea"}"#)
        .await;
    let message = result["error"].as_str().expect("error payload");
    assert!(message.contains("503"));
}

#[tokio::test]
async fn test_get_time_resolves_city_to_zone() {
    let server = MockServer::start().await;
    let body = json!({"timezone": "Asia/Tokyo", "datetime": "2024-10-01T21:00:00+09:00"});
    Mock::given(method("GET"))
        .and(path("/api/timezone/Asia/Tokyo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let (registry, mut effects) = registry_for(&server);
    let result = registry
        .invoke_with_arguments("get_time", r#"{"location": "Tokyo"}"#)
        .await;
    assert_eq!(result, body);

    match effects.recv().await {
        Some(ToolEffect::SetLocation(location)) => {
            assert_eq!(location.name, "Tokyo");
            assert_eq!(location.canonical_id.as_deref(), Some("Asia/Tokyo"));
            assert!(location.lat.is_none());
        }
        other => panic!("expected SetLocation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_memory_saved_to_primary() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/memory"))
        .and(body_json(json!({"memory": {"name": "Ada"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&primary)
        .await;

    let persistence =
        MemoryPersistence::from_urls(Some(&primary.uri()), None, None, Duration::from_secs(5))
            .unwrap();
    let mut memory = MemoryMap::new();
    memory.insert("name".to_string(), json!("Ada"));

    let store = persistence.save(&memory).await.unwrap();
    assert!(store.ends_with("/memory"));
}

#[tokio::test]
async fn test_memory_falls_through_to_fallback_then_cache() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/memory"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&primary)
        .await;

    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/memory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
        .expect(1)
        .mount(&fallback)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let cache = temp_dir.path().join("memory.json");
    let persistence = MemoryPersistence::from_urls(
        Some(&primary.uri()),
        Some(&fallback.uri()),
        Some(&cache),
        Duration::from_secs(5),
    )
    .unwrap();

    let mut memory = MemoryMap::new();
    memory.insert("city".to_string(), json!("Lisbon"));
    let store = persistence.save(&memory).await.unwrap();
    assert_eq!(store, cache.display().to_string());

    // Loads walk the same chain: both services fail to answer, the cache does.
    Mock::given(method("GET"))
        .and(path("/memory"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&primary)
        .await;
    Mock::given(method("GET"))
        .and(path("/memory"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&fallback)
        .await;
    let loaded = persistence.load().await.unwrap();
    assert_eq!(loaded.get("city"), Some(&json!("Lisbon")));
}

#[tokio::test]
async fn test_memory_load_from_service() {
    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/memory"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"memory": {"pet": "cat"}})),
        )
        .mount(&primary)
        .await;

    let persistence =
        MemoryPersistence::from_urls(Some(&primary.uri()), None, None, Duration::from_secs(5))
            .unwrap();
    let loaded = persistence.load().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded["pet"], json!("cat"));
}

#[tokio::test]
async fn test_memory_all_stores_failing_returns_last_error() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/memory"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&primary)
        .await;

    let persistence =
        MemoryPersistence::from_urls(Some(&primary.uri()), None, None, Duration::from_secs(5))
            .unwrap();
    let err = persistence.save(&MemoryMap::new()).await.unwrap_err();
    assert!(matches!(err, MemoryError::Status(401)));
}
