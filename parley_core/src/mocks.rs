//! Built-in mock tool sets.

use parley_env::{HarnessContext, ToolArgs};
use serde_json::{json, Value};

use crate::tools::{MockToolRegistry, ToolMock};

fn arg(args: &ToolArgs, key: &str, default: Value) -> Value {
    args.get(key).cloned().unwrap_or(default)
}

/// Tools a hotel-booking agent is expected to use.
pub fn register_hotel_booking_mocks<Ctx: HarnessContext>(registry: &MockToolRegistry<Ctx>) {
    registry.register_mock(
        "check_availability",
        ToolMock::new(|_| {
            Ok(json!({
                "available": true,
                "rooms": [
                    { "type": "Standard Room", "price": 399 },
                    { "type": "King Room", "price": 499 },
                    { "type": "Suite", "price": 899 },
                ],
            }))
        })
        .with_latency(200, 800),
    );

    registry.register_mock(
        "create_booking",
        ToolMock::new(|args| {
            Ok(json!({
                "booking_id": "BK20240115001",
                "status": "confirmed",
                "checkin": arg(args, "checkin", json!("")),
                "nights": arg(args, "nights", json!(1)),
            }))
        })
        .with_latency(500, 2000)
        .with_failure_rate(0.1),
    );

    registry.register_mock(
        "cancel_booking",
        ToolMock::new(|args| {
            Ok(json!({
                "booking_id": arg(args, "booking_id", json!("")),
                "status": "cancelled",
                "refund": true,
            }))
        })
        .with_latency(300, 1000),
    );

    registry.register_mock(
        "get_booking_details",
        ToolMock::new(|args| {
            Ok(json!({
                "booking_id": arg(args, "booking_id", json!("BK20240115001")),
                "status": "confirmed",
                "room_type": "King Room",
                "checkin": "2024-01-19",
                "nights": 2,
                "price_total": 998,
            }))
        })
        .with_latency(100, 400),
    );

    // Deliberately slow
    registry.register_mock(
        "long_running_search",
        ToolMock::new(|_| {
            Ok(json!({
                "results": [
                    { "hotel": "Grand Hotel", "distance": "0.5km", "price": 599 },
                    { "hotel": "City Inn", "distance": "1.2km", "price": 299 },
                ],
            }))
        })
        .with_latency(3000, 8000),
    );
}

/// General assistant tools.
pub fn register_general_mocks<Ctx: HarnessContext>(registry: &MockToolRegistry<Ctx>) {
    registry.register_mock(
        "get_weather",
        ToolMock::new(|args| {
            Ok(json!({
                "location": arg(args, "location", json!("Beijing")),
                "temperature": 22,
                "condition": "sunny",
                "humidity": 45,
            }))
        })
        .with_latency(100, 300),
    );

    registry.register_mock(
        "search_web",
        ToolMock::new(|args| {
            Ok(json!({
                "query": arg(args, "query", json!("")),
                "results": [
                    { "title": "Result 1", "snippet": "Some information..." },
                    { "title": "Result 2", "snippet": "More information..." },
                ],
            }))
        })
        .with_latency(500, 1500),
    );

    registry.register_mock(
        "send_email",
        ToolMock::new(|args| {
            Ok(json!({
                "status": "sent",
                "to": arg(args, "to", json!("")),
                "subject": arg(args, "subject", json!("")),
            }))
        })
        .with_latency(200, 600)
        .with_failure_rate(0.05),
    );

    registry.register_mock(
        "set_reminder",
        ToolMock::new(|args| {
            Ok(json!({
                "reminder_id": "REM001",
                "time": arg(args, "time", json!("")),
                "message": arg(args, "message", json!("")),
                "status": "set",
            }))
        })
        .with_latency(50, 200),
    );

    registry.register_mock(
        "get_calendar",
        ToolMock::new(|args| {
            Ok(json!({
                "date": arg(args, "date", json!("today")),
                "events": [
                    { "time": "09:00", "title": "Team standup" },
                    { "time": "14:00", "title": "Project review" },
                ],
            }))
        })
        .with_latency(100, 400),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_env::TokioContext;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_hotel_mocks_registered_with_latency() {
        let ctx = Arc::new(TokioContext::with_seed(11));
        let registry = MockToolRegistry::new(Arc::clone(&ctx));
        register_hotel_booking_mocks(&registry);

        assert_eq!(
            registry.tool_names(),
            vec![
                "cancel_booking",
                "check_availability",
                "create_booking",
                "get_booking_details",
                "long_running_search",
            ]
        );

        let mut args = ToolArgs::new();
        args.insert("checkin".into(), json!("next_friday"));
        let result = registry.handle_call("check_availability", args).await;
        assert!(result.success);
        assert_eq!(result.data["rooms"].as_array().map(Vec::len), Some(3));
        assert!(ctx.now() >= Duration::from_millis(200) && ctx.now() <= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_general_mocks_echo_arguments() {
        let ctx = Arc::new(TokioContext::with_seed(11));
        let registry = MockToolRegistry::new(ctx);
        register_general_mocks(&registry);

        let mut args = ToolArgs::new();
        args.insert("location".into(), json!("Lisbon"));
        let result = registry.handle_call("get_weather", args).await;
        assert_eq!(result.data["location"], json!("Lisbon"));
        assert_eq!(registry.tool_names().len(), 5);
    }
}
