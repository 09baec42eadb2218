use crate::companion::CompanionSnapshot;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let snapshot = state.companion.snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "azumi-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "avatar_feeds": metrics.active_feeds
        },
        "memory": get_memory_info(),
        "companion": companion_status(&snapshot),
        "audio": {
            "input": config.audio.input,
            "output": config.audio.output,
            "sensitivity": state.companion.sensitivity()
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let snapshot = state.companion.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "avatar_feeds": metrics.active_feeds,
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "session": snapshot.session.as_ref().map(|session| json!({
            "session_id": session.session_id,
            "state": session.state.as_str(),
            "duration_seconds": session.duration_seconds,
            "stats": session.stats
        }))
    }))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

fn companion_status(snapshot: &CompanionSnapshot) -> serde_json::Value {
    let session_state = snapshot
        .session
        .as_ref()
        .map(|s| s.state.as_str())
        .unwrap_or("idle");

    let status = match (&snapshot.last_error, snapshot.avatar.is_connected) {
        (_, true) => "connected",
        (Some(_), false) => "degraded",
        (None, false) => "idle",
    };

    json!({
        "status": status,
        "session_state": session_state,
        "is_speaking": snapshot.avatar.is_speaking,
        "emotion": snapshot.avatar.emotion,
        "has_memory": snapshot.memory.is_some(),
        "last_error": snapshot.last_error
    })
}

/// Resident and virtual size of this process, read from `/proc` on Linux.
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_health_reports_idle_companion() {
        let state = test_state();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "azumi-backend");
        assert_eq!(body["companion"]["status"], "idle");
        assert_eq!(body["companion"]["emotion"], "neutral");
    }

    #[test]
    fn test_ratio_handles_zero() {
        assert_eq!(ratio(3, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }
}
