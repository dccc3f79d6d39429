use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoints: Vec<serde_json::Value> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "upstream": {
            "url": config.upstream.url,
            "model": config.upstream.model,
            "api_key_configured": config.upstream.api_key.is_some()
        },
        "relay": {
            "active_relays": metrics.active_relays,
            "relays_opened": metrics.relays_opened,
            "rejected_upgrades": metrics.rejected_upgrades,
            "forwarded_to_upstream": metrics.forwarded_to_upstream,
            "forwarded_to_client": metrics.forwarded_to_client,
            "dropped_to_upstream": metrics.dropped_to_upstream
        },
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "endpoints": endpoints
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_relay_counters() {
        let state = AppState::new(AppConfig::default());
        state.relay_opened();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["relay"]["active_relays"], 1);
        assert_eq!(body["upstream"]["api_key_configured"], false);
    }
}
