//! Per-endpoint request counters.
//!
//! Endpoints are keyed by route pattern rather than raw path, so every call
//! to `/ws/avatar?x=1` and `/ws/avatar` lands in the same bucket. Requests
//! that matched no route are grouped under `"<method> unmatched"`.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::debug;

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

fn endpoint_key(method: &str, pattern: Option<String>) -> String {
    format!("{} {}", method, pattern.as_deref().unwrap_or("unmatched"))
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let endpoint = endpoint_key(req.method().as_str(), req.match_pattern());
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &app_state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            if let Some(state) = app_state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    state.increment_error_count();
                }
            }

            debug!(endpoint = %endpoint, duration_ms, is_error, "Request recorded");
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App, HttpResponse};

    #[test]
    fn test_endpoint_key() {
        assert_eq!(endpoint_key("GET", Some("/health".to_string())), "GET /health");
        assert_eq!(endpoint_key("POST", None), "POST unmatched");
    }

    #[actix_web::test]
    async fn test_records_requests_and_errors() {
        let state = web::Data::new(test_state());
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .wrap(MetricsMiddleware)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/fail", web::get().to(|| async { HttpResponse::Conflict().finish() })),
        )
        .await;

        actix_test::call_service(&app, actix_test::TestRequest::get().uri("/ok").to_request()).await;
        actix_test::call_service(&app, actix_test::TestRequest::get().uri("/fail").to_request()).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /ok"].request_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /fail"].error_count, 1);
    }
}
