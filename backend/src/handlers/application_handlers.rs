use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::handlers::application_dtos::{ApplicationRequest, HealthResponse, SubmitResponse};
use crate::utils::validation::validate_application;
use crate::AppState;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// `POST /api/applications`: validate, insert, answer with the new row id.
/// Rate limiting runs as a route layer in front of this handler.
pub async fn submit_application(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ApplicationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let Json(request) = payload.map_err(|e| AppError::MalformedBody(e.body_text()))?;

    let application = validate_application(&request)?;
    let record = state.store.insert(application).await?;

    info!("Application {} stored via {}", record.id, state.store.describe());

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            success: true,
            message: "Aplicação recebida com sucesso".to_string(),
            id: record.id,
        }),
    ))
}

pub async fn method_not_allowed() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Method not allowed"})),
    )
}

pub async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::app_config::AppConfig;
    use crate::handlers::application_dtos::SubmitResponse;
    use crate::repositories::application_repository::{
        ApplicationStore, InMemoryStore, MockApplicationStore, StoreError,
    };
    use crate::build_router;
    use axum::{
        body::Body,
        http::{header, Request},
        response::Response,
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn config(extra: &[(&str, &str)]) -> AppConfig {
        let mut vars: Vec<(String, String)> = vec![("ENVIRONMENT".into(), "development".into())];
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        AppConfig::from_lookup(|key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    fn router_with(store: Arc<dyn ApplicationStore>, config: &AppConfig) -> Router {
        build_router(Arc::new(AppState::new(store, config)), config)
    }

    fn application_json() -> Value {
        json!({
            "experience": "Sou um completo iniciante (0-6 meses)",
            "businessModel": "CLT / Buscando transição",
            "automationLevel": "Nenhum (Nunca ouvi falar)",
            "goal": "Cashflow Rápido (Preciso de caixa)",
            "investment": "Sim, pronto para o jogo de longo prazo",
            "email": "joao@example.com",
            "whatsapp": "(11) 91234-5678"
        })
    }

    fn submit(body: &Value, ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/applications")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn stores_application_and_returns_id() {
        let store = Arc::new(InMemoryStore::new());
        let app = router_with(store.clone(), &config(&[]));

        let response = app.oneshot(submit(&application_json(), "203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["ratelimit-remaining"], "9");

        let body: SubmitResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert!(body.success);
        assert_eq!(body.message, "Aplicação recebida com sucesso");

        let stored = store.fetch(&body.id).await.unwrap().expect("row was stored");
        assert_eq!(stored.application.business_model, "CLT / Buscando transição");
        assert_eq!(stored.application.automation_level, "Nenhum (Nunca ouvi falar)");
        assert_eq!(stored.application.email, "joao@example.com");
        assert_eq!(stored.application.whatsapp, "(11) 91234-5678");
    }

    #[tokio::test]
    async fn invalid_submissions_never_reach_the_store() {
        let cases = [
            ("businessModel", Value::Null, "Todos os campos são obrigatórios"),
            ("goal", json!(""), "Todos os campos são obrigatórios"),
            ("email", json!("joao.example.com"), "Email inválido"),
            ("whatsapp", json!("(11) 1234"), "WhatsApp inválido"),
        ];

        for (field, value, message) in cases {
            let mut store = MockApplicationStore::new();
            store.expect_insert().times(0);
            let app = router_with(Arc::new(store), &config(&[]));

            let mut body = application_json();
            body[field] = value;
            let response = app.oneshot(submit(&body, "203.0.113.2")).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "field {field}");
            assert_eq!(body_json(response).await["error"], message);
        }
    }

    #[tokio::test]
    async fn absent_keys_are_missing_fields() {
        let app = router_with(Arc::new(InMemoryStore::new()), &config(&[]));
        let response = app
            .oneshot(submit(&json!({"email": "joao@example.com"}), "203.0.113.3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Todos os campos são obrigatórios");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = router_with(Arc::new(InMemoryStore::new()), &config(&[]));
        let request = Request::builder()
            .method("POST")
            .uri("/api/applications")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Corpo da requisição inválido");
    }

    #[tokio::test]
    async fn store_failure_is_generic_server_error() {
        let mut store = MockApplicationStore::new();
        store.expect_insert().times(1).returning(|_| {
            Err(StoreError::Rejected {
                status: 500,
                body: "duplicate key value violates unique constraint".to_string(),
            })
        });
        let app = router_with(Arc::new(store), &config(&[]));

        let response = app.oneshot(submit(&application_json(), "203.0.113.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "Erro ao salvar aplicação"}));
    }

    #[tokio::test]
    async fn eleventh_request_from_same_ip_is_throttled() {
        let store = Arc::new(InMemoryStore::new());
        let app = router_with(store.clone(), &config(&[]));

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(submit(&application_json(), "198.51.100.7"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .clone()
            .oneshot(submit(&application_json(), "198.51.100.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(
            body_json(response).await["error"],
            "Muitas requisições. Tente novamente em 15 minutos."
        );
        assert_eq!(store.len().await, 10);

        let response = app
            .oneshot(submit(&application_json(), "198.51.100.8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router_with(Arc::new(InMemoryStore::new()), &config(&[]));
        for path in ["/health", "/api/health"] {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
            let body = body_json(response).await;
            assert_eq!(body["status"], "ok");
            assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());
        }
    }

    #[tokio::test]
    async fn wrong_method_and_unknown_path() {
        let app = router_with(Arc::new(InMemoryStore::new()), &config(&[]));

        let response = app
            .clone()
            .oneshot(Request::get("/api/applications").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(response).await["error"], "Method not allowed");

        let response = app
            .oneshot(Request::get("/api/nothing-here").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_allowlist_only_echoes_known_origins() {
        let config = config(&[("ALLOWED_ORIGINS", "https://fnbfounders.com")]);
        let app = router_with(Arc::new(InMemoryStore::new()), &config);

        let preflight = |origin: &str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/api/applications")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(preflight("https://fnbfounders.com")).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://fnbfounders.com"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let response = app.oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(!response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn cors_defaults_to_any_origin() {
        let app = router_with(Arc::new(InMemoryStore::new()), &config(&[]));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/applications")
            .header(header::ORIGIN, "https://anywhere.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
