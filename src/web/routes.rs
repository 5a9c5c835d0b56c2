use crate::bootstrap::RuntimeSecrets;
use crate::secrets::ProvisionOutcome;
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub secrets: Arc<RuntimeSecrets>,
}

/// Provisioning state of one secret. Never carries the value.
#[derive(Debug, Serialize)]
pub struct SecretStatus {
    pub name: String,
    pub resolved: &'static str,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub secrets: Vec<SecretStatus>,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let secrets = state
        .secrets
        .outcomes()
        .iter()
        .map(|(name, outcome)| SecretStatus {
            name: name.clone(),
            resolved: match outcome {
                ProvisionOutcome::AlreadyDefined { .. } => "already_defined",
                ProvisionOutcome::Generated => "generated",
                ProvisionOutcome::Updated => "updated",
            },
        })
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        secrets,
    })
}

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapGate;
    use crate::config::AppConfig;
    use crate::secrets::{EnvSnapshot, OsKeyGenerator};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_lists_names_but_not_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.store.path = dir.path().join(".env");
        let env = EnvSnapshot::empty();
        let secrets = BootstrapGate::new(&config, &env, &OsKeyGenerator).run().unwrap();
        let signing = secrets.signing_key.expose().to_string();

        let app = create_router(AppState {
            secrets: Arc::new(secrets),
        });
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["secrets"][0]["name"], "SECRET_KEY");
        assert_eq!(json["secrets"][0]["resolved"], "generated");
        assert!(!text.contains(&signing));
    }
}
