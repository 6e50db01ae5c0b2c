mod aggregate;
mod ai;
mod analytics;
mod api;
mod auth;
mod config;
mod error;
mod models;
mod pagination;
mod query;
mod supabase;

use std::sync::Arc;

use ai::gemini::{GeminiClient, TextModel};
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use config::Config;
use supabase::{Database, SupabaseClient};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Option<Arc<dyn Database>>,
    pub model: Option<Arc<dyn TextModel>>,
}

fn build_state(config: Config) -> Result<AppState> {
    let database = match config.database_credentials() {
        Some((url, key)) => {
            let client = SupabaseClient::new(url, key, config.request_timeout)
                .context("failed to build database client")?;
            Some(Arc::new(client) as Arc<dyn Database>)
        }
        None => {
            warn!("SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY not set; data routes will answer 503");
            None
        }
    };

    let model = match config.gemini_api_key.as_deref() {
        Some(api_key) => {
            let client = GeminiClient::new(
                &config.gemini_base_url,
                &config.gemini_model,
                api_key,
                config.request_timeout,
            )
            .context("failed to build model client")?;
            Some(Arc::new(client) as Arc<dyn TextModel>)
        }
        None => {
            warn!("GOOGLE_GEMINI_API_KEY not set; chat uses keyword routing and plain summaries");
            None
        }
    };

    if config.api_key.is_none() {
        warn!("EXPO_HUB_API_KEY not set; /api routes are open");
    }

    Ok(AppState {
        config,
        database,
        model,
    })
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/exporters", post(api::exporters_overview))
        .route("/api/exporters/options", get(api::filter_options))
        .route("/api/exporters/{exporter_id}", get(api::exporter_profile))
        .route("/api/dashboard", get(api::dashboard))
        .route("/api/ai", post(api::ai_chat))
        .route("/api/ai/health", get(api::ai_health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "expo_hub_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;
    let state = build_state(config)?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("expo-hub-api listening on {}", bind_addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_without_credentials_has_no_clients() {
        let state = build_state(Config::default()).expect("state");
        assert!(state.database.is_none());
        assert!(state.model.is_none());
    }

    #[test]
    fn state_with_credentials_builds_clients() {
        let config = Config {
            supabase_url: Some("https://abc.supabase.co".to_string()),
            supabase_service_key: Some("service-role".to_string()),
            gemini_api_key: Some("gemini-key".to_string()),
            ..Config::default()
        };
        let state = build_state(config).expect("state");
        assert!(state.database.is_some());
        assert_eq!(state.model.as_deref().map(|m| m.name()), Some("gemini-2.0-flash"));
    }
}
