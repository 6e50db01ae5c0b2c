use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    ai::{
        executor::{self, ResultKind},
        narrator::{self, ChartSuggestion},
        plan::Plan,
        router, Lang,
    },
    analytics,
    auth::verify_bearer,
    error::{error_response, internal, not_configured, ApiError},
    models::{Filters, UrlFilters},
    query::{rpc_args, RpcShape, TableQuery, SHIPMENTS_VIEW},
    supabase::Database,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    /// Prior turns from the UI. Only counted; routing looks at `message`.
    #[serde(default)]
    pub history: Option<Value>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_kind: Option<ResultKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSuggestion>,
}

/// Bearer gate plus database presence, shared by every data route.
fn guard<'a>(state: &'a AppState, headers: &HeaderMap) -> Result<&'a dyn Database, ApiError> {
    verify_bearer(headers, state.config.api_key.as_deref())?;
    state.database.as_deref().ok_or_else(not_configured)
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

pub async fn exporters_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Filters>, JsonRejection>,
) -> Response {
    let db = match guard(&state, &headers) {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };
    let Json(filters) = match payload {
        Ok(filters) => filters,
        Err(rejection) => return bad_request(rejection.body_text()).into_response(),
    };

    let response = analytics::exporters_overview(db, &filters, state.config.page_size).await;
    Json(response).into_response()
}

pub async fn filter_options(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let db = match guard(&state, &headers) {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };
    Json(analytics::filter_options(db, state.config.page_size).await).into_response()
}

pub async fn exporter_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    exporter_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<UrlFilters>, QueryRejection>,
) -> Response {
    let db = match guard(&state, &headers) {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };
    let Path(exporter_id) = match exporter_id {
        Ok(id) => id,
        Err(rejection) => return bad_request(rejection.body_text()).into_response(),
    };
    let Query(url_filters) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection.body_text()).into_response(),
    };

    let filters = Filters::from(url_filters);
    match analytics::exporter_profile(db, exporter_id, &filters, state.config.page_size).await {
        Ok(Some(profile)) => Json(profile).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "EXPORTER_NOT_FOUND",
            format!("Exporter {exporter_id} not found."),
        )
        .into_response(),
        Err(err) => {
            error!(exporter_id, error = %err, "Exporter profile failed");
            internal(err.to_string()).into_response()
        }
    }
}

pub async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let db = match guard(&state, &headers) {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };
    Json(analytics::dashboard_summary(db).await).into_response()
}

pub async fn ai_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    if let Err(err) = verify_bearer(&headers, state.config.api_key.as_deref()) {
        return err.into_response();
    }
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return bad_request(rejection.body_text()).into_response(),
    };

    let lang = Lang::parse(request.lang.as_deref());
    let message = request.message.as_deref().map(str::trim).unwrap_or_default();
    if message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "MESSAGE_REQUIRED", "Message is required")
            .into_response();
    }
    let Some(db) = state.database.as_deref() else {
        return not_configured().into_response();
    };

    let request_id = Uuid::new_v4();
    let model = state.model.as_deref();
    let plan = router::route(model, message, lang).await;
    let result = executor::execute(db, &plan, lang, state.config.page_size).await;
    let history_turns = history_turns(request.history.as_ref());
    info!(
        %request_id,
        intent = plan.intent(),
        result_kind = result.kind.as_str(),
        rows = result.row_count(),
        history_turns,
        "Chat question answered"
    );

    if result.is_empty() {
        let reply = result
            .message
            .clone()
            .unwrap_or_else(|| lang.no_data().to_string());
        return Json(ChatResponse {
            reply,
            plan: Some(plan),
            result_kind: Some(result.kind),
            chart: None,
        })
        .into_response();
    }

    let reply = match model {
        Some(model) => match narrator::narrate(model, &plan, &result, lang).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(%request_id, error = %err, "Narration failed");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AI_ERROR",
                    lang.processing_error(),
                )
                .into_response();
            }
        },
        None => narrator::fallback_answer(&plan, &result, lang),
    };

    let chart = narrator::extract_chart(&reply);
    Json(ChatResponse {
        reply,
        plan: Some(plan),
        result_kind: Some(result.kind),
        chart,
    })
    .into_response()
}

fn history_turns(history: Option<&Value>) -> usize {
    history.and_then(Value::as_array).map_or(0, Vec::len)
}

fn returned_rows(value: &Value) -> usize {
    match value {
        Value::Array(rows) => rows.len(),
        Value::Null => 0,
        _ => 1,
    }
}

async fn check_rpc(db: &dyn Database, function: &str, args: Map<String, Value>) -> Value {
    match db.rpc(function, args).await {
        Ok(value) => json!({ "ok": true, "count": returned_rows(&value) }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    }
}

/// Connectivity report: a few exporter rows, the shipments view and the
/// main remote functions.
pub async fn ai_health(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let db = match guard(&state, &headers) {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };

    let sample = match db.select(&TableQuery::new("exporters", "id,name").limit(3)).await {
        Ok(rows) => rows,
        Err(err) => {
            error!(error = %err, "Health check could not read exporters");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let args = rpc_args(&Map::new(), RpcShape::Full);
    let mut timeseries_args = args.clone();
    timeseries_args.insert("p_granularity".to_string(), json!("month"));
    let mut tops_args = args.clone();
    tops_args.insert("p_top_type".to_string(), json!("exporters"));

    let view_query = TableQuery::new(SHIPMENTS_VIEW, "season_id").limit(1);
    let (view, kpis, tops, timeseries) = futures::join!(
        db.select(&view_query),
        check_rpc(db, "get_exporter_kpis", args.clone()),
        check_rpc(db, "get_exporter_tops", tops_args),
        check_rpc(db, "get_exporter_timeseries", timeseries_args),
    );

    let materialized_view = match view {
        Ok(rows) => json!({ "ok": true, "count": rows.len() }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    };

    Json(json!({
        "ok": true,
        "sample": sample,
        "materializedView": materialized_view,
        "rpcTests": {
            "get_exporter_kpis": kpis,
            "get_exporter_tops": tops,
            "get_exporter_timeseries": timeseries,
        },
        "model": {
            "configured": state.model.is_some(),
            "name": state.model.as_deref().map(|m| m.name().to_string()),
        }
    }))
    .into_response()
}
