use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{
    plan::{Plan, RankingsParams, SearchParams, TimeseriesParams, TopsParams},
    Lang,
};
use crate::{
    aggregate::rank_top_items,
    error::DbError,
    models::{ExporterRanking, Filters, NamedOption, RankingRow, ShipmentRow, TopRow},
    pagination::fetch_all_as,
    query::{
        filter_params, rpc_args, shipment_predicates, Predicate, RpcShape, TableQuery,
        SHIPMENTS_VIEW, SHIPMENT_KEY,
    },
    supabase::{decode_rows, decode_rpc_rows, Database},
};

const SEARCH_MATCH_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Kpis,
    Timeseries,
    Tops,
    Rankings,
    Search,
    Error,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kpis => "kpis",
            Self::Timeseries => "timeseries",
            Self::Tops => "tops",
            Self::Rankings => "rankings",
            Self::Search => "search",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResult {
    pub kind: ResultKind,
    pub data: Value,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanResult {
    fn ok(kind: ResultKind, data: Value, params: Value) -> Self {
        Self {
            kind,
            data: if data.is_null() { json!([]) } else { data },
            params,
            message: None,
            error: None,
        }
    }

    fn empty_search(params: Value, message: String) -> Self {
        Self {
            kind: ResultKind::Search,
            data: json!([]),
            params,
            message: Some(message),
            error: None,
        }
    }

    fn failed(params: Value, error: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::Error,
            data: json!([]),
            params,
            message: None,
            error: Some(error.into()),
        }
    }

    /// True when there is nothing to narrate.
    pub fn is_empty(&self) -> bool {
        match &self.data {
            Value::Array(rows) => rows.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    pub fn row_count(&self) -> usize {
        match &self.data {
            Value::Array(rows) => rows.len(),
            Value::Null => 0,
            _ => 1,
        }
    }
}

/// Runs the single query a plan names. Remote failures come back as an
/// `error` result rather than an `Err`.
pub async fn execute(db: &dyn Database, plan: &Plan, lang: Lang, page_size: usize) -> PlanResult {
    let params = plan.params_json();
    let outcome = match plan {
        Plan::Kpis { filters, .. } => kpis(db, filters, params.clone()).await,
        Plan::Timeseries { filters, params: p } => {
            timeseries(db, filters, p, params.clone()).await
        }
        Plan::Tops { filters, params: p } => tops(db, filters, p, params.clone()).await,
        Plan::Rankings { filters, params: p } => rankings(db, filters, p, params.clone()).await,
        Plan::Search { filters, params: p } => {
            search(db, filters, p, params.clone(), lang, page_size).await
        }
    };

    match outcome {
        Ok(result) => {
            info!(
                intent = plan.intent(),
                result_kind = result.kind.as_str(),
                rows = result.row_count(),
                "Plan executed"
            );
            result
        }
        Err(err) => {
            warn!(intent = plan.intent(), error = %err, "Plan execution failed");
            PlanResult::failed(params, err.to_string())
        }
    }
}

fn filter_args(filters: &Filters, shape: RpcShape) -> Map<String, Value> {
    rpc_args(&filter_params(filters), shape)
}

async fn kpis(db: &dyn Database, filters: &Filters, params: Value) -> Result<PlanResult, DbError> {
    let data = db
        .rpc("get_exporter_kpis", filter_args(filters, RpcShape::Full))
        .await?;
    Ok(PlanResult::ok(ResultKind::Kpis, data, params))
}

async fn timeseries(
    db: &dyn Database,
    filters: &Filters,
    p: &TimeseriesParams,
    params: Value,
) -> Result<PlanResult, DbError> {
    let mut args = filter_args(filters, RpcShape::Full);
    args.insert("p_granularity".to_string(), json!(p.granularity.as_str()));
    let data = db.rpc("get_exporter_timeseries", args).await?;
    Ok(PlanResult::ok(ResultKind::Timeseries, data, params))
}

async fn tops(
    db: &dyn Database,
    filters: &Filters,
    p: &TopsParams,
    params: Value,
) -> Result<PlanResult, DbError> {
    let mut args = filter_args(filters, RpcShape::Full);
    args.insert("p_top_type".to_string(), json!(p.top_type.as_str()));
    let rows: Vec<TopRow> =
        decode_rpc_rows("get_exporter_tops", db.rpc("get_exporter_tops", args).await?)?;
    let items = rank_top_items(rows, p.top_n);
    Ok(PlanResult::ok(ResultKind::Tops, json!(items), params))
}

async fn rankings(
    db: &dyn Database,
    filters: &Filters,
    p: &RankingsParams,
    params: Value,
) -> Result<PlanResult, DbError> {
    let value = db
        .rpc(
            "get_exporter_rankings",
            filter_args(filters, RpcShape::WithoutExporters),
        )
        .await?;
    let rows: Vec<RankingRow> = decode_rpc_rows("get_exporter_rankings", value)?;
    let rankings: Vec<ExporterRanking> = rows
        .into_iter()
        .map(ExporterRanking::from)
        .filter(|r| p.top_n.map_or(true, |n| r.rank as usize <= n))
        .collect();
    Ok(PlanResult::ok(ResultKind::Rankings, json!(rankings), params))
}

#[derive(Debug, Default, Serialize)]
struct Volume {
    kilograms: f64,
    boxes: f64,
}

impl Volume {
    fn add(&mut self, row: &ShipmentRow) {
        self.kilograms += row.kilograms;
        self.boxes += row.boxes;
    }
}

async fn search(
    db: &dyn Database,
    filters: &Filters,
    p: &SearchParams,
    params: Value,
    lang: Lang,
    page_size: usize,
) -> Result<PlanResult, DbError> {
    let Some(term) = p
        .search_term
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return Ok(PlanResult::failed(params, "No search term provided"));
    };

    let lookup = TableQuery::new("exporters", "id,name")
        .filter(Predicate::contains("name", term))
        .limit(SEARCH_MATCH_LIMIT);
    let matches: Vec<NamedOption> = decode_rows("exporters", db.select(&lookup).await?)?;
    if matches.is_empty() {
        return Ok(PlanResult::empty_search(params, lang.exporter_not_found(term)));
    }

    let exporter_ids: Vec<i64> = matches.iter().map(|e| e.id).collect();
    let scope = Filters {
        exporter_ids: None,
        ..filters.clone()
    };
    let query = TableQuery::new(SHIPMENTS_VIEW, "*")
        .filter(Predicate::in_ids("exporter_id", &exporter_ids))
        .filters(shipment_predicates(&scope))
        .order_by(SHIPMENT_KEY);
    let shipments: Vec<ShipmentRow> = fetch_all_as(db, &query, page_size).await?;
    if shipments.is_empty() {
        return Ok(PlanResult::empty_search(params, lang.no_shipments(term)));
    }

    let season_ids: BTreeSet<i64> = shipments.iter().filter_map(|s| s.season_id).collect();
    let market_ids: BTreeSet<i64> = shipments.iter().filter_map(|s| s.market_id).collect();
    let species_ids: BTreeSet<i64> = shipments.iter().filter_map(|s| s.species_id).collect();
    let weeks: BTreeSet<&str> = shipments
        .iter()
        .filter_map(|s| s.etd_week.as_deref())
        .collect();

    let (season_names, market_names, species_names) = futures::join!(
        lookup_names(db, "seasons", &season_ids),
        lookup_names(db, "markets", &market_ids),
        lookup_names(db, "species", &species_ids),
    );

    let mut total = Volume::default();
    let mut by_species: BTreeMap<String, Volume> = BTreeMap::new();
    let mut by_market: BTreeMap<String, Volume> = BTreeMap::new();
    for row in &shipments {
        total.add(row);
        by_species
            .entry(label(&species_names, row.species_id))
            .or_default()
            .add(row);
        by_market
            .entry(label(&market_names, row.market_id))
            .or_default()
            .add(row);
    }

    let seasons: Vec<String> = season_ids
        .iter()
        .map(|id| label(&season_names, Some(*id)))
        .collect();

    let data = json!({
        "exporter": matches[0],
        "matches": matches,
        "summary": {
            "total_kilograms": total.kilograms,
            "total_boxes": total.boxes,
            "seasons": seasons,
            "markets_count": market_ids.len(),
            "species_count": species_ids.len(),
            "weeks": weeks,
        },
        "by_species": by_species,
        "by_market": by_market,
        "shipment_count": shipments.len(),
    });
    Ok(PlanResult::ok(ResultKind::Search, data, params))
}

/// `id -> name` for a lookup table. A failed lookup only costs the names.
async fn lookup_names(db: &dyn Database, table: &str, ids: &BTreeSet<i64>) -> HashMap<i64, String> {
    if ids.is_empty() {
        return HashMap::new();
    }
    let ids: Vec<i64> = ids.iter().copied().collect();
    let query = TableQuery::new(table, "id,name").filter(Predicate::in_ids("id", &ids));
    let rows = match db.select(&query).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(table, error = %err, "Name lookup failed");
            return HashMap::new();
        }
    };
    match decode_rows::<NamedOption>(table, rows) {
        Ok(named) => named.into_iter().map(|n| (n.id, n.name)).collect(),
        Err(err) => {
            warn!(table, error = %err, "Name lookup returned unexpected rows");
            HashMap::new()
        }
    }
}

fn label(names: &HashMap<i64, String>, id: Option<i64>) -> String {
    match id {
        Some(id) => names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("ID: {id}")),
        None => "Unknown".to_string(),
    }
}
