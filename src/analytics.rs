use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::{
    aggregate::{
        apply_exporter_trends, mean_retention, rank_top_items, sort_by_volume, yoy_growth,
        ExporterAggregation,
    },
    error::DbError,
    models::{
        kg_per_box, ChartData, DashboardKpis, DashboardResponse, Distribution, ExporterKpi,
        ExporterProfile, ExporterRanking, ExportersResponse, FilterOptions, Filters, GlobalKpi,
        Granularity, Kpi, KpiSet, NamedOption, NamedValue, NamedVolume, RankingRow,
        RetentionRow, RpcKpiPayload, ShipmentRow, TimePoint, TopItem, TopRow, TopType,
        TotalsSource, YoyRow,
    },
    pagination::fetch_all_as,
    query::{
        filter_params, has_filters, rpc_args, shipment_predicates, Predicate, RpcShape, TableQuery,
        SHIPMENTS_TABLE, SHIPMENT_KEY,
    },
    supabase::{decode_rows, decode_rpc_rows, Database},
};

// Last known whole-dataset snapshot, served when no live totals exist.
pub const FALLBACK_KILOGRAMS: f64 = 35_549_711.0;
pub const FALLBACK_BOXES: f64 = 70_799_042.0;
pub const FALLBACK_IMPORTERS: u64 = 4_382;
pub const FALLBACK_VARIETIES: u64 = 1_500;
pub const FALLBACK_MARKET_COVERAGE: u64 = 107;

pub const DASHBOARD_FALLBACK_KILOGRAMS: f64 = 35_538_374.0;
pub const DASHBOARD_FALLBACK_BOXES: f64 = 70_644_423.0;
pub const DASHBOARD_FALLBACK_EXPORTERS: u64 = 1_200;

const EXPORTER_SCAN_COLUMNS: &str =
    "exporter_id,importer_id,variety_id,country_id,season_id,kilograms,boxes";
const PROFILE_SCAN_COLUMNS: &str = "season_id,kilograms,boxes";
const CHART_TOP_LIMIT: usize = 10;
const DASHBOARD_TOP_LIMIT: usize = 5;
const DASHBOARD_TREND_POINTS: usize = 12;
const NAME_LOOKUP_CHUNK: usize = 200;

const CHART_TOP_TYPES: [TopType; 5] = [
    TopType::Importers,
    TopType::Markets,
    TopType::Countries,
    TopType::Varieties,
    TopType::ArrivalPorts,
];

/// Rows of a set-returning remote function. A failed call is logged and
/// reads as no rows.
async fn rpc_rows<T: DeserializeOwned>(
    db: &dyn Database,
    function: &str,
    args: Map<String, Value>,
) -> Vec<T> {
    let result = match db.rpc(function, args).await {
        Ok(value) => decode_rpc_rows(function, value),
        Err(err) => Err(err),
    };
    match result {
        Ok(rows) => rows,
        Err(err) => {
            warn!(function, error = %err, "Remote aggregation failed; using empty result");
            Vec::new()
        }
    }
}

/// Single-object remote function result; arrays yield their first element.
async fn rpc_object<T: DeserializeOwned>(
    db: &dyn Database,
    function: &str,
    args: Map<String, Value>,
) -> Option<T> {
    let value = match db.rpc(function, args).await {
        Ok(value) => value,
        Err(err) => {
            warn!(function, error = %err, "Remote aggregation failed");
            return None;
        }
    };
    let value = match value {
        Value::Null => return None,
        Value::Array(rows) => rows.into_iter().next()?,
        other => other,
    };
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(function, error = %err, "Remote aggregation returned an unexpected shape");
            None
        }
    }
}

async fn top_items(
    db: &dyn Database,
    base_args: &Map<String, Value>,
    top_type: TopType,
    limit: usize,
) -> Vec<TopItem> {
    let mut args = base_args.clone();
    args.insert("p_top_type".to_string(), json!(top_type.as_str()));
    let rows: Vec<TopRow> = rpc_rows(db, "get_exporter_tops", args).await;
    rank_top_items(rows, limit)
}

async fn timeseries(
    db: &dyn Database,
    base_args: &Map<String, Value>,
    granularity: Granularity,
) -> Vec<TimePoint> {
    let mut args = base_args.clone();
    args.insert("p_granularity".to_string(), json!(granularity.as_str()));
    rpc_rows(db, "get_exporter_timeseries", args).await
}

async fn scan_exporters(
    db: &dyn Database,
    filters: &Filters,
    page_size: usize,
) -> Result<ExporterAggregation, DbError> {
    let query = TableQuery::new(SHIPMENTS_TABLE, EXPORTER_SCAN_COLUMNS)
        .filter(Predicate::not_null("exporter_id"))
        .filters(shipment_predicates(filters))
        .order_by(SHIPMENT_KEY);
    let rows: Vec<ShipmentRow> = fetch_all_as(db, &query, page_size).await?;
    Ok(ExporterAggregation::from_rows(&rows))
}

/// Exporter list and (when known) global totals, before trends are applied.
#[derive(Debug, Default)]
struct KpiBase {
    global: Option<GlobalKpi>,
    exporters: Vec<ExporterKpi>,
}

impl KpiBase {
    fn from_scan(aggregation: ExporterAggregation) -> Self {
        let totals = &aggregation.totals;
        let global = GlobalKpi {
            kpi: Kpi {
                kilograms: totals.kilograms,
                boxes: totals.boxes,
                kg_per_box: totals.kg_per_box(),
                importers_active: totals.importers,
                varieties_active: totals.varieties,
                ..Kpi::default()
            },
            market_coverage: totals.countries,
            totals_source: TotalsSource::Exact,
        };
        Self {
            global: Some(global),
            exporters: aggregation.exporters,
        }
    }

    fn from_rpc(payload: Option<RpcKpiPayload>) -> Self {
        let Some(payload) = payload else {
            return Self::default();
        };
        let global = payload.global.map(|g| GlobalKpi {
            kpi: Kpi {
                kilograms: g.kilograms,
                boxes: g.boxes,
                kg_per_box: kg_per_box(g.kilograms, g.boxes),
                importers_active: g.importers_active.max(0.0) as u64,
                varieties_active: g.varieties_active.max(0.0) as u64,
                ..Kpi::default()
            },
            market_coverage: FALLBACK_MARKET_COVERAGE,
            totals_source: TotalsSource::Rpc,
        });
        let mut exporters: Vec<ExporterKpi> = payload
            .exporters
            .into_iter()
            .filter_map(|e| e.into_kpi())
            .collect();
        sort_by_volume(&mut exporters);
        Self { global, exporters }
    }
}

pub fn fallback_global() -> GlobalKpi {
    GlobalKpi {
        kpi: Kpi {
            kilograms: FALLBACK_KILOGRAMS,
            boxes: FALLBACK_BOXES,
            kg_per_box: kg_per_box(FALLBACK_KILOGRAMS, FALLBACK_BOXES),
            importers_active: FALLBACK_IMPORTERS,
            varieties_active: FALLBACK_VARIETIES,
            ..Kpi::default()
        },
        market_coverage: FALLBACK_MARKET_COVERAGE,
        totals_source: TotalsSource::Fallback,
    }
}

/// Replaces placeholder exporter names with the ones in `exporters`.
/// Lookup failures keep the placeholders.
async fn resolve_exporter_names(db: &dyn Database, exporters: &mut [ExporterKpi]) {
    let ids: Vec<i64> = exporters.iter().map(|e| e.exporter_id).collect();
    let mut names: HashMap<i64, String> = HashMap::with_capacity(ids.len());

    for chunk in ids.chunks(NAME_LOOKUP_CHUNK) {
        let query = TableQuery::new("exporters", "id,name").filter(Predicate::in_ids("id", chunk));
        let rows = match db.select(&query).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "Exporter name lookup failed");
                return;
            }
        };
        match decode_rows::<NamedOption>("exporters", rows) {
            Ok(found) => names.extend(found.into_iter().map(|n| (n.id, n.name))),
            Err(err) => {
                warn!(error = %err, "Exporter name lookup returned unexpected rows");
                return;
            }
        }
    }

    for exporter in exporters.iter_mut() {
        if let Some(name) = names.remove(&exporter.exporter_id) {
            exporter.exporter_name = name;
        }
    }
}

fn season_bounds(filters: &Filters) -> Option<(i64, i64)> {
    let seasons = filters.season_ids.as_deref()?;
    if seasons.len() < 2 {
        return None;
    }
    let current = seasons.iter().copied().max()?;
    let previous = seasons.iter().copied().min()?;
    Some((current, previous))
}

fn trend_args(filters: &Filters, current: i64, previous: i64) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("p_current_season_id".to_string(), json!(current));
    args.insert("p_previous_season_id".to_string(), json!(previous));
    let exporters = filters
        .exporter_ids
        .as_ref()
        .filter(|ids| !ids.is_empty())
        .map(|ids| json!(ids))
        .unwrap_or(Value::Null);
    args.insert("p_exporter_ids".to_string(), exporters);
    args
}

/// `POST /api/exporters`: exporter KPIs plus every dashboard chart for the
/// filtered subset. Each remote branch degrades on its own.
pub async fn exporters_overview(
    db: &dyn Database,
    filters: &Filters,
    page_size: usize,
) -> ExportersResponse {
    let filtered = has_filters(filters);
    let params = filter_params(filters);
    let full_args = rpc_args(&params, RpcShape::Full);
    let ranking_args = rpc_args(&params, RpcShape::WithoutExporters);
    let seasons = season_bounds(filters);

    let base = async {
        if filtered {
            match scan_exporters(db, filters, page_size).await {
                Ok(aggregation) => KpiBase::from_scan(aggregation),
                Err(err) => {
                    warn!(error = %err, "Exact totals scan failed; falling back");
                    KpiBase::default()
                }
            }
        } else {
            KpiBase::from_rpc(rpc_object(db, "get_exporter_kpis", full_args.clone()).await)
        }
    };
    let series = timeseries(db, &full_args, filters.granularity.unwrap_or(Granularity::Month));
    let rankings = rpc_rows::<RankingRow>(db, "get_exporter_rankings", ranking_args);
    let tops = join_all(
        CHART_TOP_TYPES
            .iter()
            .map(|top_type| top_items(db, &full_args, *top_type, CHART_TOP_LIMIT)),
    );
    let yoy = async {
        match seasons {
            Some((current, previous)) => {
                rpc_rows::<YoyRow>(db, "get_exporter_yoy_growth", trend_args(filters, current, previous))
                    .await
            }
            None => Vec::new(),
        }
    };
    let retention = async {
        match seasons {
            Some((current, previous)) => {
                rpc_rows::<RetentionRow>(
                    db,
                    "get_exporter_importer_retention",
                    trend_args(filters, current, previous),
                )
                .await
            }
            None => Vec::new(),
        }
    };

    let (base, series, rankings, tops, yoy_rows, retention_rows) =
        futures::join!(base, series, rankings, tops, yoy, retention);

    let KpiBase { global, mut exporters } = base;
    resolve_exporter_names(db, &mut exporters).await;

    let growth = yoy_growth(&yoy_rows);
    apply_exporter_trends(&mut exporters, growth.as_ref(), &retention_rows);

    let mut global = global.unwrap_or_else(fallback_global);
    if let Some(growth) = &growth {
        global.kpi.yoy_kg = growth.global.kilograms;
        global.kpi.yoy_boxes = growth.global.boxes;
    }
    global.kpi.importers_retention = mean_retention(&retention_rows);

    let mut tops = tops.into_iter();
    let mut next_top = || tops.next().unwrap_or_default();
    let top_importers = next_top();
    let top_markets = next_top();
    let top_countries = next_top();
    let top_varieties = next_top();
    let arrival_ports = next_top();

    info!(
        filtered,
        exporters = exporters.len(),
        totals_source = ?global.totals_source,
        "Exporter overview computed"
    );

    ExportersResponse {
        kpis: KpiSet { global, exporters },
        charts: ChartData {
            timeseries: series,
            top_importers,
            top_markets,
            top_countries,
            top_varieties,
            transport_split: arrival_ports.clone(),
            arrival_ports,
            rankings: rankings.into_iter().map(ExporterRanking::from).collect(),
        },
    }
}

/// `GET /api/exporters/{id}`. `Ok(None)` when no exporter has that id.
pub async fn exporter_profile(
    db: &dyn Database,
    exporter_id: i64,
    filters: &Filters,
    page_size: usize,
) -> Result<Option<ExporterProfile>, DbError> {
    let lookup = TableQuery::new("exporters", "id,name")
        .filter(Predicate::eq("id", exporter_id))
        .limit(1);
    let Some(exporter) = decode_rows::<NamedOption>("exporters", db.select(&lookup).await?)?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };

    let scoped = filters.with_exporter(exporter_id);
    let args = rpc_args(&filter_params(&scoped), RpcShape::Full);
    let scan_query = TableQuery::new(SHIPMENTS_TABLE, PROFILE_SCAN_COLUMNS)
        .filters(shipment_predicates(&scoped))
        .order_by(SHIPMENT_KEY);

    let (rows, markets, countries, varieties, importers, ports) = futures::join!(
        fetch_all_as::<ShipmentRow>(db, &scan_query, page_size),
        top_items(db, &args, TopType::Markets, CHART_TOP_LIMIT),
        top_items(db, &args, TopType::Countries, CHART_TOP_LIMIT),
        top_items(db, &args, TopType::Varieties, CHART_TOP_LIMIT),
        top_items(db, &args, TopType::Importers, CHART_TOP_LIMIT),
        top_items(db, &args, TopType::ArrivalPorts, CHART_TOP_LIMIT),
    );
    let rows = rows?;

    let total_kilograms: f64 = rows.iter().map(|r| r.kilograms).sum();
    let total_boxes: f64 = rows.iter().map(|r| r.boxes).sum();
    let seasons: HashSet<i64> = rows.iter().filter_map(|r| r.season_id).collect();
    debug!(exporter_id, rows = rows.len(), "Exporter profile scanned");

    Ok(Some(ExporterProfile {
        id: exporter.id,
        name: exporter.name,
        total_kilograms,
        total_boxes,
        avg_kg_per_box: kg_per_box(total_kilograms, total_boxes),
        seasons_active: seasons.len() as u64,
        top_markets: markets,
        top_countries: countries,
        top_varieties: varieties,
        top_importers: importers,
        top_arrival_ports: ports,
    }))
}

async fn named_list(db: &dyn Database, table: &str, page_size: usize) -> Vec<NamedOption> {
    let query = TableQuery::new(table, "id,name")
        .order_by("name")
        .order_by("id");
    match fetch_all_as(db, &query, page_size).await {
        Ok(options) => options,
        Err(err) => {
            warn!(table, error = %err, "Filter option list unavailable");
            Vec::new()
        }
    }
}

/// `GET /api/exporters/options`: every filter dimension's `{id, name}` list.
pub async fn filter_options(db: &dyn Database, page_size: usize) -> FilterOptions {
    let (seasons, exporters, species, varieties, markets, countries, regions, transport, ports) = futures::join!(
        named_list(db, "seasons", page_size),
        named_list(db, "exporters", page_size),
        named_list(db, "species", page_size),
        named_list(db, "varieties", page_size),
        named_list(db, "markets", page_size),
        named_list(db, "countries", page_size),
        named_list(db, "regions", page_size),
        named_list(db, "transport_types", page_size),
        named_list(db, "arrival_ports", page_size),
    );
    FilterOptions {
        seasons,
        exporters,
        species,
        varieties,
        markets,
        countries,
        regions,
        transport_types: transport,
        arrival_ports: ports,
    }
}

fn named_values(items: Vec<TopItem>) -> Vec<NamedValue> {
    items
        .into_iter()
        .map(|item| NamedValue {
            name: item.name,
            value: item.kilograms,
        })
        .collect()
}

/// `GET /api/dashboard`: unfiltered headline numbers for the landing page.
pub async fn dashboard_summary(db: &dyn Database) -> DashboardResponse {
    let args = rpc_args(&Map::new(), RpcShape::Full);

    let (payload, series, varieties, markets) = futures::join!(
        rpc_object::<RpcKpiPayload>(db, "get_exporter_kpis", args.clone()),
        timeseries(db, &args, Granularity::Month),
        top_items(db, &args, TopType::Varieties, DASHBOARD_TOP_LIMIT),
        top_items(db, &args, TopType::Markets, DASHBOARD_TOP_LIMIT),
    );

    let KpiBase { global, exporters } = KpiBase::from_rpc(payload);
    let (total_kilograms, total_boxes, totals_source) = match &global {
        Some(g) => (g.kpi.kilograms, g.kpi.boxes, TotalsSource::Rpc),
        None => (
            DASHBOARD_FALLBACK_KILOGRAMS,
            DASHBOARD_FALLBACK_BOXES,
            TotalsSource::Fallback,
        ),
    };
    let average_per_exporter = if exporters.is_empty() {
        0.0
    } else {
        (total_kilograms / exporters.len() as f64).round()
    };
    let total_exporters = if exporters.is_empty() {
        DASHBOARD_FALLBACK_EXPORTERS
    } else {
        exporters.len() as u64
    };

    let skip = series.len().saturating_sub(DASHBOARD_TREND_POINTS);
    let trends: Vec<TimePoint> = series.into_iter().skip(skip).collect();

    DashboardResponse {
        kpis: DashboardKpis {
            total_exporters,
            total_kilograms: total_kilograms.round(),
            total_boxes: total_boxes.round(),
            average_per_exporter,
            totals_source,
        },
        top_exporters: exporters
            .into_iter()
            .take(DASHBOARD_TOP_LIMIT)
            .map(|e| NamedVolume {
                name: e.exporter_name,
                kilograms: e.kpi.kilograms,
                boxes: e.kpi.boxes,
            })
            .collect(),
        trends,
        distribution: Distribution {
            species: named_values(varieties),
            markets: named_values(markets),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supabase::testing::FakeDatabase;

    fn shipment(exporter: Option<i64>, species: i64, season: i64, kg: f64, boxes: f64) -> Value {
        json!({
            "exporter_id": exporter,
            "species_id": species,
            "season_id": season,
            "importer_id": 100 + season,
            "variety_id": species * 10,
            "country_id": season,
            "kilograms": kg,
            "boxes": boxes
        })
    }

    fn shipments() -> Vec<Value> {
        vec![
            shipment(Some(1), 15, 1, 100.0, 10.0),
            shipment(Some(2), 15, 2, 300.0, 30.0),
            shipment(Some(1), 15, 2, 50.0, 0.0),
            shipment(Some(2), 16, 1, 999.0, 99.0),
            shipment(None, 15, 1, 7.0, 1.0),
        ]
    }

    fn exporter_names() -> Vec<Value> {
        vec![
            json!({ "id": 1, "name": "DOLE-CHILE S.A." }),
            json!({ "id": 2, "name": "GREENVIC SPA" }),
        ]
    }

    fn species_filter() -> Filters {
        Filters {
            species_ids: Some(vec![15]),
            ..Filters::default()
        }
    }

    #[tokio::test]
    async fn filtered_overview_uses_exact_scan() {
        let db = FakeDatabase::new()
            .with_table(SHIPMENTS_TABLE, shipments())
            .with_table("exporters", exporter_names());

        let response = exporters_overview(&db, &species_filter(), 2).await;

        let global = &response.kpis.global;
        assert_eq!(global.totals_source, TotalsSource::Exact);
        assert_eq!(global.kpi.kilograms, 450.0);
        assert_eq!(global.kpi.boxes, 40.0);
        assert_eq!(global.kpi.importers_active, 2);
        assert_eq!(global.market_coverage, 2);

        let exporters = &response.kpis.exporters;
        assert_eq!(exporters.len(), 2);
        assert_eq!(exporters[0].exporter_name, "GREENVIC SPA");
        assert_eq!(exporters[0].kpi.kilograms, 300.0);
        assert_eq!(exporters[1].kpi.kilograms, 150.0);
        let sum: f64 = exporters.iter().map(|e| e.kpi.kilograms).sum();
        assert_eq!(sum, global.kpi.kilograms);

        assert_eq!(db.select_count(SHIPMENTS_TABLE), 2);
        assert!(db
            .select_orders(SHIPMENTS_TABLE)
            .iter()
            .all(|order| order == &[SHIPMENT_KEY]));
        assert!(db.rpc_args("get_exporter_kpis").is_empty());
    }

    #[tokio::test]
    async fn empty_filtered_scan_reports_zero_exact_totals() {
        let db = FakeDatabase::new().with_table(SHIPMENTS_TABLE, shipments());
        let filters = Filters {
            species_ids: Some(vec![99]),
            ..Filters::default()
        };

        let response = exporters_overview(&db, &filters, 1000).await;

        assert_eq!(response.kpis.global.totals_source, TotalsSource::Exact);
        assert_eq!(response.kpis.global.kpi.kilograms, 0.0);
        assert_eq!(response.kpis.global.kpi.kg_per_box, None);
        assert!(response.kpis.exporters.is_empty());
    }

    #[tokio::test]
    async fn failed_scan_falls_back_to_snapshot() {
        let db = FakeDatabase::new().failing(SHIPMENTS_TABLE);

        let response = exporters_overview(&db, &species_filter(), 1000).await;

        assert_eq!(response.kpis.global, fallback_global());
        assert!(response.kpis.exporters.is_empty());
    }

    #[tokio::test]
    async fn unfiltered_overview_reads_kpi_function() {
        let db = FakeDatabase::new().with_rpc(
            "get_exporter_kpis",
            json!({
                "global": { "kilograms": 1000, "boxes": 250, "importersActive": 12, "varietiesActive": 4 },
                "exporters": [
                    { "exporterId": 7, "exporterName": "SMALL", "kilograms": 100, "boxes": 10 },
                    { "exporterId": 8, "exporterName": "BIG", "kilograms": 900, "boxes": 240 }
                ]
            }),
        );

        let response = exporters_overview(&db, &Filters::default(), 1000).await;

        assert_eq!(response.kpis.global.totals_source, TotalsSource::Rpc);
        assert_eq!(response.kpis.global.kpi.kg_per_box, Some(4.0));
        assert_eq!(response.kpis.exporters[0].exporter_name, "BIG");
        assert_eq!(db.select_count(SHIPMENTS_TABLE), 0);
        let args = db.rpc_args("get_exporter_kpis");
        assert_eq!(args[0]["p_season_ids"], Value::Null);
    }

    #[tokio::test]
    async fn charts_request_every_top_type_and_mirror_ports() {
        let db = FakeDatabase::new().with_rpc(
            "get_exporter_tops",
            json!([
                { "id": 1, "name": "San Antonio", "kilograms": 75, "boxes": 5 },
                { "id": 2, "name": "Valparaíso", "kilograms": 25, "boxes": 5 }
            ]),
        );

        let response = exporters_overview(&db, &Filters::default(), 1000).await;

        let top_types: Vec<Value> = db
            .rpc_args("get_exporter_tops")
            .into_iter()
            .map(|args| args["p_top_type"].clone())
            .collect();
        assert_eq!(
            top_types,
            vec![
                json!("importers"),
                json!("markets"),
                json!("countries"),
                json!("varieties"),
                json!("arrival_ports")
            ]
        );
        assert_eq!(response.charts.arrival_ports[0].share_pct, 75.0);
        assert_eq!(response.charts.transport_split, response.charts.arrival_ports);
        assert_eq!(
            db.rpc_args("get_exporter_timeseries")[0]["p_granularity"],
            json!("month")
        );
    }

    #[tokio::test]
    async fn two_seasons_enable_growth_and_retention() {
        let db = FakeDatabase::new()
            .with_table(SHIPMENTS_TABLE, shipments())
            .with_rpc(
                "get_exporter_yoy_growth",
                json!([
                    { "exporter_id": 1, "current_kilograms": 150, "previous_kilograms": 100, "current_boxes": 10, "previous_boxes": 0 },
                    { "exporter_id": 2, "current_kilograms": 50, "previous_kilograms": 100, "current_boxes": 5, "previous_boxes": 5 }
                ]),
            )
            .with_rpc(
                "get_exporter_importer_retention",
                json!([
                    { "exporter_id": 1, "retention_rate": 0.5 },
                    { "exporter_id": 2, "retention_rate": 1.0 }
                ]),
            );
        let filters = Filters {
            season_ids: Some(vec![2, 1]),
            ..Filters::default()
        };

        let response = exporters_overview(&db, &filters, 1000).await;

        let args = db.rpc_args("get_exporter_yoy_growth");
        assert_eq!(args[0]["p_current_season_id"], json!(2));
        assert_eq!(args[0]["p_previous_season_id"], json!(1));
        assert_eq!(args[0]["p_exporter_ids"], Value::Null);

        let global = &response.kpis.global.kpi;
        assert_eq!(global.yoy_kg, Some(0.0));
        assert_eq!(global.importers_retention, Some(0.75));
        let first = response
            .kpis
            .exporters
            .iter()
            .find(|e| e.exporter_id == 1)
            .expect("exporter 1");
        assert_eq!(first.kpi.yoy_kg, Some(50.0));
        assert_eq!(first.kpi.yoy_boxes, None);
        assert_eq!(first.kpi.importers_retention, Some(0.5));
    }

    #[tokio::test]
    async fn single_season_skips_growth_calls() {
        let db = FakeDatabase::new().with_table(SHIPMENTS_TABLE, shipments());
        let filters = Filters {
            season_ids: Some(vec![1]),
            ..Filters::default()
        };
        let response = exporters_overview(&db, &filters, 1000).await;
        assert!(db.rpc_args("get_exporter_yoy_growth").is_empty());
        assert_eq!(response.kpis.global.kpi.yoy_kg, None);
    }

    #[tokio::test]
    async fn failing_branch_only_empties_itself() {
        let db = FakeDatabase::new()
            .failing("get_exporter_rankings")
            .with_rpc(
                "get_exporter_timeseries",
                json!([{ "period": "2024-01", "kilograms": 5, "boxes": 1 }]),
            );
        let response = exporters_overview(&db, &Filters::default(), 1000).await;
        assert!(response.charts.rankings.is_empty());
        assert_eq!(response.charts.timeseries.len(), 1);
        assert_eq!(response.kpis.global.totals_source, TotalsSource::Fallback);
    }

    #[tokio::test]
    async fn profile_totals_come_from_scoped_scan() {
        let db = FakeDatabase::new()
            .with_table(SHIPMENTS_TABLE, shipments())
            .with_table("exporters", exporter_names());

        let profile = exporter_profile(&db, 2, &Filters::default(), 1000)
            .await
            .expect("profile")
            .expect("exporter exists");

        assert_eq!(profile.name, "GREENVIC SPA");
        assert_eq!(profile.total_kilograms, 1299.0);
        assert_eq!(profile.total_boxes, 129.0);
        assert_eq!(profile.seasons_active, 2);
        let args = db.rpc_args("get_exporter_tops");
        assert_eq!(args.len(), 5);
        assert!(args.iter().all(|a| a["p_exporter_ids"] == json!([2])));
        assert_eq!(db.select_orders(SHIPMENTS_TABLE), vec![vec![SHIPMENT_KEY.to_string()]]);
    }

    #[tokio::test]
    async fn unknown_exporter_has_no_profile() {
        let db = FakeDatabase::new().with_table("exporters", exporter_names());
        let profile = exporter_profile(&db, 42, &Filters::default(), 1000)
            .await
            .expect("lookup");
        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn filter_options_are_sorted_and_degrade_per_list() {
        let db = FakeDatabase::new()
            .with_table(
                "markets",
                vec![
                    json!({ "id": 2, "name": "USA" }),
                    json!({ "id": 9, "name": "China" }),
                    json!({ "id": 1, "name": "China" }),
                ],
            )
            .failing("seasons");

        let options = filter_options(&db, 1000).await;

        assert!(options.seasons.is_empty());
        let markets: Vec<&str> = options.markets.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(markets, vec!["China", "China", "USA"]);
        let ids: Vec<i64> = options.markets.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 9, 2]);
        assert_eq!(db.select_orders("markets"), vec![vec!["name", "id"]]);
        assert!(options.arrival_ports.is_empty());
    }

    #[tokio::test]
    async fn dashboard_without_kpis_uses_snapshot() {
        let series: Vec<Value> = (1..=15)
            .map(|m| json!({ "period": format!("2024-{m:02}"), "kilograms": m, "boxes": m }))
            .collect();
        let db = FakeDatabase::new().with_rpc("get_exporter_timeseries", json!(series));

        let dashboard = dashboard_summary(&db).await;

        assert_eq!(dashboard.kpis.total_kilograms, DASHBOARD_FALLBACK_KILOGRAMS);
        assert_eq!(dashboard.kpis.total_exporters, DASHBOARD_FALLBACK_EXPORTERS);
        assert_eq!(dashboard.kpis.totals_source, TotalsSource::Fallback);
        assert_eq!(dashboard.kpis.average_per_exporter, 0.0);
        assert!(dashboard.top_exporters.is_empty());
        assert_eq!(dashboard.trends.len(), 12);
        assert_eq!(dashboard.trends[0].period, "2024-04");
    }

    #[tokio::test]
    async fn dashboard_reads_live_kpis() {
        let db = FakeDatabase::new()
            .with_rpc(
                "get_exporter_kpis",
                json!({
                    "global": { "kilograms": 900.4, "boxes": 90 },
                    "exporters": [
                        { "exporterId": 1, "exporterName": "A", "kilograms": 600, "boxes": 60 },
                        { "exporterId": 2, "exporterName": "B", "kilograms": 300, "boxes": 30 }
                    ]
                }),
            )
            .with_rpc(
                "get_exporter_tops",
                json!([{ "id": 3, "name": "Cherries", "kilograms": 10, "boxes": 1 }]),
            );

        let dashboard = dashboard_summary(&db).await;

        assert_eq!(dashboard.kpis.total_kilograms, 900.0);
        assert_eq!(dashboard.kpis.total_exporters, 2);
        assert_eq!(dashboard.kpis.average_per_exporter, 450.0);
        assert_eq!(dashboard.kpis.totals_source, TotalsSource::Rpc);
        assert_eq!(dashboard.top_exporters[0].name, "A");
        assert_eq!(dashboard.distribution.species[0].name, "Cherries");
        assert_eq!(dashboard.distribution.markets[0].value, 10.0);
    }
}
