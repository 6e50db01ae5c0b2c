use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Week,
    Month,
    Season,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
            Self::Season => "season",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Kilograms,
    Boxes,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kilograms => "kilograms",
            Self::Boxes => "boxes",
        }
    }
}

/// Dimension ranked by `get_exporter_tops`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopType {
    #[default]
    Exporters,
    Importers,
    Markets,
    Countries,
    Varieties,
    ArrivalPorts,
}

impl TopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exporters => "exporters",
            Self::Importers => "importers",
            Self::Markets => "markets",
            Self::Countries => "countries",
            Self::Varieties => "varieties",
            Self::ArrivalPorts => "arrival_ports",
        }
    }
}

/// Dashboard filter set. An absent or empty list never restricts its
/// dimension. The snake_case aliases are what the intent router's model
/// emits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default, alias = "season_ids", skip_serializing_if = "Option::is_none")]
    pub season_ids: Option<Vec<i64>>,
    #[serde(default, alias = "exporter_ids", skip_serializing_if = "Option::is_none")]
    pub exporter_ids: Option<Vec<i64>>,
    #[serde(default, alias = "species_ids", skip_serializing_if = "Option::is_none")]
    pub species_ids: Option<Vec<i64>>,
    #[serde(default, alias = "variety_ids", skip_serializing_if = "Option::is_none")]
    pub variety_ids: Option<Vec<i64>>,
    #[serde(default, alias = "market_ids", skip_serializing_if = "Option::is_none")]
    pub market_ids: Option<Vec<i64>>,
    #[serde(default, alias = "country_ids", skip_serializing_if = "Option::is_none")]
    pub country_ids: Option<Vec<i64>>,
    #[serde(default, alias = "region_ids", skip_serializing_if = "Option::is_none")]
    pub region_ids: Option<Vec<i64>>,
    #[serde(
        default,
        alias = "transport_type_ids",
        skip_serializing_if = "Option::is_none"
    )]
    pub transport_type_ids: Option<Vec<i64>>,
    #[serde(
        default,
        alias = "arrival_port_ids",
        skip_serializing_if = "Option::is_none"
    )]
    pub arrival_port_ids: Option<Vec<i64>>,
    #[serde(default, alias = "week_from", skip_serializing_if = "Option::is_none")]
    pub week_from: Option<String>,
    #[serde(default, alias = "week_to", skip_serializing_if = "Option::is_none")]
    pub week_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
}

impl Filters {
    pub fn with_exporter(&self, exporter_id: i64) -> Self {
        Self {
            exporter_ids: Some(vec![exporter_id]),
            ..self.clone()
        }
    }
}

/// Query-string form of [`Filters`]: comma-separated id lists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFilters {
    pub seasons: Option<String>,
    pub exporters: Option<String>,
    pub species: Option<String>,
    pub varieties: Option<String>,
    pub markets: Option<String>,
    pub countries: Option<String>,
    pub regions: Option<String>,
    pub transport: Option<String>,
    pub arrival_ports: Option<String>,
    pub week_from: Option<String>,
    pub week_to: Option<String>,
    pub granularity: Option<Granularity>,
    pub metric: Option<Metric>,
}

impl From<UrlFilters> for Filters {
    fn from(url: UrlFilters) -> Self {
        Self {
            season_ids: parse_id_list(url.seasons.as_deref()),
            exporter_ids: parse_id_list(url.exporters.as_deref()),
            species_ids: parse_id_list(url.species.as_deref()),
            variety_ids: parse_id_list(url.varieties.as_deref()),
            market_ids: parse_id_list(url.markets.as_deref()),
            country_ids: parse_id_list(url.countries.as_deref()),
            region_ids: parse_id_list(url.regions.as_deref()),
            transport_type_ids: parse_id_list(url.transport.as_deref()),
            arrival_port_ids: parse_id_list(url.arrival_ports.as_deref()),
            week_from: url.week_from.filter(|w| !w.trim().is_empty()),
            week_to: url.week_to.filter(|w| !w.trim().is_empty()),
            granularity: url.granularity,
            metric: url.metric,
        }
    }
}

pub fn parse_id_list(raw: Option<&str>) -> Option<Vec<i64>> {
    let ids: Vec<i64> = raw?
        .split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// One row of `unified_shipments`. Owned by the database; read only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRow {
    #[serde(default)]
    pub season_id: Option<i64>,
    #[serde(default)]
    pub etd_week: Option<String>,
    #[serde(default)]
    pub region_id: Option<i64>,
    #[serde(default)]
    pub market_id: Option<i64>,
    #[serde(default)]
    pub country_id: Option<i64>,
    #[serde(default)]
    pub transport_type_id: Option<i64>,
    #[serde(default)]
    pub species_id: Option<i64>,
    #[serde(default)]
    pub variety_id: Option<i64>,
    #[serde(default)]
    pub importer_id: Option<i64>,
    #[serde(default)]
    pub exporter_id: Option<i64>,
    #[serde(default)]
    pub arrival_port_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub boxes: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub kilograms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpi {
    pub kilograms: f64,
    pub boxes: f64,
    pub kg_per_box: Option<f64>,
    pub yoy_kg: Option<f64>,
    pub yoy_boxes: Option<f64>,
    pub importers_active: u64,
    pub importers_retention: Option<f64>,
    pub varieties_active: u64,
}

pub fn kg_per_box(kilograms: f64, boxes: f64) -> Option<f64> {
    if boxes > 0.0 {
        Some(kilograms / boxes)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterKpi {
    pub exporter_id: i64,
    pub exporter_name: String,
    #[serde(flatten)]
    pub kpi: Kpi,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalsSource {
    Exact,
    Rpc,
    #[default]
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalKpi {
    #[serde(flatten)]
    pub kpi: Kpi,
    pub market_coverage: u64,
    pub totals_source: TotalsSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopItem {
    pub id: i64,
    pub name: String,
    pub kilograms: f64,
    pub boxes: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    #[serde(default)]
    pub period: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub boxes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterRanking {
    pub exporter_id: i64,
    pub exporter_name: String,
    pub season_id: i64,
    pub season_name: String,
    pub kilograms: f64,
    pub boxes: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub timeseries: Vec<TimePoint>,
    pub top_importers: Vec<TopItem>,
    pub top_markets: Vec<TopItem>,
    pub top_countries: Vec<TopItem>,
    pub top_varieties: Vec<TopItem>,
    pub transport_split: Vec<TopItem>,
    pub arrival_ports: Vec<TopItem>,
    pub rankings: Vec<ExporterRanking>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSet {
    pub global: GlobalKpi,
    pub exporters: Vec<ExporterKpi>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportersResponse {
    pub kpis: KpiSet,
    pub charts: ChartData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterProfile {
    pub id: i64,
    pub name: String,
    pub total_kilograms: f64,
    pub total_boxes: f64,
    pub avg_kg_per_box: Option<f64>,
    pub seasons_active: u64,
    pub top_markets: Vec<TopItem>,
    pub top_countries: Vec<TopItem>,
    pub top_varieties: Vec<TopItem>,
    pub top_importers: Vec<TopItem>,
    pub top_arrival_ports: Vec<TopItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedOption {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub seasons: Vec<NamedOption>,
    pub exporters: Vec<NamedOption>,
    pub species: Vec<NamedOption>,
    pub varieties: Vec<NamedOption>,
    pub markets: Vec<NamedOption>,
    pub countries: Vec<NamedOption>,
    pub regions: Vec<NamedOption>,
    pub transport_types: Vec<NamedOption>,
    pub arrival_ports: Vec<NamedOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardKpis {
    pub total_exporters: u64,
    pub total_kilograms: f64,
    pub total_boxes: f64,
    pub average_per_exporter: f64,
    pub totals_source: TotalsSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedVolume {
    pub name: String,
    pub kilograms: f64,
    pub boxes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub species: Vec<NamedValue>,
    pub markets: Vec<NamedValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub kpis: DashboardKpis,
    pub top_exporters: Vec<NamedVolume>,
    pub trends: Vec<TimePoint>,
    pub distribution: Distribution,
}

// Row shapes returned by the remote aggregation functions. Every field is
// optional on the wire; missing numbers decode as zero.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopRow {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub boxes: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RankingRow {
    #[serde(default)]
    pub exporter_id: Option<i64>,
    #[serde(default)]
    pub exporter_name: Option<String>,
    #[serde(default)]
    pub season_id: Option<i64>,
    #[serde(default)]
    pub season_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub boxes: f64,
    #[serde(default)]
    pub rank: Option<u32>,
}

impl From<RankingRow> for ExporterRanking {
    fn from(row: RankingRow) -> Self {
        let exporter_id = row.exporter_id.unwrap_or_default();
        Self {
            exporter_id,
            exporter_name: row
                .exporter_name
                .unwrap_or_else(|| format!("Exporter {exporter_id}")),
            season_id: row.season_id.unwrap_or_default(),
            season_name: row.season_name.unwrap_or_else(|| "Unknown".to_string()),
            kilograms: row.kilograms,
            boxes: row.boxes,
            rank: row.rank.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct YoyRow {
    #[serde(default)]
    pub exporter_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub current_kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub previous_kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub current_boxes: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub previous_boxes: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionRow {
    #[serde(default)]
    pub exporter_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub retention_rate: f64,
}

/// `get_exporter_kpis` payload as the dashboard consumes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcKpiPayload {
    #[serde(default)]
    pub global: Option<RpcKpi>,
    #[serde(default)]
    pub exporters: Vec<RpcExporterKpi>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcKpi {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub boxes: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub importers_active: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub varieties_active: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcExporterKpi {
    #[serde(default, alias = "exporter_id")]
    pub exporter_id: Option<i64>,
    #[serde(default, alias = "exporter_name")]
    pub exporter_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub kilograms: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub boxes: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub importers_active: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub varieties_active: f64,
}

impl RpcExporterKpi {
    pub fn into_kpi(self) -> Option<ExporterKpi> {
        let exporter_id = self.exporter_id?;
        Some(ExporterKpi {
            exporter_id,
            exporter_name: self
                .exporter_name
                .unwrap_or_else(|| format!("Exporter {exporter_id}")),
            kpi: Kpi {
                kilograms: self.kilograms,
                boxes: self.boxes,
                kg_per_box: kg_per_box(self.kilograms, self.boxes),
                importers_active: self.importers_active.max(0.0) as u64,
                varieties_active: self.varieties_active.max(0.0) as u64,
                ..Kpi::default()
            },
        })
    }
}

pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Postgres `numeric` columns may arrive as JSON strings; nulls count as 0.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filters_accept_router_snake_case_keys() {
        let filters: Filters = serde_json::from_value(json!({
            "season_ids": [3],
            "speciesIds": [15],
            "transport_type_ids": [],
            "week_from": "2024-W01"
        }))
        .expect("filters");
        assert_eq!(filters.season_ids, Some(vec![3]));
        assert_eq!(filters.species_ids, Some(vec![15]));
        assert_eq!(filters.transport_type_ids, Some(vec![]));
        assert_eq!(filters.week_from.as_deref(), Some("2024-W01"));
    }

    #[test]
    fn filters_serialize_camel_case_and_skip_unset() {
        let filters = Filters {
            exporter_ids: Some(vec![1, 2]),
            ..Filters::default()
        };
        assert_eq!(
            serde_json::to_value(&filters).expect("json"),
            json!({ "exporterIds": [1, 2] })
        );
    }

    #[test]
    fn url_filters_drop_non_numeric_items() {
        let url = UrlFilters {
            seasons: Some("1, 2,x,,3".to_string()),
            exporters: Some("abc".to_string()),
            arrival_ports: Some("7".to_string()),
            week_from: Some(" ".to_string()),
            ..UrlFilters::default()
        };
        let filters = Filters::from(url);
        assert_eq!(filters.season_ids, Some(vec![1, 2, 3]));
        assert_eq!(filters.exporter_ids, None);
        assert_eq!(filters.arrival_port_ids, Some(vec![7]));
        assert_eq!(filters.week_from, None);
    }

    #[test]
    fn shipment_row_tolerates_string_and_null_numbers() {
        let row: ShipmentRow = serde_json::from_value(json!({
            "exporter_id": 4,
            "kilograms": "1250.5",
            "boxes": null
        }))
        .expect("row");
        assert_eq!(row.exporter_id, Some(4));
        assert_eq!(row.kilograms, 1250.5);
        assert_eq!(row.boxes, 0.0);
        assert_eq!(row.importer_id, None);
    }

    #[test]
    fn kg_per_box_is_none_without_boxes() {
        assert_eq!(kg_per_box(10.0, 0.0), None);
        assert_eq!(kg_per_box(10.0, 4.0), Some(2.5));
    }

    #[test]
    fn global_kpi_flattens_kpi_fields() {
        let global = GlobalKpi {
            kpi: Kpi {
                kilograms: 10.0,
                boxes: 5.0,
                kg_per_box: Some(2.0),
                ..Kpi::default()
            },
            market_coverage: 3,
            totals_source: TotalsSource::Exact,
        };
        let value = serde_json::to_value(&global).expect("json");
        assert_eq!(value["kilograms"], json!(10.0));
        assert_eq!(value["kgPerBox"], json!(2.0));
        assert_eq!(value["marketCoverage"], json!(3));
        assert_eq!(value["totalsSource"], json!("exact"));
    }
}
