use serde_json::{json, Map, Value};

use crate::models::Filters;

pub const SHIPMENTS_TABLE: &str = "unified_shipments";
pub const SHIPMENTS_VIEW: &str = "unified_shipments_mv";
/// Unique row key; paged scans sort on it so ranges never overlap or skip.
pub const SHIPMENT_KEY: &str = "id";

const WEEK_COLUMN: &str = "etd_week";

/// Argument keys every remote aggregation function accepts, in call order.
const RPC_FILTER_KEYS: [&str; 10] = [
    "p_season_ids",
    "p_exporter_ids",
    "p_species_ids",
    "p_variety_ids",
    "p_market_ids",
    "p_country_ids",
    "p_region_ids",
    "p_transport_type_ids",
    "p_week_from",
    "p_week_to",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    Eq,
    Gte,
    Lte,
    NotNull,
    ILike,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

impl Predicate {
    pub fn in_ids(column: &str, ids: &[i64]) -> Self {
        Self {
            column: column.to_string(),
            op: Operator::In,
            value: json!(ids),
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            op: Operator::Eq,
            value: value.into(),
        }
    }

    pub fn gte(column: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            op: Operator::Gte,
            value: Value::String(value.to_string()),
        }
    }

    pub fn lte(column: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            op: Operator::Lte,
            value: Value::String(value.to_string()),
        }
    }

    pub fn not_null(column: &str) -> Self {
        Self {
            column: column.to_string(),
            op: Operator::NotNull,
            value: Value::Null,
        }
    }

    /// Case-insensitive substring match.
    pub fn contains(column: &str, term: &str) -> Self {
        Self {
            column: column.to_string(),
            op: Operator::ILike,
            value: Value::String(term.to_string()),
        }
    }

    /// PostgREST filter expression, e.g. `in.(1,2)` or `gte.2024-W01`.
    pub fn render(&self) -> String {
        match self.op {
            Operator::In => {
                let items = self
                    .value
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .map(render_scalar)
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                format!("in.({items})")
            }
            Operator::Eq => format!("eq.{}", render_scalar(&self.value)),
            Operator::Gte => format!("gte.{}", render_scalar(&self.value)),
            Operator::Lte => format!("lte.{}", render_scalar(&self.value)),
            Operator::NotNull => "not.is.null".to_string(),
            Operator::ILike => format!("ilike.*{}*", render_scalar(&self.value)),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// A row-level read against one table or view.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub table: String,
    pub select: String,
    pub predicates: Vec<Predicate>,
    pub order: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TableQuery {
    pub fn new(table: &str, select: &str) -> Self {
        Self {
            table: table.to_string(),
            select: select.to_string(),
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// Appends an ascending sort key; later keys break ties.
    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push(column.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Inclusive row range `[from, to]`.
    pub fn range(&self, from: usize, to: usize) -> Self {
        let mut ranged = self.clone();
        ranged.offset = Some(from);
        ranged.limit = Some(to.saturating_sub(from) + 1);
        ranged
    }

    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.select.clone())];
        for predicate in &self.predicates {
            pairs.push((predicate.column.clone(), predicate.render()));
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self.order.iter().map(|c| format!("{c}.asc")).collect();
            pairs.push(("order".to_string(), order.join(",")));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        pairs
    }
}

/// Which filter arguments a remote function declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcShape {
    Full,
    /// `get_exporter_rankings` ranks every exporter and takes no exporter list.
    WithoutExporters,
}

fn non_empty(list: &Option<Vec<i64>>) -> Option<&[i64]> {
    list.as_deref().filter(|ids| !ids.is_empty())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Remote function parameters: one key per restricted dimension only.
pub fn filter_params(filters: &Filters) -> Map<String, Value> {
    let mut params = Map::new();
    let lists = [
        ("p_season_ids", &filters.season_ids),
        ("p_exporter_ids", &filters.exporter_ids),
        ("p_species_ids", &filters.species_ids),
        ("p_variety_ids", &filters.variety_ids),
        ("p_market_ids", &filters.market_ids),
        ("p_country_ids", &filters.country_ids),
        ("p_region_ids", &filters.region_ids),
        ("p_transport_type_ids", &filters.transport_type_ids),
        ("p_arrival_port_ids", &filters.arrival_port_ids),
    ];
    for (key, list) in lists {
        if let Some(ids) = non_empty(list) {
            params.insert(key.to_string(), json!(ids));
        }
    }
    if let Some(week) = non_blank(&filters.week_from) {
        params.insert("p_week_from".to_string(), json!(week));
    }
    if let Some(week) = non_blank(&filters.week_to) {
        params.insert("p_week_to".to_string(), json!(week));
    }
    params
}

pub fn has_filters(filters: &Filters) -> bool {
    !filter_params(filters).is_empty()
}

/// Null-filled argument object for a remote aggregation call.
pub fn rpc_args(params: &Map<String, Value>, shape: RpcShape) -> Map<String, Value> {
    let mut args = Map::new();
    for key in RPC_FILTER_KEYS {
        if shape == RpcShape::WithoutExporters && key == "p_exporter_ids" {
            continue;
        }
        let value = params.get(key).cloned().unwrap_or(Value::Null);
        args.insert(key.to_string(), value);
    }
    args
}

/// Row-level predicates for the exact-totals table scan.
pub fn shipment_predicates(filters: &Filters) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    let lists = [
        ("season_id", &filters.season_ids),
        ("exporter_id", &filters.exporter_ids),
        ("species_id", &filters.species_ids),
        ("variety_id", &filters.variety_ids),
        ("market_id", &filters.market_ids),
        ("country_id", &filters.country_ids),
        ("region_id", &filters.region_ids),
        ("transport_type_id", &filters.transport_type_ids),
    ];
    for (column, list) in lists {
        if let Some(ids) = non_empty(list) {
            predicates.push(Predicate::in_ids(column, ids));
        }
    }
    if let Some(week) = non_blank(&filters.week_from) {
        predicates.push(Predicate::gte(WEEK_COLUMN, week));
    }
    if let Some(week) = non_blank(&filters.week_to) {
        predicates.push(Predicate::lte(WEEK_COLUMN, week));
    }
    predicates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_produce_no_params() {
        let filters = Filters {
            season_ids: Some(vec![]),
            exporter_ids: Some(vec![]),
            week_from: Some(String::new()),
            ..Filters::default()
        };
        assert!(filter_params(&filters).is_empty());
        assert!(filter_params(&Filters::default()).is_empty());
        assert!(!has_filters(&filters));
    }

    #[test]
    fn params_only_include_restricted_dimensions() {
        let filters = Filters {
            season_ids: Some(vec![3]),
            arrival_port_ids: Some(vec![9, 10]),
            week_to: Some("2025-W20".to_string()),
            ..Filters::default()
        };
        let params = filter_params(&filters);
        assert_eq!(params.len(), 3);
        assert_eq!(params["p_season_ids"], json!([3]));
        assert_eq!(params["p_arrival_port_ids"], json!([9, 10]));
        assert_eq!(params["p_week_to"], json!("2025-W20"));
        assert!(has_filters(&filters));
    }

    #[test]
    fn rpc_args_fill_every_key_with_null() {
        let filters = Filters {
            species_ids: Some(vec![15]),
            ..Filters::default()
        };
        let args = rpc_args(&filter_params(&filters), RpcShape::Full);
        assert_eq!(args.len(), RPC_FILTER_KEYS.len());
        assert_eq!(args["p_species_ids"], json!([15]));
        assert_eq!(args["p_season_ids"], Value::Null);
        assert!(!args.contains_key("p_arrival_port_ids"));

        let ranking_args = rpc_args(&filter_params(&filters), RpcShape::WithoutExporters);
        assert!(!ranking_args.contains_key("p_exporter_ids"));
        assert_eq!(ranking_args.len(), RPC_FILTER_KEYS.len() - 1);
    }

    #[test]
    fn shipment_predicates_cover_lists_and_week_bounds() {
        let filters = Filters {
            exporter_ids: Some(vec![1, 2]),
            arrival_port_ids: Some(vec![5]),
            week_from: Some("2024-W01".to_string()),
            week_to: Some("garbage".to_string()),
            ..Filters::default()
        };
        let predicates = shipment_predicates(&filters);
        assert_eq!(
            predicates,
            vec![
                Predicate::in_ids("exporter_id", &[1, 2]),
                Predicate::gte("etd_week", "2024-W01"),
                Predicate::lte("etd_week", "garbage"),
            ]
        );
    }

    #[test]
    fn predicates_render_postgrest_syntax() {
        assert_eq!(Predicate::in_ids("season_id", &[1, 2]).render(), "in.(1,2)");
        assert_eq!(Predicate::gte("etd_week", "2024-W01").render(), "gte.2024-W01");
        assert_eq!(Predicate::lte("etd_week", "2024-W09").render(), "lte.2024-W09");
        assert_eq!(Predicate::not_null("exporter_id").render(), "not.is.null");
        assert_eq!(Predicate::contains("name", "dole").render(), "ilike.*dole*");
        assert_eq!(Predicate::eq("id", 4).render(), "eq.4");
    }

    #[test]
    fn range_sets_inclusive_window() {
        let query = TableQuery::new(SHIPMENTS_TABLE, "kilograms,boxes")
            .filter(Predicate::not_null("exporter_id"))
            .order_by(SHIPMENT_KEY);
        let page = query.range(1000, 1999);
        assert_eq!(page.offset, Some(1000));
        assert_eq!(page.limit, Some(1000));
        assert_eq!(
            page.to_query_pairs(),
            vec![
                ("select".to_string(), "kilograms,boxes".to_string()),
                ("exporter_id".to_string(), "not.is.null".to_string()),
                ("order".to_string(), "id.asc".to_string()),
                ("limit".to_string(), "1000".to_string()),
                ("offset".to_string(), "1000".to_string()),
            ]
        );
    }

    #[test]
    fn order_keys_render_in_sequence() {
        let query = TableQuery::new("markets", "id,name")
            .order_by("name")
            .order_by("id");
        assert_eq!(
            query.to_query_pairs().last(),
            Some(&("order".to_string(), "name.asc,id.asc".to_string()))
        );
    }
}
