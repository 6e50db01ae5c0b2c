use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Filters, Granularity, Metric, TopType};

pub const DEFAULT_TOP_N: usize = 5;

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpisParams {
    #[serde(default)]
    pub metric: Metric,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesParams {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub granularity: Granularity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopsParams {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default, alias = "top_type")]
    pub top_type: TopType,
    #[serde(default = "default_top_n", alias = "top_n")]
    pub top_n: usize,
}

impl Default for TopsParams {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            top_type: TopType::default(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingsParams {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default, alias = "top_n", skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default, alias = "searchTerm", skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(default)]
    pub metric: Metric,
}

/// A routed chat question: which query to run, over which subset.
///
/// Decoded once from `{"intent", "filters", "params"}`; every key is
/// required so a half-formed model reply never reaches the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "lowercase")]
pub enum Plan {
    Kpis {
        filters: Filters,
        params: KpisParams,
    },
    Timeseries {
        filters: Filters,
        params: TimeseriesParams,
    },
    Tops {
        filters: Filters,
        params: TopsParams,
    },
    Rankings {
        filters: Filters,
        params: RankingsParams,
    },
    Search {
        filters: Filters,
        params: SearchParams,
    },
}

impl Plan {
    pub fn intent(&self) -> &'static str {
        match self {
            Self::Kpis { .. } => "kpis",
            Self::Timeseries { .. } => "timeseries",
            Self::Tops { .. } => "tops",
            Self::Rankings { .. } => "rankings",
            Self::Search { .. } => "search",
        }
    }

    pub fn filters(&self) -> &Filters {
        match self {
            Self::Kpis { filters, .. }
            | Self::Timeseries { filters, .. }
            | Self::Tops { filters, .. }
            | Self::Rankings { filters, .. }
            | Self::Search { filters, .. } => filters,
        }
    }

    pub fn params_json(&self) -> Value {
        let params = match self {
            Self::Kpis { params, .. } => serde_json::to_value(params),
            Self::Timeseries { params, .. } => serde_json::to_value(params),
            Self::Tops { params, .. } => serde_json::to_value(params),
            Self::Rankings { params, .. } => serde_json::to_value(params),
            Self::Search { params, .. } => serde_json::to_value(params),
        };
        params.unwrap_or(Value::Null)
    }

    pub fn kpis(metric: Metric) -> Self {
        Self::Kpis {
            filters: Filters::default(),
            params: KpisParams { metric },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_tops_with_defaults() {
        let plan: Plan = serde_json::from_value(json!({
            "intent": "tops",
            "filters": { "season_ids": [1] },
            "params": { "metric": "boxes" }
        }))
        .expect("plan");
        match plan {
            Plan::Tops { filters, params } => {
                assert_eq!(filters.season_ids, Some(vec![1]));
                assert_eq!(params.metric, Metric::Boxes);
                assert_eq!(params.top_type, TopType::Exporters);
                assert_eq!(params.top_n, 5);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn search_accepts_both_term_spellings() {
        let snake: Plan = serde_json::from_value(json!({
            "intent": "search", "filters": {}, "params": { "search_term": "Dole" }
        }))
        .expect("snake");
        let camel: Plan = serde_json::from_value(json!({
            "intent": "search", "filters": {}, "params": { "searchTerm": "Dole" }
        }))
        .expect("camel");
        assert_eq!(snake, camel);
    }

    #[test]
    fn missing_params_or_unknown_intent_is_rejected() {
        assert!(serde_json::from_value::<Plan>(json!({
            "intent": "kpis", "filters": {}
        }))
        .is_err());
        assert!(serde_json::from_value::<Plan>(json!({
            "intent": "forecast", "filters": {}, "params": {}
        }))
        .is_err());
    }

    #[test]
    fn serializes_with_intent_tag() {
        let value = serde_json::to_value(Plan::kpis(Metric::Kilograms)).expect("json");
        assert_eq!(
            value,
            json!({ "intent": "kpis", "filters": {}, "params": { "metric": "kilograms" } })
        );
    }
}
