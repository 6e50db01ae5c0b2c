use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::{
    gemini::TextModel,
    plan::{Plan, SearchParams, TimeseriesParams, TopsParams, DEFAULT_TOP_N},
    Lang,
};
use crate::models::{Filters, Granularity, Metric, TopType};

static KNOWN_EXPORTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(allegria|foods|dole|chile|greenvic|garcés|verfrut|tuniche)\b")
        .expect("known exporter pattern")
});

static COMPANY_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(exportadora|empresa|compañía|company|exporter)\b")
        .expect("company word pattern")
});

static TOPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(top|best|highest|mejores|principales)").expect("tops pattern")
});

static TOP_N_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btop\s+(\d{1,3})\b|\b(\d{1,3})\s+(?:mejores|principales)\b")
        .expect("top n pattern")
});

static TREND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(trend|over time|weekly|monthly|tendencia|semanal|mensual)")
        .expect("trend pattern")
});

static MONTHLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(monthly|mensual)").expect("monthly pattern"));

static MARKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(market|mercado)").expect("market pattern"));

static BOXES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(box|boxes|caja|cajas)\b").expect("boxes pattern"));

/// Capitalized words that open a question rather than name a company.
const LEADING_WORDS: &[&str] = &[
    "what", "which", "who", "how", "show", "give", "tell", "list", "data", "find", "top",
    "qué", "que", "cuál", "cual", "cuánto", "cuanto", "cómo", "como", "muestra", "muéstrame",
    "dame", "datos", "busca", "información", "informacion", "exportadora", "empresa",
    "company", "exporter",
];

const ROUTER_PROMPT_ES: &str = r#"Eres un router que convierte preguntas en español sobre exportaciones de fruta en un plan JSON.

Identifica la intención (kpis, tops, timeseries, rankings, search), los filtros mencionados
(temporadas, exportadores, especies, variedades, mercados, países, regiones, transporte) y
los parámetros (métrica, topN, topType, granularidad, search_term).
Si la pregunta nombra una empresa o exportador, usa "intent": "search" con su nombre en "search_term".

Responde SOLO con JSON válido con exactamente estas claves:
{"intent":"kpis|tops|timeseries|rankings|search",
 "filters":{"season_ids":[],"exporter_ids":[],"species_ids":[],"variety_ids":[],"market_ids":[],"country_ids":[],"region_ids":[],"transport_type_ids":[]},
 "params":{"metric":"kilograms|boxes","topN":5,"topType":"exporters|importers|markets|countries|varieties|arrival_ports","granularity":"week|month|season","search_term":"nombre"}}

Ejemplos:
"Top 5 exportadores por kilogramos" -> {"intent":"tops","filters":{},"params":{"metric":"kilograms","topType":"exporters","topN":5}}
"Datos de la exportadora Allegria Foods" -> {"intent":"search","filters":{},"params":{"search_term":"Allegria Foods","metric":"kilograms"}}
"Tendencias semanales en cajas" -> {"intent":"timeseries","filters":{},"params":{"metric":"boxes","granularity":"week"}}
"KPIs generales" -> {"intent":"kpis","filters":{},"params":{"metric":"kilograms"}}"#;

const ROUTER_PROMPT_EN: &str = r#"You are a router that turns English questions about fruit exports into a JSON plan.

Identify the intent (kpis, tops, timeseries, rankings, search), any filters mentioned
(seasons, exporters, species, varieties, markets, countries, regions, transport) and the
parameters (metric, topN, topType, granularity, search_term).
If the question names a specific company or exporter, use "intent": "search" with its name in "search_term".

Reply ONLY with valid JSON using exactly these keys:
{"intent":"kpis|tops|timeseries|rankings|search",
 "filters":{"season_ids":[],"exporter_ids":[],"species_ids":[],"variety_ids":[],"market_ids":[],"country_ids":[],"region_ids":[],"transport_type_ids":[]},
 "params":{"metric":"kilograms|boxes","topN":5,"topType":"exporters|importers|markets|countries|varieties|arrival_ports","granularity":"week|month|season","search_term":"name"}}

Examples:
"Top 3 markets by boxes" -> {"intent":"tops","filters":{},"params":{"metric":"boxes","topType":"markets","topN":3}}
"Data for exporter Allegria Foods" -> {"intent":"search","filters":{},"params":{"search_term":"Allegria Foods","metric":"kilograms"}}
"Monthly trend of kilograms" -> {"intent":"timeseries","filters":{},"params":{"metric":"kilograms","granularity":"month"}}
"General system KPIs" -> {"intent":"kpis","filters":{},"params":{"metric":"kilograms"}}"#;

pub fn router_prompt(question: &str, lang: Lang) -> String {
    let (label, instructions) = match lang {
        Lang::Es => ("PREGUNTA", ROUTER_PROMPT_ES),
        Lang::En => ("QUESTION", ROUTER_PROMPT_EN),
    };
    format!("{label}: {question}\n\n{instructions}")
}

/// Classifies `question` into a [`Plan`]. Never fails: an unavailable model,
/// a transport error or an undecodable reply all take the rule-based path.
pub async fn route(model: Option<&dyn TextModel>, question: &str, lang: Lang) -> Plan {
    let Some(model) = model else {
        debug!("No text model configured; using fallback router");
        return fallback_plan(question);
    };

    let reply = match model.generate(&router_prompt(question, lang)).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(model = model.name(), error = %err, "Router model call failed; using fallback");
            return fallback_plan(question);
        }
    };

    match decode_plan(&reply) {
        Ok(plan) => {
            info!(intent = plan.intent(), "Question routed by model");
            plan
        }
        Err(err) => {
            warn!(error = %err, "Router reply is not a valid plan; using fallback");
            fallback_plan(question)
        }
    }
}

/// Decodes the complete model reply as a plan. Only a surrounding Markdown
/// code fence is tolerated.
pub fn decode_plan(reply: &str) -> Result<Plan, serde_json::Error> {
    serde_json::from_str(strip_code_fence(reply))
}

pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`): up to the first newline, or the
    // leading tag when the whole fence sits on one line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn fallback_plan(question: &str) -> Plan {
    let metric = if BOXES_RE.is_match(question) {
        Metric::Boxes
    } else {
        Metric::Kilograms
    };

    if KNOWN_EXPORTER_RE.is_match(question) || COMPANY_WORD_RE.is_match(question) {
        return Plan::Search {
            filters: Filters::default(),
            params: SearchParams {
                search_term: Some(company_term(question)),
                metric,
            },
        };
    }

    if TOPS_RE.is_match(question) {
        let top_type = if MARKET_RE.is_match(question) {
            TopType::Markets
        } else {
            TopType::Exporters
        };
        return Plan::Tops {
            filters: Filters::default(),
            params: TopsParams {
                metric,
                top_type,
                top_n: top_n(question).unwrap_or(DEFAULT_TOP_N),
            },
        };
    }

    if TREND_RE.is_match(question) {
        let granularity = if MONTHLY_RE.is_match(question) {
            Granularity::Month
        } else {
            Granularity::Week
        };
        return Plan::Timeseries {
            filters: Filters::default(),
            params: TimeseriesParams {
                metric,
                granularity,
            },
        };
    }

    Plan::kpis(metric)
}

fn top_n(question: &str) -> Option<usize> {
    let captures = TOP_N_RE.captures(question)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

fn is_candidate(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
        && !LEADING_WORDS.contains(&word.to_lowercase().as_str())
}

/// Best guess at the company a question names: the first run of
/// capitalized words, then a known exporter keyword, then `"company"`.
fn company_term(question: &str) -> String {
    let words: Vec<&str> = question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '.'))
        .map(|w| w.trim_end_matches('.'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut candidates = words
        .iter()
        .enumerate()
        .filter(|(_, w)| is_candidate(w))
        .map(|(i, _)| i);

    // A capitalized first word is usually just the start of the sentence.
    let start = match candidates.next() {
        Some(0) => candidates.next().or(Some(0)),
        other => other,
    };

    if let Some(start) = start {
        let run: Vec<&str> = words[start..]
            .iter()
            .take_while(|w| is_candidate(w))
            .copied()
            .collect();
        return run.join(" ");
    }

    KNOWN_EXPORTER_RE
        .find(question)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "company".to_string())
}
