use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    executor::{PlanResult, ResultKind},
    gemini::TextModel,
    plan::Plan,
    Lang,
};
use crate::{
    error::ModelError,
    models::{number_from_value, Granularity, Metric},
};

pub const TRUNCATION_MARKER: &str = "…[truncated]";
pub const PLAN_CLIP_CHARS: usize = 2000;
pub const RESULT_CLIP_CHARS: usize = 3500;
pub const SAMPLE_ROWS: usize = 30;

const ANALYST_PROMPT_ES: &str = r#"Eres un analista experto de DataHub. Responde en español, de forma clara, profesional y detallada.

- Usa EXCLUSIVAMENTE los valores presentes en RESULT. No inventes números ni nombres.
- Para búsquedas de empresas (intent "search"): nombra la empresa completa, las temporadas exactas
  (por ejemplo "2024-2025"), los mercados y especies, los totales de kilogramos y cajas por especie
  y por mercado, y las semanas de envío. No calcules promedios salvo que se pidan.
- Para las demás intenciones: entrega de 2 a 4 hallazgos principales en viñetas.
- Al final sugiere UN gráfico con este formato EXACTO:
{"chart":{"type":"bar|line|pie|area","x":"exporter|market|season|week","y":"kilograms|boxes","title":"Título","description":"Descripción breve"}}
  "bar" compara especies, mercados o variedades; "line" muestra tendencias; "pie" distribuciones; "area" volúmenes acumulados."#;

const ANALYST_PROMPT_EN: &str = r#"You are an expert DataHub analyst. Answer in English, clearly, professionally and in detail.

- Use ONLY values present in RESULT. Do not invent numbers or names.
- For company searches (intent "search"): give the full company name, the exact seasons
  (e.g. "2024-2025"), the markets and species, kilogram and box totals by species and by market,
  and the shipping weeks. Do not compute averages unless asked.
- For every other intent: give 2 to 4 main findings as bullets.
- Finish by suggesting ONE chart in this EXACT format:
{"chart":{"type":"bar|line|pie|area","x":"exporter|market|season|week","y":"kilograms|boxes","title":"Title","description":"Short description"}}
  "bar" compares species, markets or varieties; "line" shows trends; "pie" distributions; "area" accumulated volumes."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSuggestion {
    #[serde(rename = "type")]
    pub kind: ChartType,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChartEnvelope {
    chart: ChartSuggestion,
}

/// Serializes `value`, keeping at most `max_chars` characters followed by
/// [`TRUNCATION_MARKER`] when it is longer.
pub fn clip_json<T: Serialize + ?Sized>(value: &T, max_chars: usize) -> String {
    let text = serde_json::to_string(value).unwrap_or_default();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text,
    }
}

pub fn analyst_prompt(lang: Lang) -> &'static str {
    match lang {
        Lang::Es => ANALYST_PROMPT_ES,
        Lang::En => ANALYST_PROMPT_EN,
    }
}

/// The bounded `PLAN`/`RESULT` block sent to the model.
pub fn narration_payload(plan: &Plan, result: &PlanResult) -> String {
    let sample = match &result.data {
        Value::Array(rows) => Value::Array(rows.iter().take(SAMPLE_ROWS).cloned().collect()),
        other => other.clone(),
    };
    let safe_result = json!({
        "kind": result.kind,
        "sample": sample,
        "params": result.params,
    });
    format!(
        "PLAN:\n{}\n\nRESULT:\n{}",
        clip_json(plan, PLAN_CLIP_CHARS),
        clip_json(&safe_result, RESULT_CLIP_CHARS)
    )
}

pub async fn narrate(
    model: &dyn TextModel,
    plan: &Plan,
    result: &PlanResult,
    lang: Lang,
) -> Result<String, ModelError> {
    let prompt = format!(
        "{}\n\n{}",
        analyst_prompt(lang),
        narration_payload(plan, result)
    );
    model.generate(&prompt).await
}

/// The last `{"chart": {...}}` object in `reply`, if it decodes.
pub fn extract_chart(reply: &str) -> Option<ChartSuggestion> {
    reply
        .match_indices('{')
        .map(|(start, _)| start)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|start| {
            serde_json::Deserializer::from_str(&reply[start..])
                .into_iter::<ChartEnvelope>()
                .next()
                .and_then(Result::ok)
                .map(|envelope| envelope.chart)
        })
}

/// Summary built from the result alone, used when no text model is
/// configured. Ends with a chart suggestion like a model reply would.
pub fn fallback_answer(plan: &Plan, result: &PlanResult, lang: Lang) -> String {
    let unit = plan_unit(plan);
    let mut lines: Vec<String> = Vec::new();

    match result.kind {
        ResultKind::Tops => {
            lines.push(localized(lang, "Principales resultados:", "Top results:").to_string());
            for row in rows(&result.data).iter().take(10) {
                lines.push(format!(
                    "* {}: {} {unit} ({:.1}%)",
                    text(row, "name"),
                    format_number(number(row, unit_key(unit))),
                    number(row, "sharePct"),
                ));
            }
        }
        ResultKind::Timeseries => {
            let points = rows(&result.data);
            lines.push(format!(
                "{} ({}):",
                localized(lang, "Evolución por período", "Trend by period"),
                points.len()
            ));
            for row in points.iter().take(12) {
                lines.push(format!(
                    "* {}: {} {unit}",
                    text(row, "period"),
                    format_number(number(row, unit_key(unit)))
                ));
            }
        }
        ResultKind::Rankings => {
            lines.push(localized(lang, "Ranking de exportadores:", "Exporter ranking:").to_string());
            for row in rows(&result.data).iter().take(10) {
                lines.push(format!(
                    "* #{} {} ({}): {} {unit}",
                    number(row, "rank"),
                    text(row, "exporterName"),
                    text(row, "seasonName"),
                    format_number(number(row, unit_key(unit)))
                ));
            }
        }
        ResultKind::Kpis => {
            let global = result
                .data
                .get("global")
                .or_else(|| result.data.as_array().and_then(|rows| rows.first()))
                .unwrap_or(&result.data);
            lines.push(localized(lang, "KPIs generales:", "General KPIs:").to_string());
            lines.push(format!(
                "* {}: {}",
                localized(lang, "Kilogramos", "Kilograms"),
                format_number(number(global, "kilograms"))
            ));
            lines.push(format!(
                "* {}: {}",
                localized(lang, "Cajas", "Boxes"),
                format_number(number(global, "boxes"))
            ));
            if let Some(exporters) = result.data.get("exporters").and_then(Value::as_array) {
                lines.push(format!(
                    "* {}: {}",
                    localized(lang, "Exportadores", "Exporters"),
                    exporters.len()
                ));
            }
        }
        ResultKind::Search => {
            let summary = result.data.get("summary").unwrap_or(&Value::Null);
            let seasons: Vec<&str> = summary
                .get("seasons")
                .and_then(Value::as_array)
                .map(|s| s.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            lines.push(format!(
                "{} {}:",
                localized(lang, "Resumen de", "Summary for"),
                result
                    .data
                    .get("exporter")
                    .map(|e| text(e, "name"))
                    .unwrap_or_default()
            ));
            lines.push(format!(
                "* {}: {} kg, {} {}",
                localized(lang, "Total", "Total"),
                format_number(number(summary, "total_kilograms")),
                format_number(number(summary, "total_boxes")),
                localized(lang, "cajas", "boxes")
            ));
            lines.push(format!(
                "* {}: {}",
                localized(lang, "Temporadas", "Seasons"),
                seasons.join(", ")
            ));
            lines.push(format!(
                "* {}: {}, {}: {}",
                localized(lang, "Mercados", "Markets"),
                number(summary, "markets_count"),
                localized(lang, "especies", "species"),
                number(summary, "species_count")
            ));
        }
        ResultKind::Error => return lang.processing_error().to_string(),
    }

    let chart = default_chart(plan, result.kind, unit, lang);
    let chart_json = serde_json::to_string(&ChartEnvelope { chart }).unwrap_or_default();
    format!("{}\n\n{chart_json}", lines.join("\n"))
}

fn default_chart(plan: &Plan, kind: ResultKind, unit: &str, lang: Lang) -> ChartSuggestion {
    let y = unit_key(unit).to_string();
    let (kind, x, title) = match kind {
        ResultKind::Timeseries => (
            ChartType::Line,
            match plan {
                Plan::Timeseries { params, .. } => params.granularity.as_str(),
                _ => Granularity::default().as_str(),
            },
            localized(lang, "Evolución temporal", "Trend over time"),
        ),
        ResultKind::Kpis => (
            ChartType::Pie,
            "exporter",
            localized(lang, "Distribución por exportador", "Share by exporter"),
        ),
        ResultKind::Search => (
            ChartType::Bar,
            "market",
            localized(lang, "Volumen por mercado", "Volume by market"),
        ),
        _ => (
            ChartType::Bar,
            "exporter",
            localized(lang, "Comparación de volúmenes", "Volume comparison"),
        ),
    };
    ChartSuggestion {
        kind,
        x: x.to_string(),
        y,
        title: title.to_string(),
        description: format!("{} ({})", title, plan.intent()),
    }
}

fn localized(lang: Lang, es: &'static str, en: &'static str) -> &'static str {
    match lang {
        Lang::Es => es,
        Lang::En => en,
    }
}

fn plan_unit(plan: &Plan) -> &'static str {
    let metric = match plan {
        Plan::Kpis { params, .. } => params.metric,
        Plan::Timeseries { params, .. } => params.metric,
        Plan::Tops { params, .. } => params.metric,
        Plan::Rankings { params, .. } => params.metric,
        Plan::Search { params, .. } => params.metric,
    };
    match metric {
        Metric::Kilograms => "kg",
        Metric::Boxes => "boxes",
    }
}

fn unit_key(unit: &str) -> &'static str {
    if unit == "kg" {
        "kilograms"
    } else {
        "boxes"
    }
}

fn rows(data: &Value) -> &[Value] {
    data.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn text(row: &Value, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn number(row: &Value, key: &str) -> f64 {
    row.get(key).and_then(number_from_value).unwrap_or(0.0)
}

/// Rounds to an integer and groups thousands with commas.
fn format_number(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ai::{
            gemini::testing::ScriptedModel,
            plan::{TimeseriesParams, TopsParams},
        },
        models::{Filters, Metric, TopType},
    };

    fn tops_plan() -> Plan {
        Plan::Tops {
            filters: Filters::default(),
            params: TopsParams {
                metric: Metric::Kilograms,
                top_type: TopType::Exporters,
                top_n: 5,
            },
        }
    }

    fn result(kind: ResultKind, data: Value) -> PlanResult {
        PlanResult {
            kind,
            data,
            params: json!({ "metric": "kilograms" }),
            message: None,
            error: None,
        }
    }

    #[test]
    fn long_payload_is_clipped_to_exact_length_plus_marker() {
        let rows: Vec<Value> = (0..200)
            .map(|i| json!({ "id": i, "name": format!("EXPORTER NUMBER {i:04}"), "kilograms": 1000 * i }))
            .collect();
        let payload = json!({ "kind": "tops", "sample": rows });
        assert!(serde_json::to_string(&payload).expect("json").len() > RESULT_CLIP_CHARS);

        let clipped = clip_json(&payload, RESULT_CLIP_CHARS);

        assert!(clipped.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            clipped.chars().count(),
            RESULT_CLIP_CHARS + TRUNCATION_MARKER.chars().count()
        );
        let kept: String = clipped.chars().take(RESULT_CLIP_CHARS).collect();
        assert!(serde_json::to_string(&payload).expect("json").starts_with(&kept));
    }

    #[test]
    fn short_payload_is_untouched() {
        assert_eq!(clip_json(&json!({ "a": 1 }), 100), r#"{"a":1}"#);
        assert_eq!(clip_json(&json!("ñandú"), 7), "\"ñandú\"");
    }

    #[test]
    fn payload_samples_thirty_rows() {
        let data: Vec<Value> = (0..45).map(|i| json!({ "id": i })).collect();
        let payload = narration_payload(&tops_plan(), &result(ResultKind::Tops, json!(data)));

        assert!(payload.starts_with("PLAN:\n{\"intent\":\"tops\""));
        assert!(payload.contains("\nRESULT:\n"));
        assert!(payload.contains(r#"{"id":29}"#));
        assert!(!payload.contains(r#"{"id":30}"#));
    }

    #[test]
    fn chart_is_taken_from_trailing_json() {
        let reply = "* DOLE: 1,000 kg\n\n{\"chart\":{\"type\":\"bar\",\"x\":\"exporter\",\"y\":\"kilograms\",\"title\":\"Top\",\"description\":\"d\"}}";
        let chart = extract_chart(reply).expect("chart");
        assert_eq!(chart.kind, ChartType::Bar);
        assert_eq!(chart.x, "exporter");
        assert_eq!(chart.title, "Top");
    }

    #[test]
    fn invalid_chart_is_discarded() {
        assert!(extract_chart("no chart here").is_none());
        assert!(extract_chart(r#"{"chart":{"type":"radar","x":"a","y":"b"}}"#).is_none());
        assert!(extract_chart(r#"{"chart":{"type":"line","x":"week""#).is_none());
    }

    #[test]
    fn fallback_answer_lists_tops_and_suggests_chart() {
        let data = json!([
            { "id": 1, "name": "DOLE-CHILE S.A.", "kilograms": 1434254.0, "boxes": 10, "sharePct": 60.0 },
            { "id": 2, "name": "GREENVIC SPA", "kilograms": 956169.3, "boxes": 5, "sharePct": 40.0 }
        ]);
        let answer = fallback_answer(&tops_plan(), &result(ResultKind::Tops, data), Lang::En);

        assert!(answer.starts_with("Top results:"));
        assert!(answer.contains("* DOLE-CHILE S.A.: 1,434,254 kg (60.0%)"));
        assert!(answer.contains("* GREENVIC SPA: 956,169 kg (40.0%)"));
        let chart = extract_chart(&answer).expect("chart");
        assert_eq!(chart.kind, ChartType::Bar);
        assert_eq!(chart.y, "kilograms");
    }

    #[test]
    fn fallback_timeseries_chart_follows_plan_granularity() {
        let plan = Plan::Timeseries {
            filters: Filters::default(),
            params: TimeseriesParams {
                metric: Metric::Boxes,
                granularity: Granularity::Month,
            },
        };
        let data = json!([{ "period": "2024-12", "kilograms": 10.0, "boxes": 2.0 }]);

        let answer = fallback_answer(&plan, &result(ResultKind::Timeseries, data), Lang::Es);

        assert!(answer.contains("* 2024-12: 2"));
        let chart = extract_chart(&answer).expect("chart");
        assert_eq!(chart.kind, ChartType::Line);
        assert_eq!(chart.x, "month");
        assert_eq!(chart.y, "boxes");
    }

    #[test]
    fn fallback_answer_for_errors_is_the_localized_error() {
        let answer = fallback_answer(&tops_plan(), &result(ResultKind::Error, json!([])), Lang::Es);
        assert_eq!(answer, Lang::Es.processing_error());
    }

    #[test]
    fn numbers_are_grouped() {
        assert_eq!(format_number(35_549_711.4), "35,549,711");
        assert_eq!(format_number(999.0), "999");
        assert_eq!(format_number(-1234.0), "-1,234");
        assert_eq!(format_number(0.0), "0");
    }

    #[tokio::test]
    async fn narrate_sends_prompt_and_payload() {
        let model = ScriptedModel::new(vec![Some("* finding")]);
        let reply = narrate(
            &model,
            &tops_plan(),
            &result(ResultKind::Tops, json!([{ "id": 1 }])),
            Lang::En,
        )
        .await
        .expect("reply");

        assert_eq!(reply, "* finding");
        let prompt = &model.prompts()[0];
        assert!(prompt.starts_with("You are an expert DataHub analyst."));
        assert!(prompt.contains("RESULT:\n{\"kind\":\"tops\""));
    }
}
