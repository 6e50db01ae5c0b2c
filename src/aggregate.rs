use std::collections::{HashMap, HashSet};

use crate::models::{
    kg_per_box, ExporterKpi, Kpi, RetentionRow, ShipmentRow, TopItem, TopRow, YoyRow,
};

#[derive(Debug, Default)]
struct ExporterAccumulator {
    kilograms: f64,
    boxes: f64,
    importers: HashSet<i64>,
    varieties: HashSet<i64>,
}

/// Global totals of one row scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanTotals {
    pub kilograms: f64,
    pub boxes: f64,
    pub importers: u64,
    pub varieties: u64,
    pub exporters: u64,
    pub countries: u64,
    pub seasons: u64,
}

impl ScanTotals {
    pub fn kg_per_box(&self) -> Option<f64> {
        kg_per_box(self.kilograms, self.boxes)
    }

    pub fn is_empty(&self) -> bool {
        self.exporters == 0
    }
}

/// Per-exporter and global KPIs folded from raw shipment rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExporterAggregation {
    pub exporters: Vec<ExporterKpi>,
    pub totals: ScanTotals,
}

impl ExporterAggregation {
    /// Single pass over `rows`; the result does not depend on row order.
    /// Rows without an exporter id are skipped.
    pub fn from_rows(rows: &[ShipmentRow]) -> Self {
        let mut per_exporter: HashMap<i64, ExporterAccumulator> = HashMap::new();
        let mut importers = HashSet::new();
        let mut varieties = HashSet::new();
        let mut countries = HashSet::new();
        let mut seasons = HashSet::new();
        let mut kilograms = 0.0;
        let mut boxes = 0.0;

        for row in rows {
            let Some(exporter_id) = row.exporter_id else {
                continue;
            };

            let acc = per_exporter.entry(exporter_id).or_default();
            acc.kilograms += row.kilograms;
            acc.boxes += row.boxes;
            kilograms += row.kilograms;
            boxes += row.boxes;

            if let Some(id) = row.importer_id {
                acc.importers.insert(id);
                importers.insert(id);
            }
            if let Some(id) = row.variety_id {
                acc.varieties.insert(id);
                varieties.insert(id);
            }
            if let Some(id) = row.country_id {
                countries.insert(id);
            }
            if let Some(id) = row.season_id {
                seasons.insert(id);
            }
        }

        let mut exporters: Vec<ExporterKpi> = per_exporter
            .into_iter()
            .map(|(exporter_id, acc)| ExporterKpi {
                exporter_id,
                exporter_name: format!("Exporter {exporter_id}"),
                kpi: Kpi {
                    kilograms: acc.kilograms,
                    boxes: acc.boxes,
                    kg_per_box: kg_per_box(acc.kilograms, acc.boxes),
                    importers_active: acc.importers.len() as u64,
                    varieties_active: acc.varieties.len() as u64,
                    ..Kpi::default()
                },
            })
            .collect();
        sort_by_volume(&mut exporters);

        let totals = ScanTotals {
            kilograms,
            boxes,
            importers: importers.len() as u64,
            varieties: varieties.len() as u64,
            exporters: exporters.len() as u64,
            countries: countries.len() as u64,
            seasons: seasons.len() as u64,
        };

        Self { exporters, totals }
    }
}

/// Kilograms descending, ties by exporter id.
pub fn sort_by_volume(exporters: &mut [ExporterKpi]) {
    exporters.sort_by(|a, b| {
        b.kpi
            .kilograms
            .total_cmp(&a.kpi.kilograms)
            .then(a.exporter_id.cmp(&b.exporter_id))
    });
}

/// Largest `limit` items by kilograms. Each share is relative to the
/// returned list, so a non-empty list with volume sums to 100.
pub fn rank_top_items(rows: Vec<TopRow>, limit: usize) -> Vec<TopItem> {
    let mut items: Vec<TopItem> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id?;
            Some(TopItem {
                id,
                name: row.name.unwrap_or_else(|| "Unknown".to_string()),
                kilograms: row.kilograms,
                boxes: row.boxes,
                share_pct: 0.0,
            })
        })
        .collect();

    items.sort_by(|a, b| b.kilograms.total_cmp(&a.kilograms).then(a.id.cmp(&b.id)));
    items.truncate(limit);

    let total: f64 = items.iter().map(|item| item.kilograms).sum();
    for item in &mut items {
        item.share_pct = if total > 0.0 {
            item.kilograms / total * 100.0
        } else {
            0.0
        };
    }
    items
}

/// Percentage change; `None` when there is no previous volume.
pub fn growth_pct(current: f64, previous: f64) -> Option<f64> {
    if previous > 0.0 {
        Some((current - previous) / previous * 100.0)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Growth {
    pub kilograms: Option<f64>,
    pub boxes: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct YoyGrowth {
    pub global: Growth,
    pub per_exporter: HashMap<i64, Growth>,
}

/// Folds season-over-season rows into global and per-exporter growth.
pub fn yoy_growth(rows: &[YoyRow]) -> Option<YoyGrowth> {
    if rows.is_empty() {
        return None;
    }

    let mut current_kg = 0.0;
    let mut previous_kg = 0.0;
    let mut current_boxes = 0.0;
    let mut previous_boxes = 0.0;
    let mut per_exporter = HashMap::new();

    for row in rows {
        current_kg += row.current_kilograms;
        previous_kg += row.previous_kilograms;
        current_boxes += row.current_boxes;
        previous_boxes += row.previous_boxes;

        if let Some(exporter_id) = row.exporter_id {
            per_exporter.insert(
                exporter_id,
                Growth {
                    kilograms: growth_pct(row.current_kilograms, row.previous_kilograms),
                    boxes: growth_pct(row.current_boxes, row.previous_boxes),
                },
            );
        }
    }

    Some(YoyGrowth {
        global: Growth {
            kilograms: growth_pct(current_kg, previous_kg),
            boxes: growth_pct(current_boxes, previous_boxes),
        },
        per_exporter,
    })
}

pub fn mean_retention(rows: &[RetentionRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let sum: f64 = rows.iter().map(|r| r.retention_rate).sum();
    Some(sum / rows.len() as f64)
}

/// Copies growth and retention onto the matching exporters.
pub fn apply_exporter_trends(
    exporters: &mut [ExporterKpi],
    yoy: Option<&YoyGrowth>,
    retention: &[RetentionRow],
) {
    let retention_by_exporter: HashMap<i64, f64> = retention
        .iter()
        .filter_map(|r| r.exporter_id.map(|id| (id, r.retention_rate)))
        .collect();

    for exporter in exporters.iter_mut() {
        if let Some(growth) = yoy.and_then(|y| y.per_exporter.get(&exporter.exporter_id)) {
            exporter.kpi.yoy_kg = growth.kilograms;
            exporter.kpi.yoy_boxes = growth.boxes;
        }
        if let Some(rate) = retention_by_exporter.get(&exporter.exporter_id) {
            exporter.kpi.importers_retention = Some(*rate);
        }
    }
}
