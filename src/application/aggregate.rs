use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::{CompetitionState, Measure, TechSides};
use crate::domain::mseg::{BreakoutTree, TechSide};
use crate::domain::value::{NumValue, Year, YearSeries};

/// Which energy accounting the measure set was prepared under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyAccounting {
    Site,
    #[default]
    FossilEquivalent,
    CapturedEnergy,
}

/// Mean and 5th/95th-percentile values of one output stream by year.
/// The percentile bands are present only when the stream carried samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryBand {
    pub mean: BTreeMap<Year, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<BTreeMap<Year, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<BTreeMap<Year, f64>>,
}

impl SummaryBand {
    pub fn from_series(series: &YearSeries) -> Self {
        let sampled = series.iter().any(|(_, v)| matches!(v, NumValue::Samples(_)));
        let mean = series.iter().map(|(y, v)| (y, v.mean())).collect();
        if sampled {
            SummaryBand {
                mean,
                low: Some(series.iter().map(|(y, v)| (y, v.percentile(5))).collect()),
                high: Some(series.iter().map(|(y, v)| (y, v.percentile(95))).collect()),
            }
        } else {
            SummaryBand {
                mean,
                low: None,
                high: None,
            }
        }
    }
}

/// Per-year results partitioned by climate zone, building class, and
/// end-use category.
pub type CategoryTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<Year, f64>>>>;

/// Baseline/efficient markets and savings for energy, carbon, and their
/// costs, summarized over any input samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketsAndSavings {
    pub baseline_energy: SummaryBand,
    pub baseline_carbon: SummaryBand,
    pub baseline_energy_cost: SummaryBand,
    pub baseline_carbon_cost: SummaryBand,
    pub efficient_energy: SummaryBand,
    pub efficient_carbon: SummaryBand,
    pub efficient_energy_cost: SummaryBand,
    pub efficient_carbon_cost: SummaryBand,
    pub energy_savings: SummaryBand,
    pub energy_cost_savings: SummaryBand,
    pub carbon_savings: SummaryBand,
    pub carbon_cost_savings: SummaryBand,
    /// Captured fraction of the total addressable stock, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_penetration: Option<SummaryBand>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostEffectiveness {
    pub cce: SummaryBand,
    pub cce_with_carbon_benefits: SummaryBand,
    pub ccc: SummaryBand,
    pub ccc_with_energy_benefits: SummaryBand,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioSummary {
    pub uncompeted: CostEffectiveness,
    pub competed: CostEffectiveness,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumerSummary {
    pub irr_energy: SummaryBand,
    pub irr_energy_carbon: SummaryBand,
    pub payback_energy: SummaryBand,
    pub payback_energy_carbon: SummaryBand,
}

/// Reporting categories a measure belongs to, used to filter results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterVariables {
    pub climate_zones: Vec<String>,
    pub building_classes: Vec<String>,
    pub end_uses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasureSummary {
    pub filters: FilterVariables,
    pub overall: BTreeMap<AdoptScheme, MarketsAndSavings>,
    pub by_category: BTreeMap<AdoptScheme, BTreeMap<String, CategoryTree>>,
    pub portfolio: BTreeMap<AdoptScheme, PortfolioSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ConsumerSummary>,
}

/// Summarized results per measure and across the full measure set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineOutput {
    pub energy_accounting: EnergyAccounting,
    pub measures: BTreeMap<String, MeasureSummary>,
    pub totals: BTreeMap<AdoptScheme, MarketsAndSavings>,
}

const STREAM_LABELS: [&str; 12] = [
    "baseline_energy",
    "baseline_carbon",
    "baseline_energy_cost",
    "baseline_carbon_cost",
    "efficient_energy",
    "efficient_carbon",
    "efficient_energy_cost",
    "efficient_carbon_cost",
    "energy_savings",
    "energy_cost_savings",
    "carbon_savings",
    "carbon_cost_savings",
];

/// Summarize one scenario's competed results for every measure and
/// accumulate the cross-measure totals.
pub(crate) fn finalize(
    measures: &[Measure],
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
    output: &mut EngineOutput,
) -> Result<(), EngineError> {
    info!(?scheme, "summarizing measure results");
    let mut totals: Vec<YearSeries> = (0..STREAM_LABELS.len())
        .map(|_| YearSeries::constant(cfg.years(), 0.0))
        .collect();

    for measure in measures {
        let not_ready = || EngineError::ResultsNotReady {
            name: measure.name.clone(),
        };
        let markets = measure.market(scheme)?;
        let competed = &markets.competed;
        let savings = measure.savings[&scheme]
            .get(CompetitionState::Competed)
            .as_ref()
            .ok_or_else(not_ready)?;
        let portfolio_pair = &measure.portfolio_metrics[&scheme];
        let port_uncompeted = portfolio_pair
            .get(CompetitionState::Uncompeted)
            .as_ref()
            .ok_or_else(not_ready)?;
        let port_competed = portfolio_pair
            .get(CompetitionState::Competed)
            .as_ref()
            .ok_or_else(not_ready)?;
        let consumer = measure.consumer_metrics.as_ref().ok_or_else(not_ready)?;

        let master = &competed.master;
        let streams: [&YearSeries; 12] = [
            &master.energy.total.baseline,
            &master.carbon.total.baseline,
            &master.cost.energy.total.baseline,
            &master.cost.carbon.total.baseline,
            &master.energy.total.efficient,
            &master.carbon.total.efficient,
            &master.cost.energy.total.efficient,
            &master.cost.carbon.total.efficient,
            &savings.energy.savings_total,
            &savings.energy.cost.total,
            &savings.carbon.savings_total,
            &savings.carbon.cost.total,
        ];
        for (acc, stream) in totals.iter_mut().zip(streams.iter()) {
            acc.add_series(stream);
        }

        // Stock penetration: competed captured stock over the total
        // addressable (uncompeted) stock.
        let penetration: YearSeries = cfg
            .years()
            .map(|yr| {
                let frac = master.stock.total.captured[yr]
                    .div_or_zero(&markets.uncompeted.master.stock.total.all[yr]);
                (yr, (&frac * 100.0).map(|x| (x * 10.0).round() / 10.0))
            })
            .collect();

        let overall = markets_and_savings(&streams, Some(SummaryBand::from_series(&penetration)));

        // Partition the summarized streams by reporting category using the
        // post-competition breakout trees.
        let base_frac = fraction_tree(&competed.out_break.baseline, &overall.baseline_energy.mean);
        let eff_frac = fraction_tree(&competed.out_break.efficient, &overall.efficient_energy.mean);
        let norm_save: BTreeMap<Year, f64> = cfg
            .years()
            .map(|yr| {
                let base = overall.baseline_energy.mean.get(&yr).copied().unwrap_or(0.0);
                let eff = overall.efficient_energy.mean.get(&yr).copied().unwrap_or(0.0);
                (yr, base - eff)
            })
            .collect();
        let save_frac = fraction_tree(&competed.out_break.savings, &norm_save);

        let mut by_category = BTreeMap::new();
        for (label, stream) in STREAM_LABELS.iter().zip(streams.iter()) {
            let frac = if label.starts_with("baseline") {
                &base_frac
            } else if label.starts_with("efficient") {
                &eff_frac
            } else {
                &save_frac
            };
            let mean: BTreeMap<Year, f64> = stream.iter().map(|(y, v)| (y, v.mean())).collect();
            by_category.insert(label.to_string(), apply_fractions(frac, &mean));
        }

        let summary = output
            .measures
            .entry(measure.name.clone())
            .or_insert_with(|| MeasureSummary {
                filters: filter_variables(cfg, measure),
                ..MeasureSummary::default()
            });
        summary.overall.insert(scheme, overall);
        summary.by_category.insert(scheme, by_category);
        summary.portfolio.insert(
            scheme,
            PortfolioSummary {
                uncompeted: cost_effectiveness(port_uncompeted),
                competed: cost_effectiveness(port_competed),
            },
        );
        summary.consumer.get_or_insert_with(|| ConsumerSummary {
            irr_energy: SummaryBand::from_series(&consumer.irr_energy),
            irr_energy_carbon: SummaryBand::from_series(&consumer.irr_energy_carbon),
            payback_energy: SummaryBand::from_series(&consumer.payback_energy),
            payback_energy_carbon: SummaryBand::from_series(&consumer.payback_energy_carbon),
        });
    }

    let total_refs: [&YearSeries; 12] = std::array::from_fn(|i| &totals[i]);
    output.totals.insert(scheme, markets_and_savings(&total_refs, None));
    Ok(())
}

fn markets_and_savings(
    streams: &[&YearSeries; 12],
    stock_penetration: Option<SummaryBand>,
) -> MarketsAndSavings {
    MarketsAndSavings {
        baseline_energy: SummaryBand::from_series(streams[0]),
        baseline_carbon: SummaryBand::from_series(streams[1]),
        baseline_energy_cost: SummaryBand::from_series(streams[2]),
        baseline_carbon_cost: SummaryBand::from_series(streams[3]),
        efficient_energy: SummaryBand::from_series(streams[4]),
        efficient_carbon: SummaryBand::from_series(streams[5]),
        efficient_energy_cost: SummaryBand::from_series(streams[6]),
        efficient_carbon_cost: SummaryBand::from_series(streams[7]),
        energy_savings: SummaryBand::from_series(streams[8]),
        energy_cost_savings: SummaryBand::from_series(streams[9]),
        carbon_savings: SummaryBand::from_series(streams[10]),
        carbon_cost_savings: SummaryBand::from_series(streams[11]),
        stock_penetration,
    }
}

fn cost_effectiveness(metrics: &crate::domain::measure::PortfolioMetrics) -> CostEffectiveness {
    CostEffectiveness {
        cce: SummaryBand::from_series(&metrics.cce),
        cce_with_carbon_benefits: SummaryBand::from_series(&metrics.cce_with_carbon_benefits),
        ccc: SummaryBand::from_series(&metrics.ccc),
        ccc_with_energy_benefits: SummaryBand::from_series(&metrics.ccc_with_energy_benefits),
    }
}

/// Normalize a breakout tree's leaves into fractions of the given per-year
/// totals.
fn fraction_tree(tree: &BreakoutTree, denom: &BTreeMap<Year, f64>) -> CategoryTree {
    tree.iter()
        .map(|(cz, buildings)| {
            let buildings = buildings
                .iter()
                .map(|(bldg, end_uses)| {
                    let end_uses = end_uses
                        .iter()
                        .map(|(eu, series)| {
                            let fracs = series
                                .iter()
                                .map(|(yr, v)| {
                                    let d = denom.get(&yr).copied().unwrap_or(0.0);
                                    (yr, if d != 0.0 { v.mean() / d } else { 0.0 })
                                })
                                .collect();
                            (eu.clone(), fracs)
                        })
                        .collect();
                    (bldg.clone(), end_uses)
                })
                .collect();
            (cz.clone(), buildings)
        })
        .collect()
}

/// Scale a fraction tree back up by one stream's per-year means.
fn apply_fractions(frac: &CategoryTree, stream: &BTreeMap<Year, f64>) -> CategoryTree {
    frac.iter()
        .map(|(cz, buildings)| {
            let buildings = buildings
                .iter()
                .map(|(bldg, end_uses)| {
                    let end_uses = end_uses
                        .iter()
                        .map(|(eu, fracs)| {
                            let values = fracs
                                .iter()
                                .map(|(yr, f)| (*yr, f * stream.get(yr).copied().unwrap_or(0.0)))
                                .collect();
                            (eu.clone(), values)
                        })
                        .collect();
                    (bldg.clone(), end_uses)
                })
                .collect();
            (cz.clone(), buildings)
        })
        .collect()
}

/// Reporting categories a measure's attributes place it under.
pub(crate) fn filter_variables(cfg: &AnalysisConfig, measure: &Measure) -> FilterVariables {
    let climate_zones: Vec<String> = cfg
        .climate_breakouts
        .iter()
        .filter(|g| g.members.iter().any(|m| measure.climate_zones.contains(m)))
        .map(|g| g.category.clone())
        .collect();
    let building_classes: Vec<String> = cfg
        .building_breakouts
        .iter()
        .filter(|g| g.members.iter().any(|m| measure.bldg_types.contains(m)))
        .map(|g| g.category.clone())
        .collect();

    let TechSides { primary, .. } = &measure.technology_side;
    let mut end_uses: Vec<String> = Vec::new();
    for group in &cfg.end_use_breakouts {
        if !group.members.iter().any(|m| measure.end_use.primary.contains(m)) {
            continue;
        }
        let category = group.category.as_str();
        let included = match category {
            "Refrigeration" => {
                measure.end_use.primary.iter().any(|e| e == "refrigeration")
                    || measure.technologies.iter().any(|t| t == "freezers")
            }
            "Heating (Equip.)" | "Cooling (Equip.)" => *primary == TechSide::Supply,
            "Heating (Env.)" | "Cooling (Env.)" => *primary == TechSide::Demand,
            _ => true,
        };
        if included && !end_uses.contains(&group.category) {
            end_uses.push(group.category.clone());
        }
    }
    // Secondary heating/cooling effects (waste heat from lights) report
    // under lighting.
    if let Some(secondary) = &measure.end_use.secondary {
        if secondary.iter().any(|e| e == "heating" || e == "cooling")
            && !end_uses.contains(&"Lighting".to_string())
        {
            end_uses.push("Lighting".to_string());
        }
    }

    FilterVariables {
        climate_zones,
        building_classes,
        end_uses,
    }
}
