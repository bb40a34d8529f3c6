use tracing::debug;

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::finance::metrics::{MetricContext, YearInputs, YearMetrics};
use crate::domain::finance::METRIC_SENTINEL;
use crate::domain::measure::{
    CompetitionState, ConsumerMetrics, CostSavings, Measure, PortfolioMetrics, ResourceSavings,
    SavingsOutputs, SectorCosts, TierSeries, UnitCosts,
};
use crate::domain::value::{NumValue, Year, YearSeries};

/// Accumulates per-year metric values across the horizon loop so that
/// "no applicable stock" years can carry the previous year's results
/// forward.
#[derive(Default)]
struct MetricAccumulator {
    res_stock: YearSeries,
    res_energy: YearSeries,
    res_carbon: YearSeries,
    com_stock: TierSeries,
    com_energy: TierSeries,
    com_carbon: TierSeries,
    irr_energy: YearSeries,
    irr_energy_carbon: YearSeries,
    payback_energy: YearSeries,
    payback_energy_carbon: YearSeries,
    cce: YearSeries,
    cce_bens: YearSeries,
    ccc: YearSeries,
    ccc_bens: YearSeries,
}

impl MetricAccumulator {
    fn push_sentinel_or_previous(&mut self, year: Year, first_year: Year, tier_count: usize) {
        let fill = |series: &mut YearSeries| {
            let value = if year == first_year {
                NumValue::Scalar(METRIC_SENTINEL)
            } else {
                series[year - 1].clone()
            };
            series.insert(year, value);
        };
        fill(&mut self.res_stock);
        fill(&mut self.res_energy);
        fill(&mut self.res_carbon);
        fill(&mut self.irr_energy);
        fill(&mut self.irr_energy_carbon);
        fill(&mut self.payback_energy);
        fill(&mut self.payback_energy_carbon);
        fill(&mut self.cce);
        fill(&mut self.cce_bens);
        fill(&mut self.ccc);
        fill(&mut self.ccc_bens);
        for tiers in [&mut self.com_stock, &mut self.com_energy, &mut self.com_carbon] {
            let value = if year == first_year {
                vec![NumValue::Scalar(METRIC_SENTINEL); tier_count]
            } else {
                tiers.0
                    .get(&(year - 1))
                    .cloned()
                    .unwrap_or_else(|| vec![NumValue::Scalar(METRIC_SENTINEL); tier_count])
            };
            tiers.insert(year, value);
        }
    }

    fn push_metrics(&mut self, year: Year, metrics: &YearMetrics, tier_count: usize) {
        let p = &metrics.portfolio;
        self.cce.insert(year, p.cce.clone());
        self.cce_bens.insert(year, p.cce_with_carbon_benefits.clone());
        self.ccc.insert(year, p.ccc.clone());
        self.ccc_bens.insert(year, p.ccc_with_energy_benefits.clone());
        if let Some(c) = &metrics.consumer {
            if let Some((stock, energy, carbon)) = &c.unit_cost_res {
                self.res_stock.insert(year, stock.clone());
                self.res_energy.insert(year, energy.clone());
                self.res_carbon.insert(year, carbon.clone());
            } else {
                self.res_stock.insert(year, NumValue::Scalar(METRIC_SENTINEL));
                self.res_energy.insert(year, NumValue::Scalar(METRIC_SENTINEL));
                self.res_carbon.insert(year, NumValue::Scalar(METRIC_SENTINEL));
            }
            if let Some((stock, energy, carbon)) = &c.unit_cost_com {
                self.com_stock.insert(year, stock.clone());
                self.com_energy.insert(year, energy.clone());
                self.com_carbon.insert(year, carbon.clone());
            } else {
                let fill = vec![NumValue::Scalar(METRIC_SENTINEL); tier_count];
                self.com_stock.insert(year, fill.clone());
                self.com_energy.insert(year, fill.clone());
                self.com_carbon.insert(year, fill);
            }
            self.irr_energy.insert(year, c.irr_energy.clone());
            self.irr_energy_carbon.insert(year, c.irr_energy_carbon.clone());
            self.payback_energy.insert(year, c.payback_energy.clone());
            self.payback_energy_carbon
                .insert(year, c.payback_energy_carbon.clone());
        } else {
            // Consumer metrics already finalized; keep the loop's carry
            // logic consistent by recording sentinels that are never read.
            self.res_stock.insert(year, NumValue::Scalar(METRIC_SENTINEL));
            self.res_energy.insert(year, NumValue::Scalar(METRIC_SENTINEL));
            self.res_carbon.insert(year, NumValue::Scalar(METRIC_SENTINEL));
            let fill = vec![NumValue::Scalar(METRIC_SENTINEL); tier_count];
            self.com_stock.insert(year, fill.clone());
            self.com_energy.insert(year, fill.clone());
            self.com_carbon.insert(year, fill);
            self.irr_energy.insert(year, NumValue::Scalar(METRIC_SENTINEL));
            self.irr_energy_carbon
                .insert(year, NumValue::Scalar(METRIC_SENTINEL));
            self.payback_energy.insert(year, NumValue::Scalar(METRIC_SENTINEL));
            self.payback_energy_carbon
                .insert(year, NumValue::Scalar(METRIC_SENTINEL));
        }
    }
}

fn series_diff(
    a: &YearSeries,
    b: &YearSeries,
    years: impl Iterator<Item = Year> + Clone,
) -> YearSeries {
    years.map(|yr| (yr, &a[yr] - &b[yr])).collect()
}

/// Update one measure's savings, portfolio metrics, and (once) consumer
/// metrics for the given scenario and competition state. A no-op when the
/// corresponding output slot is already filled.
pub(crate) fn update_measure(
    measure: &mut Measure,
    scheme: AdoptScheme,
    state: CompetitionState,
    cfg: &AnalysisConfig,
) -> Result<(), EngineError> {
    let markets = measure.market(scheme)?;
    if measure.savings[&scheme].get(state).is_some() {
        return Ok(());
    }
    debug!(
        measure = %measure.name,
        ?scheme,
        ?state,
        "updating savings and financial metrics"
    );
    let years = cfg.years();
    let tier_count = cfg.com_time_prefs.tier_count();
    let compute_consumer = measure.consumer_metrics.is_none();

    // Uncompeted totals anchor per-unit cost calculations regardless of the
    // competition state being updated.
    let stock_meas_cost_tot = markets.uncompeted.master.cost.stock.total.efficient.clone();
    let stock_base_cost_tot = markets.uncompeted.master.cost.stock.total.baseline.clone();
    let nunits_tot = markets.uncompeted.master.stock.total.all.clone();
    let master = &markets.get(state).master;

    // Total savings reflect all adoptions to date; annual savings reflect
    // only the stock competed in the current year.
    let esave_tot = series_diff(&master.energy.total.baseline, &master.energy.total.efficient, years.clone());
    let esave = series_diff(
        &master.energy.competed.baseline,
        &master.energy.competed.efficient,
        years.clone(),
    );
    let csave_tot = series_diff(&master.carbon.total.baseline, &master.carbon.total.efficient, years.clone());
    let csave = series_diff(
        &master.carbon.competed.baseline,
        &master.carbon.competed.efficient,
        years.clone(),
    );
    let scostsave_tot = series_diff(
        &master.cost.stock.total.baseline,
        &master.cost.stock.total.efficient,
        years.clone(),
    );
    let scostsave = series_diff(
        &master.cost.stock.competed.baseline,
        &master.cost.stock.competed.efficient,
        years.clone(),
    );
    let ecostsave_tot = series_diff(
        &master.cost.energy.total.baseline,
        &master.cost.energy.total.efficient,
        years.clone(),
    );
    let ecostsave = series_diff(
        &master.cost.energy.competed.baseline,
        &master.cost.energy.competed.efficient,
        years.clone(),
    );
    let ccostsave_tot = series_diff(
        &master.cost.carbon.total.baseline,
        &master.cost.carbon.total.efficient,
        years.clone(),
    );
    let ccostsave = series_diff(
        &master.cost.carbon.competed.baseline,
        &master.cost.carbon.competed.efficient,
        years.clone(),
    );

    let ctx = MetricContext {
        discount_rate: cfg.discount_rate,
        com_rates: &cfg.com_time_prefs.rates,
        lighting_credit: measure.earns_lighting_repurchase_credit(),
        include_residential: measure.applies_to_residential(),
        include_commercial: measure.applies_to_commercial(),
        compute_consumer,
    };

    let mut acc = MetricAccumulator::default();
    for yr in years.clone() {
        let nunits = &nunits_tot[yr];
        let nunits_meas = &master.stock.total.captured[yr];

        // Metrics are undefined in years with no applicable stock or no
        // captured units; carry forward the previous year's values.
        if nunits.is_zero() || nunits_meas.all(|x| x < 1.0) {
            acc.push_sentinel_or_previous(yr, cfg.first_year, tier_count);
            continue;
        }

        let scost_base = (&stock_base_cost_tot[yr] / nunits).to_point();
        let scost_meas_delta = &(&stock_base_cost_tot[yr] - &stock_meas_cost_tot[yr]) / nunits;
        let life_base = master.lifetime.baseline[yr].to_point().max(1.0);
        let life_meas = master.lifetime.measure.floor_at(1.0);

        let inputs = YearInputs {
            life_base,
            life_meas,
            scost_base,
            scost_meas_delta,
            esave: &esave_tot[yr] / nunits,
            ecostsave: &ecostsave_tot[yr] / nunits,
            csave: &csave_tot[yr] / nunits,
            ccostsave: &ccostsave_tot[yr] / nunits,
            scost_meas: &master.cost.stock.total.efficient[yr] / nunits,
            ecost_meas: &master.cost.energy.total.efficient[yr] / nunits,
            ccost_meas: &master.cost.carbon.total.efficient[yr] / nunits,
        };
        let metrics = crate::domain::finance::metrics::year_metrics(&inputs, &ctx);
        acc.push_metrics(yr, &metrics, tier_count);
    }

    // Record savings streams.
    *measure.savings.get_mut(&scheme).unwrap().get_mut(state) = Some(SavingsOutputs {
        stock_cost: CostSavings {
            total: scostsave_tot,
            annual: scostsave,
        },
        energy: ResourceSavings {
            savings_total: esave_tot,
            savings_annual: esave,
            cost: CostSavings {
                total: ecostsave_tot,
                annual: ecostsave,
            },
        },
        carbon: ResourceSavings {
            savings_total: csave_tot,
            savings_annual: csave,
            cost: CostSavings {
                total: ccostsave_tot,
                annual: ccostsave,
            },
        },
    });

    // Record portfolio-level metrics.
    *measure.portfolio_metrics.get_mut(&scheme).unwrap().get_mut(state) =
        Some(PortfolioMetrics {
            cce: acc.cce,
            cce_with_carbon_benefits: acc.cce_bens,
            ccc: acc.ccc,
            ccc_with_energy_benefits: acc.ccc_bens,
        });

    // Consumer metrics are invariant across scenarios and competition
    // states, so the first pass to compute them wins.
    if compute_consumer {
        let residential = measure.applies_to_residential();
        let commercial = measure.applies_to_commercial();
        let sector = |res: YearSeries, com: TierSeries| SectorCosts {
            residential: residential.then_some(res),
            commercial: commercial.then_some(com),
        };
        measure.consumer_metrics = Some(ConsumerMetrics {
            unit_cost: UnitCosts {
                stock: sector(acc.res_stock, acc.com_stock),
                energy: sector(acc.res_energy, acc.com_energy),
                carbon: sector(acc.res_carbon, acc.com_carbon),
            },
            irr_energy: acc.irr_energy,
            irr_energy_carbon: acc.irr_energy_carbon,
            payback_energy: acc.payback_energy,
            payback_energy_carbon: acc.payback_energy_carbon,
        });
    }

    Ok(())
}
