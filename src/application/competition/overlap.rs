use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::{MsegKey, OverlapKey, OverlapTotals, Quantity, TechSide};
use crate::domain::value::{NumValue, Year, YearSeries};

/// Overlapping heating/cooling energy recorded for one (climate, building,
/// structure, fuel, end use) combination on one side of the market.
#[derive(Debug, Clone)]
pub(crate) struct OverlapRecord {
    /// Total addressable energy for the combination.
    pub total: YearSeries,
    /// Energy actually affected by measures in the analysis.
    pub total_affected: YearSeries,
    /// Savings within the affected energy.
    pub affected_savings: YearSeries,
}

/// Supply-side and demand-side overlap records, built while primary keys
/// are competed and consumed by value in the removal pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct OverlapLedger {
    supply: BTreeMap<OverlapKey, OverlapRecord>,
    demand: BTreeMap<OverlapKey, OverlapRecord>,
}

impl OverlapLedger {
    fn side(&self, side: TechSide) -> &BTreeMap<OverlapKey, OverlapRecord> {
        match side {
            TechSide::Supply => &self.supply,
            TechSide::Demand => &self.demand,
        }
    }

    fn side_mut(&mut self, side: TechSide) -> &mut BTreeMap<OverlapKey, OverlapRecord> {
        match side {
            TechSide::Supply => &mut self.supply,
            TechSide::Demand => &mut self.demand,
        }
    }
}

/// Accumulate the energy affected by all measures sharing a heating/cooling
/// contributing key into the overlap ledger.
pub(crate) fn record(
    ledger: &mut OverlapLedger,
    measures: &[Measure],
    idxs: &[usize],
    key: &MsegKey,
    totals: &OverlapTotals,
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
) -> Result<(), EngineError> {
    let Some((side, okey)) = key.overlap_key() else {
        return Ok(());
    };

    // Sum affected energy and savings across every measure sharing the key.
    let mut affected = YearSeries::constant(cfg.years(), 0.0);
    let mut savings = YearSeries::constant(cfg.years(), 0.0);
    for &idx in idxs {
        let contributing = &measures[idx].market(scheme)?.competed.competition.contributing;
        let mseg = &contributing
            .get(key)
            .expect("sharing measure holds the contributing key")
            .mseg;
        for yr in cfg.years() {
            affected[yr] = &affected[yr] + &mseg.energy.total.baseline[yr];
            savings[yr] = &savings[yr]
                + &(&mseg.energy.total.baseline[yr] - &mseg.energy.total.efficient[yr]);
        }
    }

    let entries = ledger.side_mut(side);
    if let Some(entry) = entries.get_mut(&okey) {
        entry.total_affected.add_series(&affected);
        entry.affected_savings.add_series(&savings);
    } else {
        let Some(total) = totals.get(&okey) else {
            warn!(key = %okey, "no addressable-energy total for overlap key; skipping");
            return Ok(());
        };
        entries.insert(
            okey,
            OverlapRecord {
                total: total.clone(),
                total_affected: affected,
                affected_savings: savings,
            },
        );
    }
    Ok(())
}

/// `1 - savings/affected` per element, treating an unaffected market as
/// baseline-performing.
fn relative_performance(record: &OverlapRecord, year: Year) -> NumValue {
    record.affected_savings[year]
        .zip_with(&record.total_affected[year], |s, a| {
            if a != 0.0 { 1.0 - s / a } else { 1.0 }
        })
}

fn subtract_overlap(master: &mut Quantity, adj: &Quantity, year: Year, base_frac: &NumValue, eff_frac: &NumValue) {
    master.total.baseline[year] =
        &master.total.baseline[year] - &(&adj.total.baseline[year] * &(1.0 - base_frac));
    master.total.efficient[year] =
        &master.total.efficient[year] - &(&adj.total.efficient[year] * &(1.0 - eff_frac));
    master.competed.baseline[year] =
        &master.competed.baseline[year] - &(&adj.competed.baseline[year] * &(1.0 - base_frac));
    master.competed.efficient[year] =
        &master.competed.efficient[year] - &(&adj.competed.efficient[year] * &(1.0 - eff_frac));
}

/// Remove recorded supply/demand heating-cooling overlaps from every
/// affected measure's master totals and breakouts. Keys without a
/// counterpart entry on the other side have no overlap to remove.
pub(crate) fn remove(
    measures: &mut [Measure],
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
    ledger: OverlapLedger,
) -> Result<(), EngineError> {
    for measure in measures.iter_mut() {
        if !measure.affects_heating_cooling() {
            continue;
        }
        let keys: Vec<MsegKey> = measure
            .market(scheme)?
            .competed
            .competition
            .contributing
            .keys()
            .filter(|k| k.is_primary() && k.side.is_some())
            .cloned()
            .collect();

        for key in keys {
            let (side, okey) = key.overlap_key().expect("filtered to sided keys");
            let opposite = match side {
                TechSide::Supply => TechSide::Demand,
                TechSide::Demand => TechSide::Supply,
            };
            let Some(tech) = ledger.side(side).get(&okey) else {
                continue;
            };
            let Some(counterpart) = ledger.side(opposite).get(&okey) else {
                continue;
            };
            debug!(measure = %measure.name, key = %key, "removing heating/cooling overlap");

            let path = cfg.resolve_breakout(&key)?;
            let name = measure.name.clone();
            let competed = &mut measure.market_mut(scheme)?.competed;
            let master = &mut competed.master;
            let out_break = &mut competed.out_break;
            let adj = &competed
                .competition
                .contributing
                .get(&key)
                .expect("key taken from this measure's contributing set")
                .mseg;

            for yr in cfg.years() {
                // Portion of the combination's addressable energy touched by
                // measures on the other side of the market.
                let affected_frac = counterpart.total_affected[yr]
                    .div_or_zero(&counterpart.total[yr]);

                let perf_tech = relative_performance(tech, yr);
                let perf_counterpart = relative_performance(counterpart, yr);

                // Each side's claim on the shared savings, proportional to
                // its deviation from baseline performance.
                let dev_tech = (1.0 - &perf_tech).abs();
                let dev_counterpart = (1.0 - &perf_counterpart).abs();
                let dev_sum = &dev_tech + &dev_counterpart;
                let save_ratio = dev_tech.zip_with(&dev_sum, |d, s| {
                    if s != 0.0 { d / s } else { 0.5 }
                });

                let base_frac =
                    &(1.0 - &affected_frac) + &(&affected_frac * &save_ratio);
                let eff_frac = &(1.0 - &affected_frac)
                    + &(&(&affected_frac * &save_ratio) * &perf_counterpart);

                let (brk_base, brk_eff, brk_save) =
                    out_break
                        .slots_mut(&path)
                        .ok_or_else(|| EngineError::MissingBreakoutSlot {
                            name: name.clone(),
                            climate: path.climate.clone(),
                            building: path.building.clone(),
                            end_use: path.end_use.clone(),
                        })?;
                let removed_base = &adj.energy.total.baseline[yr] * &(1.0 - &base_frac);
                let removed_eff = &adj.energy.total.efficient[yr] * &(1.0 - &eff_frac);
                brk_base[yr] = &brk_base[yr] - &removed_base;
                brk_eff[yr] = &brk_eff[yr] - &removed_eff;
                brk_save[yr] = &brk_save[yr] - &(&removed_base - &removed_eff);

                subtract_overlap(&mut master.cost.energy, &adj.cost.energy, yr, &base_frac, &eff_frac);
                subtract_overlap(&mut master.cost.carbon, &adj.cost.carbon, yr, &base_frac, &eff_frac);
                subtract_overlap(&mut master.energy, &adj.energy, yr, &base_frac, &eff_frac);
                subtract_overlap(&mut master.carbon, &adj.carbon, yr, &base_frac, &eff_frac);
            }
        }
    }
    Ok(())
}
