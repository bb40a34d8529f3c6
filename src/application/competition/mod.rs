//! Apportions competed markets across measures: direct primary-key
//! competition, secondary-key propagation, sub-market redistribution,
//! stock-turnover weighting, and heating/cooling overlap removal.

mod adjust;
mod commercial;
mod overlap;
mod residential;
mod secondary;
mod submarket;
mod turnover;

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::{MsegKey, OverlapTotals, TechSide};
use crate::domain::value::{Year, YearSeries};

use adjust::ShareInputs;
use overlap::OverlapLedger;

/// Sorted union of the years any of the given measures is on the market.
pub(crate) fn union_years_on_market(
    measures: &[Measure],
    idxs: &[usize],
    cfg: &AnalysisConfig,
) -> Vec<Year> {
    let mut years: BTreeSet<Year> = BTreeSet::new();
    for &idx in idxs {
        years.extend(measures[idx].years_on_market.iter().copied());
    }
    years
        .into_iter()
        .filter(|y| cfg.years().contains(y))
        .collect()
}

/// Compete every contributing microsegment key across the measure set for
/// one adoption scenario.
///
/// Keys are processed in sorted order, which places all primary keys before
/// any secondary key; secondary adjustment reads captured-energy ratios
/// recorded while the associated primary keys were processed. Overlap
/// bookkeeping is accumulated alongside and consumed in a final removal
/// pass.
pub(crate) fn compete_measures(
    measures: &mut [Measure],
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
    overlap_totals: &OverlapTotals,
) -> Result<(), EngineError> {
    let mut keys: BTreeSet<MsegKey> = BTreeSet::new();
    for measure in measures.iter() {
        keys.extend(
            measure
                .market(scheme)?
                .competed
                .competition
                .contributing
                .keys()
                .cloned(),
        );
    }
    info!(?scheme, keys = keys.len(), "competing contributing microsegments");

    // The overlap ledger only exists when both sides of the heating/cooling
    // market are present somewhere in the active measure set.
    let has_supply = keys.iter().any(|k| k.side == Some(TechSide::Supply));
    let has_demand = keys.iter().any(|k| k.side == Some(TechSide::Demand));
    let mut ledger = (has_supply && has_demand).then(OverlapLedger::default);

    for key in &keys {
        let sharing: Vec<usize> = (0..measures.len())
            .filter(|&i| {
                measures[i]
                    .markets
                    .get(&scheme)
                    .is_some_and(|m| m.competed.competition.contributing.contains_key(key))
            })
            .collect();
        if sharing.is_empty() {
            continue;
        }

        if key.is_primary() {
            if sharing.len() > 1 {
                debug!(key = %key, measures = sharing.len(), "competing primary key");
                let fracs = if key.is_residential() {
                    residential::market_shares(measures, &sharing, key, cfg, scheme)?
                } else {
                    commercial::market_shares(measures, &sharing, key, cfg, scheme)?
                };
                apply_primary_shares(measures, &sharing, key, cfg, scheme, fracs)?;
            }
        } else {
            let link = key.link_key();
            // Secondary adjustment applies only to measures that actually
            // captured baseline energy on the linked primary keys.
            let affected: Vec<usize> = sharing
                .iter()
                .copied()
                .filter(|&i| {
                    measures[i].markets[&scheme]
                        .competed
                        .competition
                        .secondary
                        .original_total
                        .get(&link)
                        .is_some_and(|s| s.iter().any(|(_, v)| v.any(|x| x > 0.0)))
                })
                .collect();
            if !affected.is_empty() {
                secondary::adjust(measures, &affected, key, &link, cfg, scheme)?;
            }
        }

        if key.is_primary() && key.side.is_some() {
            if let Some(ledger) = ledger.as_mut() {
                overlap::record(ledger, measures, &sharing, key, overlap_totals, cfg, scheme)?;
            }
        }
    }

    if let Some(ledger) = ledger {
        info!(?scheme, "removing heating/cooling supply-demand overlaps");
        overlap::remove(measures, cfg, scheme, ledger)?;
    }
    Ok(())
}

/// Shared tail of residential/commercial primary competition: sub-market
/// redistribution, turnover rates, and the conservation adjustment for
/// each competing measure.
fn apply_primary_shares(
    measures: &mut [Measure],
    idxs: &[usize],
    key: &MsegKey,
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
    mkt_fracs: Vec<YearSeries>,
) -> Result<(), EngineError> {
    let added = submarket::added_fracs(&mkt_fracs, measures, idxs, key, scheme, cfg)?;
    let years_on_mkt_all = union_years_on_market(measures, idxs, cfg);
    let min_entry = idxs
        .iter()
        .map(|&i| measures[i].market_entry_year)
        .min()
        .expect("at least one competing measure");

    // Lifetime-weighted average across competing measures drives the rate
    // at which previously captured efficient stock re-competes.
    let mut eff_life = YearSeries::constant(cfg.years(), 0.0);
    for (pos, &idx) in idxs.iter().enumerate() {
        let lifetime = measures[idx]
            .market(scheme)?
            .competed
            .master
            .lifetime
            .measure
            .clone();
        for yr in cfg.years() {
            eff_life[yr] = &eff_life[yr] + &(&lifetime * &mkt_fracs[pos][yr]);
        }
    }
    let eff_turnover = turnover::ecm_turnover_rates(&years_on_mkt_all, &eff_life, cfg);

    // New-construction stock fractions are shared across competitors, all
    // of which apply to the same baseline segment.
    let new_fracs = if key.is_new_structure() {
        let first = &measures[idxs[0]].market(scheme)?.competed.competition.contributing[key];
        Some(turnover::new_stock_fracs(
            &first.mseg.stock.total.all,
            &first.mseg.lifetime.baseline,
            min_entry,
            cfg,
        ))
    } else {
        None
    };

    for (pos, &idx) in idxs.iter().enumerate() {
        let adj_lifetime = measures[idx]
            .market(scheme)?
            .competed
            .competition
            .contributing[key]
            .mseg
            .lifetime
            .baseline
            .clone();
        let base_turnover = turnover::base_turnover_rates(
            key.is_new_structure(),
            &adj_lifetime,
            new_fracs.as_ref(),
            cfg,
        );
        adjust::apply_shares(
            &mut measures[idx],
            scheme,
            key,
            cfg,
            &ShareInputs {
                raw: &mkt_fracs[pos],
                added: &added[pos],
                min_entry,
                base_turnover: &base_turnover,
                eff_turnover: &eff_turnover,
            },
        )?;
    }
    Ok(())
}
