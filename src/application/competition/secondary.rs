use tracing::debug;

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::{LinkKey, MsegKey, Quantity};
use crate::domain::value::{NumValue, Year, YearSeries};

fn ratio_or_zero(adjusted: &YearSeries, original: &YearSeries, year: Year) -> NumValue {
    adjusted[year].div_or_zero(&original[year])
}

fn scale_quantity(
    master: &mut Quantity,
    adj: &mut Quantity,
    year: Year,
    total_frac: &NumValue,
    competed_frac: &NumValue,
) {
    for (master_side, adj_side, frac) in [
        (&mut master.total, &mut adj.total, total_frac),
        (&mut master.competed, &mut adj.competed, competed_frac),
    ] {
        master_side.baseline[year] =
            &master_side.baseline[year] - &(&adj_side.baseline[year] * &(1.0 - frac));
        master_side.efficient[year] =
            &master_side.efficient[year] - &(&adj_side.efficient[year] * &(1.0 - frac));
        adj_side.baseline[year] = &adj_side.baseline[year] * frac;
        adj_side.efficient[year] = &adj_side.efficient[year] * frac;
    }
}

/// Scale a measure's secondary energy/carbon/cost totals by the
/// adjusted-to-original captured-energy ratio recorded while the associated
/// primary key was competed. Secondary microsegments carry no stock, so
/// stock and stock-cost streams are untouched.
pub(crate) fn adjust(
    measures: &mut [Measure],
    idxs: &[usize],
    key: &MsegKey,
    link: &LinkKey,
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
) -> Result<(), EngineError> {
    let path = cfg.resolve_breakout(key)?;
    for &idx in idxs {
        let measure = &mut measures[idx];
        debug!(measure = %measure.name, key = %key, "secondary adjustment");
        let name = measure.name.clone();
        let competed = &mut measure.market_mut(scheme)?.competed;
        let master = &mut competed.master;
        let out_break = &mut competed.out_break;
        let competition = &mut competed.competition;
        let adj = &mut competition
            .contributing
            .get_mut(key)
            .expect("sharing measure holds the secondary key")
            .mseg;
        let ledgers = &competition.secondary;
        let (Some(orig_tot), Some(adj_tot), Some(orig_comp), Some(adj_comp)) = (
            ledgers.original_total.get(link),
            ledgers.adjusted_total.get(link),
            ledgers.original_competed.get(link),
            ledgers.adjusted_competed.get(link),
        ) else {
            continue;
        };

        for yr in cfg.years() {
            let frac_tot = ratio_or_zero(adj_tot, orig_tot, yr);
            let frac_comp = ratio_or_zero(adj_comp, orig_comp, yr);

            let (brk_base, brk_eff, brk_save) =
                out_break
                    .slots_mut(&path)
                    .ok_or_else(|| EngineError::MissingBreakoutSlot {
                        name: name.clone(),
                        climate: path.climate.clone(),
                        building: path.building.clone(),
                        end_use: path.end_use.clone(),
                    })?;
            let removed = 1.0 - &frac_tot;
            brk_base[yr] = &brk_base[yr] - &(&adj.energy.total.baseline[yr] * &removed);
            brk_eff[yr] = &brk_eff[yr] - &(&adj.energy.total.efficient[yr] * &removed);
            brk_save[yr] = &brk_save[yr]
                - &(&(&adj.energy.total.baseline[yr] - &adj.energy.total.efficient[yr])
                    * &removed);

            scale_quantity(&mut master.cost.energy, &mut adj.cost.energy, yr, &frac_tot, &frac_comp);
            scale_quantity(&mut master.cost.carbon, &mut adj.cost.carbon, yr, &frac_tot, &frac_comp);
            scale_quantity(&mut master.energy, &mut adj.energy, yr, &frac_tot, &frac_comp);
            scale_quantity(&mut master.carbon, &mut adj.carbon, yr, &frac_tot, &frac_comp);
        }
    }
    Ok(())
}
