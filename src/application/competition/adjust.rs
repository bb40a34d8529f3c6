use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::{MsegKey, Quantity};
use crate::domain::value::{NumValue, Year, YearSeries};

/// Share inputs for one measure competing on one contributing key.
pub(crate) struct ShareInputs<'a> {
    /// Raw competed market share by year.
    pub raw: &'a YearSeries,
    /// Additional share from sub-market redistribution by year.
    pub added: &'a YearSeries,
    /// Earliest market entry year across all competing measures.
    pub min_entry: Year,
    /// Baseline stock turnover rate by year.
    pub base_turnover: &'a YearSeries,
    /// Efficient (previously captured) stock turnover rate by year.
    pub eff_turnover: &'a YearSeries,
}

/// Moving-average weighted total market share for `year`.
///
/// The first competable year, and every year under the technical-potential
/// scenario, takes the raw share outright (full stock turnover). Later
/// years blend the prior weighted share with the current raw share at the
/// fraction of stock actually up for replacement: baseline turnover capped
/// by the remaining baseline fraction, plus efficient turnover applied to
/// the fraction already captured.
fn weighted_total_share(year: Year, scheme: AdoptScheme, is_new: bool, s: &ShareInputs) -> NumValue {
    let share_at = |yr: Year| &s.raw[yr] + &s.added[yr];
    if year < s.min_entry {
        return share_at(year);
    }

    let mut total = NumValue::Scalar(0.0);
    let mut eff_frac = NumValue::Scalar(0.0);
    let mut base_frac = NumValue::Scalar(1.0);
    for (ind, wyr) in (s.min_entry..=year).enumerate() {
        if ind == 0 || scheme == AdoptScheme::TechnicalPotential {
            total = share_at(wyr);
            continue;
        }
        let (base_wt, eff_wt) = if is_new {
            (s.base_turnover[wyr].clone(), s.eff_turnover[wyr].clone())
        } else {
            let base_wt = s.base_turnover[wyr].min_with(&base_frac);
            let eff_wt = &s.eff_turnover[wyr] * &eff_frac;
            eff_frac = (&eff_frac + &s.base_turnover[wyr]).cap_at(1.0);
            base_frac = 1.0 - &eff_frac;
            (base_wt, eff_wt)
        };
        let weight = &base_wt + &eff_wt;
        total = &(&(1.0 - &weight) * &total) + &(&weight * &share_at(wyr));
    }
    total.cap_at(1.0)
}

fn scale_pair(master: &mut YearSeries, adj: &mut YearSeries, year: Year, frac: &NumValue) {
    master[year] = &master[year] - &(&adj[year] * &(1.0 - frac));
    adj[year] = &adj[year] * frac;
}

fn adjust_quantity(
    master: &mut Quantity,
    adj: &mut Quantity,
    year: Year,
    total_frac: &NumValue,
    competed_frac: &NumValue,
) {
    scale_pair(&mut master.total.baseline, &mut adj.total.baseline, year, total_frac);
    scale_pair(&mut master.total.efficient, &mut adj.total.efficient, year, total_frac);
    scale_pair(
        &mut master.competed.baseline,
        &mut adj.competed.baseline,
        year,
        competed_frac,
    );
    scale_pair(
        &mut master.competed.efficient,
        &mut adj.competed.efficient,
        year,
        competed_frac,
    );
}

/// Apply a measure's competed market shares for one contributing key.
///
/// Whatever fraction leaves the master totals is exactly the fraction
/// retained on the contributing record, and the same removal is mirrored
/// into the reporting-category breakout buckets, so aggregate, contributing,
/// and breakout views stay consistent.
pub(crate) fn apply_shares(
    measure: &mut Measure,
    scheme: AdoptScheme,
    key: &MsegKey,
    cfg: &AnalysisConfig,
    shares: &ShareInputs<'_>,
) -> Result<(), EngineError> {
    let path = cfg.resolve_breakout(key)?;
    let link = key.link_key();
    let is_new = key.is_new_structure();
    let name = measure.name.clone();
    let competed = &mut measure.market_mut(scheme)?.competed;

    let master = &mut competed.master;
    let out_break = &mut competed.out_break;
    let competition = &mut competed.competition;
    let adj = &mut competition
        .contributing
        .get_mut(key)
        .expect("competing measure holds the contributing key")
        .mseg;
    let secondary = &mut competition.secondary;
    let track_secondary = secondary.original_total.contains_key(&link);

    for yr in cfg.years() {
        let comp_frac = &shares.raw[yr] + &shares.added[yr];
        let total_frac = weighted_total_share(yr, scheme, is_new, shares);

        // Record captured-energy bookkeeping for linked secondary
        // microsegments before the contributing record is scaled.
        if track_secondary {
            let original_total = &adj.energy.total.efficient[yr];
            let original_comp = &adj.energy.competed.efficient[yr];
            let slot = secondary
                .original_total
                .get_mut(&link)
                .expect("link key checked above");
            slot[yr] = &slot[yr] + original_total;
            if let Some(slot) = secondary.original_competed.get_mut(&link) {
                slot[yr] = &slot[yr] + original_comp;
            }
            if let Some(slot) = secondary.adjusted_total.get_mut(&link) {
                slot[yr] = &slot[yr] + &(original_total * &total_frac);
            }
            if let Some(slot) = secondary.adjusted_competed.get_mut(&link) {
                slot[yr] = &slot[yr] + &(original_comp * &comp_frac);
            }
        }

        // Mirror the removal into the breakout buckets.
        let (brk_base, brk_eff, brk_save) =
            out_break
                .slots_mut(&path)
                .ok_or_else(|| EngineError::MissingBreakoutSlot {
                    name: name.clone(),
                    climate: path.climate.clone(),
                    building: path.building.clone(),
                    end_use: path.end_use.clone(),
                })?;
        let removed = 1.0 - &total_frac;
        brk_base[yr] = &brk_base[yr] - &(&adj.energy.total.baseline[yr] * &removed);
        brk_eff[yr] = &brk_eff[yr] - &(&adj.energy.total.efficient[yr] * &removed);
        brk_save[yr] = &brk_save[yr]
            - &(&(&adj.energy.total.baseline[yr] - &adj.energy.total.efficient[yr]) * &removed);

        // Captured stock scales with the weighted shares.
        scale_pair(
            &mut master.stock.total.captured,
            &mut adj.stock.total.captured,
            yr,
            &total_frac,
        );
        scale_pair(
            &mut master.stock.competed.captured,
            &mut adj.stock.competed.captured,
            yr,
            &comp_frac,
        );

        // Energy, carbon, and cost totals scale with the weighted shares.
        adjust_quantity(&mut master.cost.stock, &mut adj.cost.stock, yr, &total_frac, &comp_frac);
        adjust_quantity(&mut master.cost.energy, &mut adj.cost.energy, yr, &total_frac, &comp_frac);
        adjust_quantity(&mut master.cost.carbon, &mut adj.cost.carbon, yr, &total_frac, &comp_frac);
        adjust_quantity(&mut master.energy, &mut adj.energy, yr, &total_frac, &comp_frac);
        adjust_quantity(&mut master.carbon, &mut adj.carbon, yr, &total_frac, &comp_frac);
    }
    Ok(())
}
