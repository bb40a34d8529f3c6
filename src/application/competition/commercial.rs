use tracing::warn;

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::MsegKey;
use crate::domain::value::{NumValue, Year, YearSeries};

/// Annual market shares for commercial measures competing on one key.
///
/// Commercial adopters are partitioned into discount-rate tiers with fixed
/// population fractions; within each tier the measure with the lowest total
/// annualized (capital + operating) cost captures the tier, with exact ties
/// splitting the tier's population evenly.
pub(crate) fn market_shares(
    measures: &[Measure],
    idxs: &[usize],
    key: &MsegKey,
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
) -> Result<Vec<YearSeries>, EngineError> {
    let years_on_mkt_all: Vec<Year> = super::union_years_on_market(measures, idxs, cfg);
    let tier_count = cfg.com_time_prefs.tier_count();

    // Total annualized cost per measure, year, and discount-rate tier.
    let mut tier_costs: Vec<Option<Vec<Vec<NumValue>>>> = vec![None; idxs.len()];
    for (pos, &idx) in idxs.iter().enumerate() {
        let measure = &measures[idx];
        let consumer = measure
            .consumer_metrics
            .as_ref()
            .ok_or_else(|| EngineError::ResultsNotReady {
                name: measure.name.clone(),
            })?;
        let (Some(cap_costs), Some(op_costs)) = (
            consumer.unit_cost.stock.commercial.as_ref(),
            consumer.unit_cost.energy.commercial.as_ref(),
        ) else {
            warn!(
                measure = %measure.name,
                "no commercial unit costs for commercially-competed measure"
            );
            continue;
        };
        let mut by_year = Vec::with_capacity(cfg.horizon_len());
        for yr in cfg.years() {
            let mut tiers = Vec::with_capacity(tier_count);
            if measure.on_market(yr) {
                let (Some(cap), Some(op)) = (cap_costs.get(yr), op_costs.get(yr)) else {
                    by_year.push(Vec::new());
                    continue;
                };
                for t in 0..tier_count.min(cap.len()).min(op.len()) {
                    tiers.push(&cap[t] + &op[t]);
                }
            }
            by_year.push(tiers);
        }
        tier_costs[pos] = Some(by_year);
    }

    let year_index: Vec<Year> = cfg.years().collect();
    let mut fracs: Vec<YearSeries> = vec![YearSeries::new(); idxs.len()];

    for (yi, &yr) in year_index.iter().enumerate() {
        // Measures with usable cost data that are on the market this year.
        let active: Vec<usize> = (0..idxs.len())
            .filter(|&pos| {
                measures[idxs[pos]].on_market(yr)
                    && tier_costs[pos]
                        .as_ref()
                        .is_some_and(|c| c[yi].len() == tier_count)
            })
            .collect();

        // Common sample length across all active measures' tier costs.
        let samples = active
            .iter()
            .flat_map(|&pos| tier_costs[pos].as_ref().unwrap()[yi].iter())
            .filter_map(|v| v.len())
            .max();

        for (pos, &idx) in idxs.iter().enumerate() {
            let measure = &measures[idx];
            let value = if measure.on_market(yr) && active.contains(&pos) {
                let dist = rate_distribution(measure, key, yr, cfg, scheme)?;
                share_for_measure(pos, &active, &tier_costs, yi, &dist, samples)
            } else if !years_on_mkt_all.contains(&yr) {
                NumValue::Scalar(1.0 / idxs.len() as f64)
            } else {
                NumValue::Scalar(0.0)
            };
            fracs[pos].insert(yr, value);
        }
    }
    Ok(fracs)
}

/// The population split across discount-rate tiers for one measure, key,
/// and year, falling back to the configured end-use default.
fn rate_distribution(
    measure: &Measure,
    key: &MsegKey,
    year: Year,
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
) -> Result<Vec<f64>, EngineError> {
    let params = measure
        .market(scheme)?
        .competed
        .competition
        .choice_params
        .get(key);
    if let Some(dist) = params.and_then(|p| p.rate_distribution.get(&year)) {
        return Ok(dist.clone());
    }
    if let Some(default) = cfg.com_time_prefs.default_distribution(&key.end_use) {
        warn!(
            measure = %measure.name,
            key = %key,
            year,
            "no per-key rate distribution; using end-use default"
        );
        return Ok(default.to_vec());
    }
    Err(EngineError::MissingChoiceParameters {
        name: measure.name.clone(),
        key: key.to_string(),
    })
}

/// Tier-by-tier cost comparison for one measure against all active
/// competitors, element-wise over any sampled costs.
fn share_for_measure(
    pos: usize,
    active: &[usize],
    tier_costs: &[Option<Vec<Vec<NumValue>>>],
    yi: usize,
    dist: &[f64],
    samples: Option<usize>,
) -> NumValue {
    let tiers = &tier_costs[pos].as_ref().unwrap()[yi];
    let n = samples.unwrap_or(1);
    let mut out = vec![0.0; n];

    for (t, tier_cost) in tiers.iter().enumerate() {
        let own = tier_cost.broadcast(n);
        for (i, own_cost) in own.iter().enumerate() {
            let mut min_cost = f64::INFINITY;
            let mut ties = 0usize;
            for &other in active {
                let cost = tier_costs[other].as_ref().unwrap()[yi][t].broadcast(n)[i];
                if cost < min_cost {
                    min_cost = cost;
                    ties = 1;
                } else if cost == min_cost {
                    ties += 1;
                }
            }
            if *own_cost == min_cost {
                out[i] += dist.get(t).copied().unwrap_or(0.0) / ties as f64;
            }
        }
    }

    if samples.is_some() {
        NumValue::Samples(out)
    } else {
        NumValue::Scalar(out[0])
    }
}
