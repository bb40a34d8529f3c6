use crate::config::AnalysisConfig;
use crate::domain::value::{NumValue, Year, YearSeries};

/// Annual fractions of a new-construction stock segment: the portion newly
/// added each year and the portion previously captured by the baseline
/// technology that is still turning over. Shared across all measures
/// competing for one new-stock key.
#[derive(Debug, Clone)]
pub(crate) struct NewStockFracs {
    pub add: YearSeries,
    pub base: YearSeries,
}

/// Fractions of a new-construction segment by year, derived from the total
/// new-stock series of the competed key.
///
/// Previously captured baseline stock keeps turning over until two baseline
/// lifetimes past the earliest market entry year: one lifetime before it
/// starts coming up for replacement and another for the full turnover.
pub(crate) fn new_stock_fracs(
    stock_total: &YearSeries,
    lifetime_base: &YearSeries,
    min_entry: Year,
    cfg: &AnalysisConfig,
) -> NewStockFracs {
    let mut add = YearSeries::constant(cfg.years(), 0.0);
    let mut base = YearSeries::constant(cfg.years(), 0.0);
    let base_endyr = f64::from(min_entry) + 2.0 * lifetime_base[min_entry.max(cfg.first_year)].to_point();

    for (ind, yr) in cfg.years().enumerate() {
        if ind == 0 {
            // All new stock present in the first horizon year was added in
            // that year.
            add[yr] = NumValue::Scalar(1.0);
            continue;
        }
        let total = &stock_total[yr];
        if total.is_zero() {
            continue;
        }
        add[yr] = (total - &stock_total[yr - 1]).div_or_zero(total);
        if f64::from(yr) < base_endyr && min_entry > cfg.first_year {
            base[yr] = stock_total[min_entry - 1].div_or_zero(total);
        }
    }
    NewStockFracs { add, base }
}

/// Baseline stock turnover rate by year for one measure's contributing
/// microsegment.
///
/// Existing stock turns over at 1/lifetime plus the retrofit rate. New
/// stock turns over at the stock-addition fraction, plus the replacement
/// share of the previously captured baseline portion once a baseline
/// lifetime has elapsed.
pub(crate) fn base_turnover_rates(
    is_new: bool,
    adj_lifetime_base: &YearSeries,
    new_fracs: Option<&NewStockFracs>,
    cfg: &AnalysisConfig,
) -> YearSeries {
    let years: Vec<Year> = cfg.years().collect();
    let mut rates: YearSeries = if is_new {
        let fracs = new_fracs.expect("new-stock fractions supplied for new-structure keys");
        years.iter().map(|&yr| (yr, fracs.add[yr].clone())).collect()
    } else {
        years
            .iter()
            .map(|&yr| {
                let rate = (1.0 / &adj_lifetime_base[yr]) + cfg.retrofit_rate;
                (yr, rate)
            })
            .collect()
    };

    for (ind, &yr) in years.iter().enumerate() {
        let base_life = adj_lifetime_base[yr].to_point().round().max(1.0);
        let future = ind + base_life as usize;
        if future >= years.len() {
            continue;
        }
        let future_yr = years[future];
        let replacement = 1.0 / base_life + cfg.retrofit_rate;
        if is_new {
            let fracs = new_fracs.expect("new-stock fractions supplied for new-structure keys");
            rates[future_yr] = &rates[future_yr] + &(&fracs.base[future_yr] * replacement);
        } else {
            rates[future_yr] = NumValue::Scalar(replacement);
        }
    }
    rates
}

/// Efficient-stock turnover rate by year, derived from the share-weighted
/// average lifetime across competing measures. The rate lands in the year
/// the stock captured in each competed year comes back on the market.
pub(crate) fn ecm_turnover_rates(
    years_on_mkt_all: &[Year],
    eff_life: &YearSeries,
    cfg: &AnalysisConfig,
) -> YearSeries {
    let mut rates = YearSeries::constant(cfg.years(), 0.0);
    for (ind, &yr) in years_on_mkt_all.iter().enumerate() {
        match &eff_life[yr] {
            NumValue::Scalar(life) => {
                if *life <= 0.0 {
                    continue;
                }
                let future = ind + life.trunc() as usize;
                if future < years_on_mkt_all.len() {
                    rates[years_on_mkt_all[future]] =
                        NumValue::Scalar(1.0 / life + cfg.retrofit_rate);
                }
            }
            NumValue::Samples(lives) => {
                for (i, life) in lives.iter().enumerate() {
                    if *life <= 0.0 {
                        continue;
                    }
                    let future = ind + life.trunc() as usize;
                    if future < years_on_mkt_all.len() {
                        let slot = &mut rates[years_on_mkt_all[future]];
                        let mut samples = slot.broadcast(lives.len());
                        samples[i] = 1.0 / life + cfg.retrofit_rate;
                        *slot = NumValue::Samples(samples);
                    }
                }
            }
        }
    }
    rates
}
