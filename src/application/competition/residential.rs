use tracing::warn;

use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::MsegKey;
use crate::domain::value::{NumValue, Year, YearSeries};

/// Exponent floor guarding `exp()` against underflow for very low weighted
/// cost sums.
const LOGIT_EXPONENT_FLOOR: f64 = -500.0;

/// Annual market shares for residential measures competing on one key,
/// from a log-linear choice model over capital and operating costs.
///
/// Shares are normalized to sum to one across on-market competitors. A
/// measure that is off-market in a year where any competitor is on-market
/// gets zero; years with no competitor on-market split the market evenly.
pub(crate) fn market_shares(
    measures: &[Measure],
    idxs: &[usize],
    key: &MsegKey,
    cfg: &AnalysisConfig,
    scheme: AdoptScheme,
) -> Result<Vec<YearSeries>, EngineError> {
    let years_on_mkt_all: Vec<Year> = super::union_years_on_market(measures, idxs, cfg);

    let mut fracs: Vec<YearSeries> = vec![YearSeries::new(); idxs.len()];
    let mut totals = YearSeries::constant(cfg.years(), 0.0);

    for (pos, &idx) in idxs.iter().enumerate() {
        let measure = &measures[idx];
        let consumer = measure
            .consumer_metrics
            .as_ref()
            .ok_or_else(|| EngineError::ResultsNotReady {
                name: measure.name.clone(),
            })?;
        let (Some(cap_costs), Some(op_costs)) = (
            consumer.unit_cost.stock.residential.as_ref(),
            consumer.unit_cost.energy.residential.as_ref(),
        ) else {
            warn!(
                measure = %measure.name,
                "no residential unit costs for residentially-competed measure"
            );
            continue;
        };
        let params = measure
            .market(scheme)?
            .competed
            .competition
            .choice_params
            .get(key)
            .ok_or_else(|| EngineError::MissingChoiceParameters {
                name: measure.name.clone(),
                key: key.to_string(),
            })?;

        for yr in cfg.years() {
            if !measure.on_market(yr) {
                continue;
            }
            let weighted = &(&cap_costs[yr] * &params.b1[yr]) + &(&op_costs[yr] * &params.b2[yr]);
            let frac = weighted.floor_at(LOGIT_EXPONENT_FLOOR).exp();
            totals[yr] = &totals[yr] + &frac;
            fracs[pos].insert(yr, frac);
        }
    }

    // Normalize on-market shares; apply the off-market rules elsewhere.
    for (pos, &idx) in idxs.iter().enumerate() {
        let measure = &measures[idx];
        for yr in cfg.years() {
            let value = if measure.on_market(yr) {
                match fracs[pos].get(yr) {
                    Some(frac) => frac.div_or_zero(&totals[yr]),
                    None => NumValue::Scalar(0.0),
                }
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
