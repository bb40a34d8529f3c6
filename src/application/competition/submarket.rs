use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::Measure;
use crate::domain::mseg::MsegKey;
use crate::domain::value::{NumValue, YearSeries};

/// Additional market-share fractions owed to each competing measure when
/// one or more competitors applies to only part of the competed segment.
///
/// The inapplicable portion of a sub-market-scaled measure's share is
/// redistributed to competitors that cover the full segment, weighted by
/// their own shares (evenly when those shares are all zero). With no
/// eligible competitor the portion is dropped and the segment goes
/// unserved.
pub(crate) fn added_fracs(
    mkt_fracs: &[YearSeries],
    measures: &[Measure],
    idxs: &[usize],
    key: &MsegKey,
    scheme: AdoptScheme,
    cfg: &AnalysisConfig,
) -> Result<Vec<YearSeries>, EngineError> {
    let mut noapply: Vec<f64> = Vec::with_capacity(idxs.len());
    for &idx in idxs {
        let contributing = &measures[idx].market(scheme)?.competed.competition.contributing;
        let scale = contributing
            .get(key)
            .map(|c| c.sub_market_scale)
            .unwrap_or(1.0);
        noapply.push(1.0 - scale);
    }

    let zero = || {
        (0..idxs.len())
            .map(|_| YearSeries::constant(cfg.years(), 0.0))
            .collect::<Vec<_>>()
    };
    if noapply.iter().all(|&f| f == 0.0) {
        return Ok(zero());
    }

    let eligible: Vec<bool> = noapply.iter().map(|&f| f == 0.0).collect();
    let eligible_count = eligible.iter().filter(|&&e| e).count();
    let mut added = zero();

    for yr in cfg.years() {
        for donor in 0..idxs.len() {
            let seg_redist = &mkt_fracs[donor][yr] * noapply[donor];
            if seg_redist.is_zero() {
                continue;
            }
            if eligible_count == 0 {
                // Nothing covers the full segment; the residual is unserved.
                continue;
            }
            let all_eligible_zero = eligible
                .iter()
                .enumerate()
                .filter(|(_, &e)| e)
                .all(|(i, _)| mkt_fracs[i][yr].is_zero());
            if all_eligible_zero {
                let even = 1.0 / eligible_count as f64;
                for (recipient, &is_eligible) in eligible.iter().enumerate() {
                    if is_eligible {
                        added[recipient][yr] = &added[recipient][yr] + &(&seg_redist * even);
                    }
                }
            } else {
                let mut weight_sum = NumValue::Scalar(0.0);
                for (i, &is_eligible) in eligible.iter().enumerate() {
                    if is_eligible {
                        weight_sum = &weight_sum + &mkt_fracs[i][yr];
                    }
                }
                for (recipient, &is_eligible) in eligible.iter().enumerate() {
                    if !is_eligible {
                        continue;
                    }
                    let weight = mkt_fracs[recipient][yr].div_or_zero(&weight_sum);
                    added[recipient][yr] =
                        &added[recipient][yr] + &(&seg_redist * &weight);
                }
            }
        }
    }
    Ok(added)
}
