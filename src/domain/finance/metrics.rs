use super::cashflow::{irr, npv, payback};
use super::METRIC_SENTINEL;
use crate::domain::value::NumValue;

/// Carbon savings are priced against capital in $/MTon, while the savings
/// stream is in MMTons.
const CARBON_PRICE_SCALE: f64 = 1_000_000.0;

/// Measure-level context that does not vary by year or sample.
#[derive(Debug, Clone)]
pub struct MetricContext<'a> {
    pub discount_rate: f64,
    /// Commercial discount-rate tiers.
    pub com_rates: &'a [f64],
    /// Credit avoided baseline repurchases (longer-lived full-service
    /// supply-side lighting measures).
    pub lighting_credit: bool,
    pub include_residential: bool,
    pub include_commercial: bool,
    /// Whether consumer-level metrics still need to be produced.
    pub compute_consumer: bool,
}

/// Per-unit inputs for one measure and year. Any of the `NumValue` fields
/// may carry samples; scalars broadcast to the common sample length.
#[derive(Debug, Clone)]
pub struct YearInputs {
    /// Baseline technology lifetime (point value, years).
    pub life_base: f64,
    /// Measure lifetime (may be sampled).
    pub life_meas: NumValue,
    /// Per-unit baseline capital cost.
    pub scost_base: f64,
    /// Per-unit incremental capital cost savings of the measure.
    pub scost_meas_delta: NumValue,
    /// Per-unit annual energy savings.
    pub esave: NumValue,
    /// Per-unit annual energy cost savings.
    pub ecostsave: NumValue,
    /// Per-unit annual avoided carbon emissions.
    pub csave: NumValue,
    /// Per-unit annual carbon cost savings.
    pub ccostsave: NumValue,
    /// Per-unit measure capital cost.
    pub scost_meas: NumValue,
    /// Per-unit measure energy cost.
    pub ecost_meas: NumValue,
    /// Per-unit measure carbon cost.
    pub ccost_meas: NumValue,
}

/// Portfolio-level metrics for one year.
#[derive(Debug, Clone)]
pub struct PortfolioYearMetrics {
    pub cce: NumValue,
    pub cce_with_carbon_benefits: NumValue,
    pub ccc: NumValue,
    pub ccc_with_energy_benefits: NumValue,
}

/// Consumer-level metrics for one year, present only while consumer
/// metrics are still unset on the measure.
#[derive(Debug, Clone)]
pub struct ConsumerYearMetrics {
    /// Residential per-unit (stock, energy, carbon) costs.
    pub unit_cost_res: Option<(NumValue, NumValue, NumValue)>,
    /// Commercial life-cycle (stock, energy, carbon) costs per
    /// discount-rate tier.
    pub unit_cost_com: Option<(Vec<NumValue>, Vec<NumValue>, Vec<NumValue>)>,
    pub irr_energy: NumValue,
    pub irr_energy_carbon: NumValue,
    pub payback_energy: NumValue,
    pub payback_energy_carbon: NumValue,
}

#[derive(Debug, Clone)]
pub struct YearMetrics {
    pub portfolio: PortfolioYearMetrics,
    pub consumer: Option<ConsumerYearMetrics>,
}

struct SampleInputs {
    life_base: f64,
    life_meas: f64,
    scost_base: f64,
    scost_meas_delta: f64,
    esave: f64,
    ecostsave: f64,
    csave: f64,
    ccostsave: f64,
    scost_meas: f64,
    ecost_meas: f64,
    ccost_meas: f64,
}

struct SampleOutputs {
    cce: f64,
    cce_bens: f64,
    ccc: f64,
    ccc_bens: f64,
    res: Option<(f64, f64, f64)>,
    com: Option<Vec<(f64, f64, f64)>>,
    irr_e: f64,
    irr_ec: f64,
    payback_e: f64,
    payback_ec: f64,
}

/// Compute all financial metrics for one measure-year, element-wise over
/// any sampled inputs.
pub fn year_metrics(inputs: &YearInputs, ctx: &MetricContext) -> YearMetrics {
    let sampled = [
        &inputs.life_meas,
        &inputs.scost_meas_delta,
        &inputs.esave,
        &inputs.ecostsave,
        &inputs.csave,
        &inputs.ccostsave,
        &inputs.scost_meas,
        &inputs.ecost_meas,
        &inputs.ccost_meas,
    ];
    let n = sampled.iter().filter_map(|v| v.len()).max();

    match n {
        None => {
            let out = sample_metrics(
                &SampleInputs {
                    life_base: inputs.life_base,
                    life_meas: inputs.life_meas.to_point(),
                    scost_base: inputs.scost_base,
                    scost_meas_delta: inputs.scost_meas_delta.to_point(),
                    esave: inputs.esave.to_point(),
                    ecostsave: inputs.ecostsave.to_point(),
                    csave: inputs.csave.to_point(),
                    ccostsave: inputs.ccostsave.to_point(),
                    scost_meas: inputs.scost_meas.to_point(),
                    ecost_meas: inputs.ecost_meas.to_point(),
                    ccost_meas: inputs.ccost_meas.to_point(),
                },
                ctx,
            );
            recombine(vec![out], ctx, false)
        }
        Some(n) => {
            let life_meas = inputs.life_meas.broadcast(n);
            let scost_meas_delta = inputs.scost_meas_delta.broadcast(n);
            let esave = inputs.esave.broadcast(n);
            let ecostsave = inputs.ecostsave.broadcast(n);
            let csave = inputs.csave.broadcast(n);
            let ccostsave = inputs.ccostsave.broadcast(n);
            let scost_meas = inputs.scost_meas.broadcast(n);
            let ecost_meas = inputs.ecost_meas.broadcast(n);
            let ccost_meas = inputs.ccost_meas.broadcast(n);
            let outs: Vec<SampleOutputs> = (0..n)
                .map(|i| {
                    sample_metrics(
                        &SampleInputs {
                            life_base: inputs.life_base,
                            life_meas: life_meas[i],
                            scost_base: inputs.scost_base,
                            scost_meas_delta: scost_meas_delta[i],
                            esave: esave[i],
                            ecostsave: ecostsave[i],
                            csave: csave[i],
                            ccostsave: ccostsave[i],
                            scost_meas: scost_meas[i],
                            ecost_meas: ecost_meas[i],
                            ccost_meas: ccost_meas[i],
                        },
                        ctx,
                    )
                })
                .collect();
            recombine(outs, ctx, true)
        }
    }
}

fn sample_metrics(s: &SampleInputs, ctx: &MetricContext) -> SampleOutputs {
    let life_base = (s.life_base.round() as i64).max(1);
    let life_meas_raw = s.life_meas.round() as i64;

    // Years (cash-flow indices) at which a longer-lived lighting
    // replacement avoids a repeat purchase of the baseline technology.
    let mut repurchase_years: Vec<i64> = Vec::new();
    if ctx.lighting_credit && life_meas_raw > life_base {
        for i in 1..life_meas_raw {
            if i % life_base == 0 {
                repurchase_years.push(i);
            }
        }
    }

    // Lifetimes below one year are nonsensical for amortization.
    let life_meas = life_meas_raw.max(1);
    let horizon = life_meas as usize;

    // Capital cost flows: up-front cost, then avoided baseline purchases
    // at the repurchase years (zero elsewhere).
    let mut flows_s_delta = Vec::with_capacity(horizon + 1);
    let mut flows_s_total = Vec::with_capacity(horizon + 1);
    flows_s_delta.push(s.scost_meas_delta);
    flows_s_total.push(s.scost_meas);
    for t in 1..=life_meas {
        let credit = if repurchase_years.contains(&t) {
            s.scost_base
        } else {
            0.0
        };
        flows_s_delta.push(credit);
        flows_s_total.push(credit);
    }

    // Operating flows: nothing up front, then a constant annual value.
    let annual = |v: f64| {
        let mut flows = vec![0.0];
        flows.extend(std::iter::repeat_n(v, horizon));
        flows
    };
    let flows_e_delta = annual(s.ecostsave);
    let flows_c_delta = annual(s.ccostsave);
    let flows_e_total = annual(s.ecost_meas);
    let flows_c_total = annual(s.ccost_meas);

    let npv_s_delta = npv(ctx.discount_rate, &flows_s_delta);
    let npv_e_delta = npv(ctx.discount_rate, &flows_e_delta);
    let npv_c_delta = npv(ctx.discount_rate, &flows_c_delta);
    let npv_esave = npv(ctx.discount_rate, &annual(s.esave));
    let npv_csave = npv(ctx.discount_rate, &annual(s.csave));

    let (cce, cce_bens) = if npv_esave > 0.0 {
        (
            -npv_s_delta / npv_esave,
            -(npv_s_delta + npv_c_delta) / npv_esave,
        )
    } else {
        (METRIC_SENTINEL, METRIC_SENTINEL)
    };
    let (ccc, ccc_bens) = if npv_csave > 0.0 {
        (
            -npv_s_delta / (npv_csave * CARBON_PRICE_SCALE),
            -(npv_s_delta + npv_e_delta) / (npv_csave * CARBON_PRICE_SCALE),
        )
    } else {
        (METRIC_SENTINEL, METRIC_SENTINEL)
    };

    if !ctx.compute_consumer {
        return SampleOutputs {
            cce,
            cce_bens,
            ccc,
            ccc_bens,
            res: None,
            com: None,
            irr_e: METRIC_SENTINEL,
            irr_ec: METRIC_SENTINEL,
            payback_e: METRIC_SENTINEL,
            payback_ec: METRIC_SENTINEL,
        };
    }

    let res = ctx
        .include_residential
        .then_some((s.scost_meas, s.ecost_meas, s.ccost_meas));

    let com = ctx.include_commercial.then(|| {
        let mut tiers = Vec::with_capacity(ctx.com_rates.len());
        let mut degenerate = false;
        for rate in ctx.com_rates {
            let triple = (
                npv(*rate, &flows_s_total),
                npv(*rate, &flows_e_total),
                npv(*rate, &flows_c_total),
            );
            if !(triple.0.is_finite() && triple.1.is_finite() && triple.2.is_finite()) {
                degenerate = true;
            }
            tiers.push(triple);
        }
        if degenerate {
            // One bad tier invalidates the whole life-cycle comparison.
            tiers = vec![(METRIC_SENTINEL, METRIC_SENTINEL, METRIC_SENTINEL); ctx.com_rates.len()];
        }
        tiers
    });

    let sum_flows = |a: &[f64], b: &[f64]| -> Vec<f64> {
        a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
    };
    let flows_se = sum_flows(&flows_s_delta, &flows_e_delta);
    let flows_sec = sum_flows(&flows_se, &flows_c_delta);

    let finite_or_sentinel = |v: Option<f64>| match v {
        Some(x) if x.is_finite() => x,
        _ => METRIC_SENTINEL,
    };
    let irr_e = finite_or_sentinel(irr(&flows_se));
    let irr_ec = finite_or_sentinel(irr(&flows_sec));
    let payback_e = payback(&flows_se);
    let payback_ec = payback(&flows_sec);

    SampleOutputs {
        cce,
        cce_bens,
        ccc,
        ccc_bens,
        res,
        com,
        irr_e,
        irr_ec,
        payback_e,
        payback_ec,
    }
}

fn recombine(outs: Vec<SampleOutputs>, ctx: &MetricContext, sampled: bool) -> YearMetrics {
    let collect = |f: &dyn Fn(&SampleOutputs) -> f64| -> NumValue {
        if sampled {
            NumValue::Samples(outs.iter().map(f).collect())
        } else {
            NumValue::Scalar(f(&outs[0]))
        }
    };

    let portfolio = PortfolioYearMetrics {
        cce: collect(&|o| o.cce),
        cce_with_carbon_benefits: collect(&|o| o.cce_bens),
        ccc: collect(&|o| o.ccc),
        ccc_with_energy_benefits: collect(&|o| o.ccc_bens),
    };

    let consumer = ctx.compute_consumer.then(|| {
        let unit_cost_res = ctx.include_residential.then(|| {
            (
                collect(&|o| o.res.unwrap().0),
                collect(&|o| o.res.unwrap().1),
                collect(&|o| o.res.unwrap().2),
            )
        });
        let unit_cost_com = ctx.include_commercial.then(|| {
            let tier_count = ctx.com_rates.len();
            let mut stock = Vec::with_capacity(tier_count);
            let mut energy = Vec::with_capacity(tier_count);
            let mut carbon = Vec::with_capacity(tier_count);
            for t in 0..tier_count {
                stock.push(collect(&move |o: &SampleOutputs| o.com.as_ref().unwrap()[t].0));
                energy.push(collect(&move |o: &SampleOutputs| o.com.as_ref().unwrap()[t].1));
                carbon.push(collect(&move |o: &SampleOutputs| o.com.as_ref().unwrap()[t].2));
            }
            (stock, energy, carbon)
        });
        ConsumerYearMetrics {
            unit_cost_res,
            unit_cost_com,
            irr_energy: collect(&|o| o.irr_e),
            irr_energy_carbon: collect(&|o| o.irr_ec),
            payback_energy: collect(&|o| o.payback_e),
            payback_energy_carbon: collect(&|o| o.payback_ec),
        }
    });

    YearMetrics {
        portfolio,
        consumer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_inputs() -> YearInputs {
        YearInputs {
            life_base: 10.0,
            life_meas: NumValue::Scalar(10.0),
            scost_base: 100.0,
            scost_meas_delta: NumValue::Scalar(-50.0),
            esave: NumValue::Scalar(10.0),
            ecostsave: NumValue::Scalar(5.0),
            csave: NumValue::Scalar(0.001),
            ccostsave: NumValue::Scalar(1.0),
            scost_meas: NumValue::Scalar(150.0),
            ecost_meas: NumValue::Scalar(20.0),
            ccost_meas: NumValue::Scalar(2.0),
        }
    }

    fn ctx(rates: &[f64]) -> MetricContext<'_> {
        MetricContext {
            discount_rate: 0.07,
            com_rates: rates,
            lighting_credit: false,
            include_residential: true,
            include_commercial: false,
            compute_consumer: true,
        }
    }

    #[test]
    fn test_cce_matches_npv_ratio() {
        let rates = [10.0, 1.0, 0.45, 0.25, 0.15, 0.065, 0.0];
        let inputs = scalar_inputs();
        let c = ctx(&rates);
        let m = year_metrics(&inputs, &c);

        let mut capital = vec![-50.0];
        capital.extend(std::iter::repeat_n(0.0, 10));
        let mut esave_flows = vec![0.0];
        esave_flows.extend(std::iter::repeat_n(10.0, 10));
        let expected = -npv(0.07, &capital) / npv(0.07, &esave_flows);
        match m.portfolio.cce {
            NumValue::Scalar(v) => assert!((v - expected).abs() < 1e-12),
            _ => panic!("expected scalar cce"),
        }
    }

    #[test]
    fn test_cce_sentinel_on_nonpositive_savings() {
        let mut inputs = scalar_inputs();
        inputs.esave = NumValue::Scalar(0.0);
        let rates = [0.0];
        let m = year_metrics(&inputs, &ctx(&rates));
        assert_eq!(m.portfolio.cce, NumValue::Scalar(METRIC_SENTINEL));
        assert_eq!(
            m.portfolio.cce_with_carbon_benefits,
            NumValue::Scalar(METRIC_SENTINEL)
        );
    }

    #[test]
    fn test_sampled_inputs_produce_sampled_outputs() {
        let mut inputs = scalar_inputs();
        inputs.esave = NumValue::Samples(vec![10.0, 0.0]);
        let rates = [0.0];
        let m = year_metrics(&inputs, &ctx(&rates));
        match m.portfolio.cce {
            NumValue::Samples(v) => {
                assert_eq!(v.len(), 2);
                assert!(v[0] < METRIC_SENTINEL);
                assert_eq!(v[1], METRIC_SENTINEL);
            }
            _ => panic!("expected sampled cce"),
        }
    }

    #[test]
    fn test_lighting_credit_improves_capital_npv() {
        let rates = [0.0];
        let mut inputs = scalar_inputs();
        inputs.life_meas = NumValue::Scalar(30.0);
        let mut with_credit = ctx(&rates);
        with_credit.lighting_credit = true;
        let credited = year_metrics(&inputs, &with_credit);
        let uncredited = year_metrics(&inputs, &ctx(&rates));
        // Avoided repurchases raise the capital-cost NPV, lowering CCE.
        let cce_credited = match credited.portfolio.cce {
            NumValue::Scalar(v) => v,
            _ => panic!(),
        };
        let cce_uncredited = match uncredited.portfolio.cce {
            NumValue::Scalar(v) => v,
            _ => panic!(),
        };
        assert!(cce_credited < cce_uncredited);
    }

    #[test]
    fn test_consumer_metrics_skipped_when_already_final() {
        let rates = [0.0];
        let mut c = ctx(&rates);
        c.compute_consumer = false;
        let m = year_metrics(&scalar_inputs(), &c);
        assert!(m.consumer.is_none());
    }

    #[test]
    fn test_commercial_tiers_follow_rate_count() {
        let rates = [10.0, 1.0, 0.45, 0.25, 0.15, 0.065, 0.0];
        let mut c = ctx(&rates);
        c.include_commercial = true;
        c.include_residential = false;
        let m = year_metrics(&scalar_inputs(), &c);
        let consumer = m.consumer.unwrap();
        assert!(consumer.unit_cost_res.is_none());
        let (stock, energy, carbon) = consumer.unit_cost_com.unwrap();
        assert_eq!(stock.len(), 7);
        assert_eq!(energy.len(), 7);
        assert_eq!(carbon.len(), 7);
    }
}
