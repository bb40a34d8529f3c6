use super::METRIC_SENTINEL;

/// Cap on the number of years a cash-flow stream is extended when searching
/// for payback.
const PAYBACK_HORIZON: usize = 100;

/// Net present value of a cash-flow stream, first flow at t = 0.
pub fn npv(rate: f64, flows: &[f64]) -> f64 {
    flows
        .iter()
        .enumerate()
        .map(|(t, cf)| cf / (1.0 + rate).powi(t as i32))
        .sum()
}

/// Internal rate of return: the rate at which the stream's NPV is zero.
///
/// Solved by bracketing a sign change of the NPV over (-1, 10] and
/// bisecting. Returns `None` for degenerate streams (no sign change, empty,
/// or a non-finite root), which callers map to the sentinel.
pub fn irr(flows: &[f64]) -> Option<f64> {
    if flows.len() < 2 {
        return None;
    }
    let f = |r: f64| npv(r, flows);

    // Walk a geometric-ish grid of candidate rates looking for a bracket.
    let mut grid: Vec<f64> = Vec::with_capacity(220);
    let mut r = -0.999;
    while r < 10.0 {
        grid.push(r);
        r += if r < 1.0 { 0.01 } else { 0.25 };
    }
    grid.push(10.0);

    let mut bracket = None;
    for pair in grid.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let (flo, fhi) = (f(lo), f(hi));
        if !flo.is_finite() || !fhi.is_finite() {
            continue;
        }
        if flo == 0.0 {
            return Some(lo);
        }
        if flo * fhi < 0.0 {
            bracket = Some((lo, hi));
            break;
        }
    }
    let (mut lo, mut hi) = bracket?;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let fmid = f(mid);
        if !fmid.is_finite() {
            return None;
        }
        if f(lo) * fmid <= 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let root = 0.5 * (lo + hi);
    root.is_finite().then_some(root)
}

/// Simple payback period in years for a cash-flow stream whose first entry
/// is the up-front investment.
///
/// A non-negative initial flow pays back immediately. Otherwise subsequent
/// flows are accumulated (extending the terminal flow out to a 100-year
/// cap) until they cover the investment, interpolating linearly within the
/// crossing year. Streams that never recover return the sentinel.
pub fn payback(flows: &[f64]) -> f64 {
    let Some((&investment, rest)) = flows.split_first() else {
        return METRIC_SENTINEL;
    };
    if investment >= 0.0 {
        return 0.0;
    }
    let investment = investment.abs();

    let mut extended: Vec<f64> = rest.to_vec();
    if let Some(&last) = flows.last() {
        while extended.len() < PAYBACK_HORIZON {
            extended.push(last);
        }
    }

    let mut total = 0.0;
    let mut years = 0usize;
    let mut cumulative = Vec::with_capacity(extended.len());
    for cf in &extended {
        total += cf;
        if total < investment {
            years += 1;
        }
        cumulative.push(total);
    }

    if years >= extended.len() {
        return METRIC_SENTINEL;
    }
    let (covered, gained) = if years == 0 {
        (investment, cumulative[0])
    } else {
        (
            investment - cumulative[years - 1],
            cumulative[years] - cumulative[years - 1],
        )
    };
    let value = years as f64 + covered / gained;
    if value.is_finite() { value } else { METRIC_SENTINEL }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npv_reference() {
        // 100 received one year out at 10% discounts to ~90.909.
        let v = npv(0.10, &[0.0, 100.0]);
        assert!((v - 90.909090909).abs() < 1e-6);
        assert_eq!(npv(0.10, &[50.0]), 50.0);
    }

    #[test]
    fn test_irr_exact_single_period() {
        let r = irr(&[-100.0, 110.0]).unwrap();
        assert!((r - 0.10).abs() < 1e-6);
    }

    #[test]
    fn test_irr_two_period() {
        // -100 + 60/(1+r) + 60/(1+r)^2 = 0 at r ~ 0.13066
        let r = irr(&[-100.0, 60.0, 60.0]).unwrap();
        assert!((r - 0.13066).abs() < 1e-4);
    }

    #[test]
    fn test_irr_degenerate_flows() {
        assert!(irr(&[100.0, 50.0]).is_none());
        assert!(irr(&[-100.0]).is_none());
    }

    #[test]
    fn test_payback_exact_recovery() {
        assert!((payback(&[-100.0, 50.0, 50.0, 50.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_payback_interpolates_within_year() {
        // 75 recovered after year one, the rest halfway through year two.
        assert!((payback(&[-100.0, 75.0, 50.0]) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_payback_nonnegative_investment_is_zero() {
        assert_eq!(payback(&[100.0, -5.0]), 0.0);
        assert_eq!(payback(&[0.0]), 0.0);
    }

    #[test]
    fn test_payback_never_recovers() {
        assert_eq!(payback(&[-100.0, 0.5]), METRIC_SENTINEL);
    }

    #[test]
    fn test_payback_sub_year_recovery() {
        assert!((payback(&[-50.0, 100.0]) - 0.5).abs() < 1e-12);
    }
}
