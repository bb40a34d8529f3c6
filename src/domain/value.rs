use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::collections::BTreeMap;
use std::ops::{Add, Div, Index, IndexMut, Mul, Sub};

/// Modeling year, used as the key of every time-indexed quantity.
pub type Year = u16;

/// A scalar quantity or a fixed-length vector of samples drawn from an
/// input distribution.
///
/// Every leaf quantity in the engine is one of these two forms. Arithmetic
/// is element-wise; a scalar broadcasts against a sample vector. Two sample
/// vectors participating in one operation must have the same length, which
/// is validated when measure inputs are ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumValue {
    Scalar(f64),
    Samples(Vec<f64>),
}

impl Default for NumValue {
    fn default() -> Self {
        NumValue::Scalar(0.0)
    }
}

impl From<f64> for NumValue {
    fn from(v: f64) -> Self {
        NumValue::Scalar(v)
    }
}

impl From<Vec<f64>> for NumValue {
    fn from(v: Vec<f64>) -> Self {
        NumValue::Samples(v)
    }
}

impl NumValue {
    /// Sample count, or `None` for a scalar.
    pub fn len(&self) -> Option<usize> {
        match self {
            NumValue::Scalar(_) => None,
            NumValue::Samples(v) => Some(v.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NumValue::Samples(v) if v.is_empty())
    }

    /// Expand to a sample vector of length `n`. A scalar is repeated; an
    /// existing sample vector must already have length `n`.
    pub fn broadcast(&self, n: usize) -> Vec<f64> {
        match self {
            NumValue::Scalar(s) => vec![*s; n],
            NumValue::Samples(v) => {
                assert_eq!(v.len(), n, "sample length mismatch in broadcast");
                v.clone()
            }
        }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> NumValue {
        match self {
            NumValue::Scalar(s) => NumValue::Scalar(f(*s)),
            NumValue::Samples(v) => NumValue::Samples(v.iter().map(|x| f(*x)).collect()),
        }
    }

    /// Element-wise combination of two values, broadcasting scalars.
    pub fn zip_with(&self, other: &NumValue, f: impl Fn(f64, f64) -> f64) -> NumValue {
        match (self, other) {
            (NumValue::Scalar(a), NumValue::Scalar(b)) => NumValue::Scalar(f(*a, *b)),
            (NumValue::Scalar(a), NumValue::Samples(b)) => {
                NumValue::Samples(b.iter().map(|x| f(*a, *x)).collect())
            }
            (NumValue::Samples(a), NumValue::Scalar(b)) => {
                NumValue::Samples(a.iter().map(|x| f(*x, *b)).collect())
            }
            (NumValue::Samples(a), NumValue::Samples(b)) => {
                assert_eq!(a.len(), b.len(), "sample length mismatch in zip_with");
                NumValue::Samples(a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect())
            }
        }
    }

    /// Division that maps a zero denominator element to zero rather than
    /// producing a non-finite result.
    pub fn div_or_zero(&self, denom: &NumValue) -> NumValue {
        self.zip_with(denom, |n, d| if d != 0.0 { n / d } else { 0.0 })
    }

    pub fn min_with(&self, other: &NumValue) -> NumValue {
        self.zip_with(other, f64::min)
    }

    /// Cap every element at `limit`.
    pub fn cap_at(&self, limit: f64) -> NumValue {
        self.map(|x| x.min(limit))
    }

    /// Floor every element at `limit`.
    pub fn floor_at(&self, limit: f64) -> NumValue {
        self.map(|x| x.max(limit))
    }

    pub fn exp(&self) -> NumValue {
        self.map(f64::exp)
    }

    pub fn abs(&self) -> NumValue {
        self.map(f64::abs)
    }

    pub fn all(&self, pred: impl Fn(f64) -> bool) -> bool {
        match self {
            NumValue::Scalar(s) => pred(*s),
            NumValue::Samples(v) => v.iter().all(|x| pred(*x)),
        }
    }

    pub fn any(&self, pred: impl Fn(f64) -> bool) -> bool {
        match self {
            NumValue::Scalar(s) => pred(*s),
            NumValue::Samples(v) => v.iter().any(|x| pred(*x)),
        }
    }

    /// True when every element is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.all(|x| x == 0.0)
    }

    /// Collapse to a single representative value: the scalar itself, or the
    /// mean of the samples. Used where a point value is required (e.g.
    /// integer lifetime arithmetic on series that are scalar in practice).
    pub fn to_point(&self) -> f64 {
        match self {
            NumValue::Scalar(s) => *s,
            NumValue::Samples(v) => {
                if v.is_empty() {
                    0.0
                } else {
                    v.iter().copied().mean()
                }
            }
        }
    }

    pub fn mean(&self) -> f64 {
        self.to_point()
    }

    /// Empirical percentile, `p` in 0..=100. A scalar is its own percentile.
    pub fn percentile(&self, p: usize) -> f64 {
        match self {
            NumValue::Scalar(s) => *s,
            NumValue::Samples(v) => {
                if v.is_empty() {
                    0.0
                } else {
                    let mut data = Data::new(v.clone());
                    data.percentile(p)
                }
            }
        }
    }
}

macro_rules! impl_value_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<&NumValue> for &NumValue {
            type Output = NumValue;
            fn $method(self, rhs: &NumValue) -> NumValue {
                self.zip_with(rhs, |a, b| a $op b)
            }
        }

        impl $trait<f64> for &NumValue {
            type Output = NumValue;
            fn $method(self, rhs: f64) -> NumValue {
                self.map(|a| a $op rhs)
            }
        }

        impl $trait<&NumValue> for f64 {
            type Output = NumValue;
            fn $method(self, rhs: &NumValue) -> NumValue {
                rhs.map(|b| self $op b)
            }
        }
    };
}

impl_value_op!(Add, add, +);
impl_value_op!(Sub, sub, -);
impl_value_op!(Mul, mul, *);
impl_value_op!(Div, div, /);

/// Ordered map from modeling year to a [`NumValue`].
///
/// The canonical serialized form keys by year number (string keys in JSON),
/// matching the collaborator boundary format.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct YearSeries(BTreeMap<Year, NumValue>);

impl YearSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// A series holding `value` for every year of `years`.
    pub fn constant(years: impl Iterator<Item = Year>, value: f64) -> Self {
        YearSeries(years.map(|y| (y, NumValue::Scalar(value))).collect())
    }

    pub fn insert(&mut self, year: Year, value: NumValue) {
        self.0.insert(year, value);
    }

    pub fn get(&self, year: Year) -> Option<&NumValue> {
        self.0.get(&year)
    }

    pub fn get_mut(&mut self, year: Year) -> Option<&mut NumValue> {
        self.0.get_mut(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = Year> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Year, &NumValue)> {
        self.0.iter().map(|(y, v)| (*y, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the series holds an entry for every year in `years`.
    pub fn covers(&self, mut years: impl Iterator<Item = Year>) -> bool {
        years.all(|y| self.0.contains_key(&y))
    }

    /// Element-wise sum with another series over this series' years.
    pub fn add_series(&mut self, other: &YearSeries) {
        for (year, value) in self.0.iter_mut() {
            if let Some(rhs) = other.0.get(year) {
                *value = &*value + rhs;
            }
        }
    }
}

impl FromIterator<(Year, NumValue)> for YearSeries {
    fn from_iter<T: IntoIterator<Item = (Year, NumValue)>>(iter: T) -> Self {
        YearSeries(iter.into_iter().collect())
    }
}

impl Index<Year> for YearSeries {
    type Output = NumValue;

    fn index(&self, year: Year) -> &NumValue {
        self.0
            .get(&year)
            .unwrap_or_else(|| panic!("year {year} missing from validated series"))
    }
}

impl IndexMut<Year> for YearSeries {
    fn index_mut(&mut self, year: Year) -> &mut NumValue {
        self.0
            .get_mut(&year)
            .unwrap_or_else(|| panic!("year {year} missing from validated series"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_broadcast_arithmetic() {
        let a = NumValue::Scalar(2.0);
        let b = NumValue::Samples(vec![1.0, 2.0, 3.0]);
        assert_eq!(&a + &b, NumValue::Samples(vec![3.0, 4.0, 5.0]));
        assert_eq!(&b * 2.0, NumValue::Samples(vec![2.0, 4.0, 6.0]));
        assert_eq!(1.0 - &a, NumValue::Scalar(-1.0));
    }

    #[test]
    fn test_elementwise_samples() {
        let a = NumValue::Samples(vec![4.0, 9.0]);
        let b = NumValue::Samples(vec![2.0, 3.0]);
        assert_eq!(&a / &b, NumValue::Samples(vec![2.0, 3.0]));
    }

    #[test]
    #[should_panic(expected = "sample length mismatch")]
    fn test_length_mismatch_panics() {
        let a = NumValue::Samples(vec![1.0, 2.0]);
        let b = NumValue::Samples(vec![1.0, 2.0, 3.0]);
        let _ = &a + &b;
    }

    #[test]
    fn test_div_or_zero_guards_denominator() {
        let n = NumValue::Samples(vec![1.0, 2.0]);
        let d = NumValue::Samples(vec![2.0, 0.0]);
        assert_eq!(n.div_or_zero(&d), NumValue::Samples(vec![0.5, 0.0]));
    }

    #[test]
    fn test_reductions() {
        let v = NumValue::Samples(vec![1.0, 2.0, 3.0, 4.0]);
        assert!((v.mean() - 2.5).abs() < 1e-12);
        assert!(v.all(|x| x > 0.0));
        assert!(!v.is_zero());
        assert!(NumValue::Scalar(0.0).is_zero());
    }

    #[test]
    fn test_cap_and_floor() {
        let v = NumValue::Samples(vec![-600.0, 0.5, 1.5]);
        assert_eq!(
            v.floor_at(-500.0).cap_at(1.0),
            NumValue::Samples(vec![-500.0, 0.5, 1.0])
        );
    }

    #[test]
    fn test_year_series_serde_round_trip() {
        let mut s = YearSeries::new();
        s.insert(2025, NumValue::Scalar(1.5));
        s.insert(2026, NumValue::Samples(vec![1.0, 2.0]));
        let json = serde_json::to_string(&s).unwrap();
        let back: YearSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn test_year_series_coverage() {
        let s = YearSeries::constant(2025..=2027, 0.0);
        assert!(s.covers(2025..=2027));
        assert!(!s.covers(2025..=2028));
    }
}
