// Cash-flow primitives (NPV, IRR, simple payback)
pub mod cashflow;

// Per-year unit financial metrics
pub mod metrics;

/// Reported when a financial metric is not meaningfully computable
/// (degenerate denominator, non-convergent IRR, cash flows that never pay
/// back).
pub const METRIC_SENTINEL: f64 = 999.0;
