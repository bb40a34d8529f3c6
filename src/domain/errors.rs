use thiserror::Error;

use crate::config::AdoptScheme;
use crate::domain::value::Year;

/// Errors surfaced by the analysis engine to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active measures supplied to the engine")]
    NoMeasures,

    #[error("inconsistent energy accounting across measure set: {reason}")]
    InconsistentEnergyUnits { reason: String },

    #[error("measure '{name}' has no market data for scheme {scheme:?}")]
    MissingScheme { name: String, scheme: AdoptScheme },

    #[error("year {year} missing from series '{context}'")]
    MissingYear { year: Year, context: String },

    #[error("sample length mismatch in '{context}': {left} vs {right}")]
    SampleLength {
        context: String,
        left: usize,
        right: usize,
    },

    #[error("no output breakout category matches microsegment '{key}': {field}")]
    UnmappedBreakout { key: String, field: &'static str },

    #[error("measure '{name}' lacks a breakout slot for ({climate}, {building}, {end_use})")]
    MissingBreakoutSlot {
        name: String,
        climate: String,
        building: String,
        end_use: String,
    },

    #[error("measure '{name}' lacks choice parameters for competed key '{key}'")]
    MissingChoiceParameters { name: String, key: String },

    #[error("results for measure '{name}' requested before the computing pass ran")]
    ResultsNotReady { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let err = EngineError::SampleLength {
            context: "master energy".to_string(),
            left: 10,
            right: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("master energy"));
        assert!(msg.contains("10"));
        assert!(msg.contains("12"));
    }
}
