// Result aggregation and summary statistics
pub mod aggregate;

// Market competition across measures
pub mod competition;

// Engine orchestration
pub mod engine;

// Savings and financial-metric update pass
pub mod savings;
