pub mod application;
pub mod config;
pub mod domain;

pub use application::engine::Engine;
pub use config::AnalysisConfig;
pub use domain::measure::Measure;
