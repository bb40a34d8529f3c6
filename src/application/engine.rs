use tracing::info;

use crate::application::aggregate::{self, EnergyAccounting, EngineOutput};
use crate::application::{competition, savings};
use crate::config::{AdoptScheme, AnalysisConfig};
use crate::domain::errors::EngineError;
use crate::domain::measure::{CompetitionState, Measure};
use crate::domain::mseg::OverlapTotals;

/// Orchestrates the analysis over a collection of measures: per adoption
/// scenario, uncompeted metrics, competition, competed metrics, then
/// summary aggregation.
///
/// The engine owns the canonical measure collection and is the sole writer
/// of its market data during a run.
pub struct Engine {
    config: AnalysisConfig,
    measures: Vec<Measure>,
    output: EngineOutput,
}

impl Engine {
    /// Validate the measure set and build an engine.
    ///
    /// Validation checks that every measure carries market data for every
    /// configured adoption scenario with full year coverage and consistent
    /// sample lengths, and that all measures agree on energy accounting.
    /// Mixed site/source accounting is a fatal configuration error.
    pub fn new(config: AnalysisConfig, measures: Vec<Measure>) -> Result<Self, EngineError> {
        let Some(first) = measures.first() else {
            return Err(EngineError::NoMeasures);
        };

        let reference = first.energy_outputs;
        for measure in &measures {
            if measure.energy_outputs.site_energy != reference.site_energy {
                return Err(EngineError::InconsistentEnergyUnits {
                    reason: format!(
                        "measure '{}' disagrees on site vs. source energy",
                        measure.name
                    ),
                });
            }
            if measure.energy_outputs.captured_energy_ss != reference.captured_energy_ss {
                return Err(EngineError::InconsistentEnergyUnits {
                    reason: format!(
                        "measure '{}' disagrees on site-source conversion method",
                        measure.name
                    ),
                });
            }
        }

        for measure in &measures {
            for &scheme in &config.adopt_schemes {
                let markets = measure.market(scheme)?;
                for (state, market) in [
                    ("uncompeted", &markets.uncompeted),
                    ("competed", &markets.competed),
                ] {
                    market.master.validate(
                        config.years(),
                        &format!("{}.{state}.master", measure.name),
                    )?;
                }
                for (key, contributing) in &markets.competed.competition.contributing {
                    contributing.mseg.validate(
                        config.years(),
                        &format!("{}.competed.contributing[{key}]", measure.name),
                    )?;
                }
            }
        }

        let energy_accounting = if reference.site_energy {
            EnergyAccounting::Site
        } else if reference.captured_energy_ss {
            EnergyAccounting::CapturedEnergy
        } else {
            EnergyAccounting::FossilEquivalent
        };
        let output = EngineOutput {
            energy_accounting,
            ..EngineOutput::default()
        };

        Ok(Engine {
            config,
            measures,
            output,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn energy_accounting(&self) -> EnergyAccounting {
        self.output.energy_accounting
    }

    /// Run the full two-pass flow for every configured adoption scenario
    /// and return the aggregated output.
    pub fn run(&mut self, overlap_totals: &OverlapTotals) -> Result<&EngineOutput, EngineError> {
        for scheme in self.config.adopt_schemes.clone() {
            info!(?scheme, "calculating uncompeted savings and metrics");
            self.update_savings_metrics(scheme, CompetitionState::Uncompeted)?;
            info!(?scheme, "competing measures");
            self.compete(scheme, overlap_totals)?;
            info!(?scheme, "calculating competed savings and metrics");
            self.update_savings_metrics(scheme, CompetitionState::Competed)?;
            self.finalize_outputs(scheme)?;
        }
        Ok(&self.output)
    }

    /// Compute savings and financial metrics for every measure whose
    /// output slot for (scheme, state) is still unfilled.
    pub fn update_savings_metrics(
        &mut self,
        scheme: AdoptScheme,
        state: CompetitionState,
    ) -> Result<(), EngineError> {
        for measure in &mut self.measures {
            savings::update_measure(measure, scheme, state, &self.config)?;
        }
        Ok(())
    }

    /// Apportion competed markets across measures for one scenario.
    pub fn compete(
        &mut self,
        scheme: AdoptScheme,
        overlap_totals: &OverlapTotals,
    ) -> Result<(), EngineError> {
        competition::compete_measures(&mut self.measures, &self.config, scheme, overlap_totals)
    }

    /// Summarize one scenario's results into the engine output.
    pub fn finalize_outputs(&mut self, scheme: AdoptScheme) -> Result<(), EngineError> {
        aggregate::finalize(&self.measures, &self.config, scheme, &mut self.output)
    }

    pub fn output(&self) -> &EngineOutput {
        &self.output
    }

    pub fn into_output(self) -> EngineOutput {
        self.output
    }
}
