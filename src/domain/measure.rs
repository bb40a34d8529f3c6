use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::AdoptScheme;
use crate::domain::errors::EngineError;
use crate::domain::mseg::{
    LinkKey, MarketMseg, MsegKey, OutputBreakouts, TechSide, RESIDENTIAL_BUILDINGS,
};
use crate::domain::value::{NumValue, Year, YearSeries};

/// Whether a measure replaces the baseline technology outright or is
/// installed on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureType {
    FullService,
    AddOn,
}

/// Competition state of a measure's markets within one adoption scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionState {
    Uncompeted,
    Competed,
}

/// A pair of values, one per competition state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitionPair<T> {
    pub uncompeted: T,
    pub competed: T,
}

impl<T> CompetitionPair<T> {
    pub fn get(&self, state: CompetitionState) -> &T {
        match state {
            CompetitionState::Uncompeted => &self.uncompeted,
            CompetitionState::Competed => &self.competed,
        }
    }

    pub fn get_mut(&mut self, state: CompetitionState) -> &mut T {
        match state {
            CompetitionState::Uncompeted => &mut self.uncompeted,
            CompetitionState::Competed => &mut self.competed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndUses {
    pub primary: Vec<String>,
    #[serde(default)]
    pub secondary: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechSides {
    pub primary: TechSide,
    #[serde(default)]
    pub secondary: Option<TechSide>,
}

/// Energy accounting flags recorded by the upstream preparation stage.
/// All measures in one engine run must agree on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnergyOutputs {
    pub site_energy: bool,
    pub captured_energy_ss: bool,
}

/// Consumer-choice model parameters for one competed microsegment key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceParameters {
    /// Capital-cost coefficient of the residential logit model, by year.
    pub b1: YearSeries,
    /// Operating-cost coefficient of the residential logit model, by year.
    pub b2: YearSeries,
    /// Commercial adopter population fractions per discount-rate tier,
    /// by year.
    #[serde(default)]
    pub rate_distribution: BTreeMap<Year, Vec<f64>>,
}

/// One contributing microsegment: market data plus the fraction of the
/// nominal segment the measure actually applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributingMseg {
    pub mseg: MarketMseg,
    #[serde(default = "default_sub_market_scale")]
    pub sub_market_scale: f64,
}

fn default_sub_market_scale() -> f64 {
    1.0
}

/// Captured-energy bookkeeping that links primary-key competition results
/// to the secondary microsegments they affect.
///
/// `original_*` accumulate pre-competition captured efficient energy while
/// primary keys are processed; `adjusted_*` accumulate the same values
/// scaled by the competed market shares. Secondary adjustment later applies
/// the adjusted/original ratio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondaryAdjustments {
    pub original_total: BTreeMap<LinkKey, YearSeries>,
    pub original_competed: BTreeMap<LinkKey, YearSeries>,
    pub adjusted_total: BTreeMap<LinkKey, YearSeries>,
    pub adjusted_competed: BTreeMap<LinkKey, YearSeries>,
}

impl SecondaryAdjustments {
    /// Whether any secondary link is tracked for this measure.
    pub fn has_links(&self) -> bool {
        !self.original_total.is_empty()
    }
}

/// Everything the competition pass needs for one measure and scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitionData {
    pub contributing: BTreeMap<MsegKey, ContributingMseg>,
    #[serde(default)]
    pub choice_params: BTreeMap<MsegKey, ChoiceParameters>,
    #[serde(default)]
    pub secondary: SecondaryAdjustments,
}

/// A measure's market data for one competition state: aggregate totals,
/// reporting-category breakouts, and (for the competed state) the
/// competition data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeasureMarket {
    pub master: MarketMseg,
    #[serde(default)]
    pub out_break: OutputBreakouts,
    #[serde(default)]
    pub competition: CompetitionData,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMarkets {
    pub uncompeted: MeasureMarket,
    pub competed: MeasureMarket,
}

impl ScenarioMarkets {
    pub fn get(&self, state: CompetitionState) -> &MeasureMarket {
        match state {
            CompetitionState::Uncompeted => &self.uncompeted,
            CompetitionState::Competed => &self.competed,
        }
    }

    pub fn get_mut(&mut self, state: CompetitionState) -> &mut MeasureMarket {
        match state {
            CompetitionState::Uncompeted => &mut self.uncompeted,
            CompetitionState::Competed => &mut self.competed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSavings {
    pub total: YearSeries,
    pub annual: YearSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSavings {
    pub savings_total: YearSeries,
    pub savings_annual: YearSeries,
    pub cost: CostSavings,
}

/// Energy, carbon, and cost savings of a measure over its baseline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SavingsOutputs {
    pub stock_cost: CostSavings,
    pub energy: ResourceSavings,
    pub carbon: ResourceSavings,
}

/// Portfolio-level cost-of-conserved-resource metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioMetrics {
    pub cce: YearSeries,
    pub cce_with_carbon_benefits: YearSeries,
    pub ccc: YearSeries,
    pub ccc_with_energy_benefits: YearSeries,
}

/// Per-year unit costs at each of the seven commercial discount-rate tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierSeries(pub BTreeMap<Year, Vec<NumValue>>);

impl TierSeries {
    pub fn insert(&mut self, year: Year, tiers: Vec<NumValue>) {
        self.0.insert(year, tiers);
    }

    pub fn get(&self, year: Year) -> Option<&[NumValue]> {
        self.0.get(&year).map(|v| v.as_slice())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SectorCosts {
    /// Raw per-unit cost; present only when the measure applies to
    /// residential buildings.
    pub residential: Option<YearSeries>,
    /// Life-cycle cost at each commercial discount-rate tier; present only
    /// when the measure applies to commercial buildings.
    pub commercial: Option<TierSeries>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitCosts {
    pub stock: SectorCosts,
    pub energy: SectorCosts,
    pub carbon: SectorCosts,
}

/// Financial metrics driving individual adoption decisions. These are
/// independent of adoption scenario and competition state, so they are
/// computed once per measure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumerMetrics {
    pub unit_cost: UnitCosts,
    pub irr_energy: YearSeries,
    pub irr_energy_carbon: YearSeries,
    pub payback_energy: YearSeries,
    pub payback_energy_carbon: YearSeries,
}

/// Boundary definition of a measure, as produced by the upstream
/// preparation stage. One market record per adoption scenario; the engine
/// clones it into uncompeted/competed copies on ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct MeasureDef {
    pub name: String,
    pub climate_zones: Vec<String>,
    pub bldg_types: Vec<String>,
    pub end_use: EndUses,
    #[serde(default)]
    pub technologies: Vec<String>,
    pub technology_side: TechSides,
    pub measure_type: MeasureType,
    pub market_entry_year: Year,
    pub years_on_market: Vec<Year>,
    #[serde(default)]
    pub energy_outputs: EnergyOutputs,
    pub markets: BTreeMap<AdoptScheme, MeasureMarket>,
}

/// One efficiency measure with its market data and computed outputs.
///
/// Computed outputs start as `None` and are filled at most once per
/// (scenario, competition state); consumer metrics are filled exactly once
/// across all passes.
#[derive(Debug, Clone)]
pub struct Measure {
    pub name: String,
    pub climate_zones: Vec<String>,
    pub bldg_types: Vec<String>,
    pub end_use: EndUses,
    pub technologies: Vec<String>,
    pub technology_side: TechSides,
    pub measure_type: MeasureType,
    pub market_entry_year: Year,
    pub years_on_market: Vec<Year>,
    pub energy_outputs: EnergyOutputs,
    pub markets: BTreeMap<AdoptScheme, ScenarioMarkets>,
    pub savings: BTreeMap<AdoptScheme, CompetitionPair<Option<SavingsOutputs>>>,
    pub portfolio_metrics: BTreeMap<AdoptScheme, CompetitionPair<Option<PortfolioMetrics>>>,
    pub consumer_metrics: Option<ConsumerMetrics>,
}

impl Measure {
    pub fn from_def(def: MeasureDef) -> Self {
        let mut markets = BTreeMap::new();
        let mut savings = BTreeMap::new();
        let mut portfolio = BTreeMap::new();
        for (scheme, market) in def.markets {
            // The uncompeted copy is a frozen snapshot; competition data
            // only matter on the competed side.
            let mut uncompeted = market.clone();
            uncompeted.competition = CompetitionData::default();
            markets.insert(
                scheme,
                ScenarioMarkets {
                    uncompeted,
                    competed: market,
                },
            );
            savings.insert(scheme, CompetitionPair::default());
            portfolio.insert(scheme, CompetitionPair::default());
        }
        Measure {
            name: def.name,
            climate_zones: def.climate_zones,
            bldg_types: def.bldg_types,
            end_use: def.end_use,
            technologies: def.technologies,
            technology_side: def.technology_side,
            measure_type: def.measure_type,
            market_entry_year: def.market_entry_year,
            years_on_market: def.years_on_market,
            energy_outputs: def.energy_outputs,
            markets,
            savings,
            portfolio_metrics: portfolio,
            consumer_metrics: None,
        }
    }

    pub fn on_market(&self, year: Year) -> bool {
        self.years_on_market.contains(&year)
    }

    pub fn market(&self, scheme: AdoptScheme) -> Result<&ScenarioMarkets, EngineError> {
        self.markets.get(&scheme).ok_or(EngineError::MissingScheme {
            name: self.name.clone(),
            scheme,
        })
    }

    pub fn market_mut(&mut self, scheme: AdoptScheme) -> Result<&mut ScenarioMarkets, EngineError> {
        let name = self.name.clone();
        self.markets
            .get_mut(&scheme)
            .ok_or(EngineError::MissingScheme { name, scheme })
    }

    /// Whether any of the measure's building types is residential.
    pub fn applies_to_residential(&self) -> bool {
        self.bldg_types
            .iter()
            .any(|b| RESIDENTIAL_BUILDINGS.contains(&b.as_str()))
    }

    /// Whether any of the measure's building types is commercial.
    pub fn applies_to_commercial(&self) -> bool {
        self.bldg_types
            .iter()
            .any(|b| !RESIDENTIAL_BUILDINGS.contains(&b.as_str()))
    }

    /// A longer-lived full-service supply-side lighting replacement earns
    /// credit for avoided baseline repurchases in its cash flows.
    pub fn earns_lighting_repurchase_credit(&self) -> bool {
        self.measure_type == MeasureType::FullService
            && self.technology_side.primary == TechSide::Supply
            && self.end_use.primary.iter().any(|e| e == "lighting")
    }

    /// Whether the measure touches heating or cooling in any end use,
    /// making it a candidate for supply/demand overlap removal.
    pub fn affects_heating_cooling(&self) -> bool {
        let in_list = |uses: &[String]| {
            uses.iter()
                .any(|e| crate::domain::mseg::HEAT_COOL_END_USES.contains(&e.as_str()))
        };
        in_list(&self.end_use.primary)
            || self.end_use.secondary.as_deref().is_some_and(in_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::NumValue;

    fn minimal_def() -> MeasureDef {
        MeasureDef {
            name: "test measure".to_string(),
            climate_zones: vec!["AIA CZ1".to_string()],
            bldg_types: vec!["single family home".to_string()],
            end_use: EndUses {
                primary: vec!["lighting".to_string()],
                secondary: None,
            },
            technologies: vec![],
            technology_side: TechSides {
                primary: TechSide::Supply,
                secondary: None,
            },
            measure_type: MeasureType::FullService,
            market_entry_year: 2025,
            years_on_market: vec![2025, 2026],
            energy_outputs: EnergyOutputs::default(),
            markets: BTreeMap::from([(AdoptScheme::MaxAdoption, MeasureMarket::default())]),
        }
    }

    #[test]
    fn test_from_def_initializes_both_competition_states() {
        let m = Measure::from_def(minimal_def());
        let markets = m.market(AdoptScheme::MaxAdoption).unwrap();
        assert_eq!(markets.uncompeted.master, markets.competed.master);
        assert!(m.savings[&AdoptScheme::MaxAdoption].uncompeted.is_none());
        assert!(m.consumer_metrics.is_none());
    }

    #[test]
    fn test_on_market_years() {
        let m = Measure::from_def(minimal_def());
        assert!(m.on_market(2025));
        assert!(!m.on_market(2030));
    }

    #[test]
    fn test_lighting_repurchase_credit_requires_full_service_supply() {
        let mut def = minimal_def();
        assert!(Measure::from_def(def.clone()).earns_lighting_repurchase_credit());
        def.measure_type = MeasureType::AddOn;
        assert!(!Measure::from_def(def).earns_lighting_repurchase_credit());
    }

    #[test]
    fn test_sector_applicability() {
        let m = Measure::from_def(minimal_def());
        assert!(m.applies_to_residential());
        assert!(!m.applies_to_commercial());
    }

    #[test]
    fn test_tier_series_lookup() {
        let mut tiers = TierSeries::default();
        tiers.insert(2025, vec![NumValue::Scalar(1.0); 7]);
        assert_eq!(tiers.get(2025).unwrap().len(), 7);
        assert!(tiers.get(2026).is_none());
    }
}
